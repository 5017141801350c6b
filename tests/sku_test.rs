//! Integration tests for SKU generation and validation.

use std::sync::{Arc, Mutex};

use uploadq::audit::{Activity, ActivityKind, AuditSink, TracingSink};
use uploadq::error::{Error, Result};
use uploadq::model::ActorId;
use uploadq::sku::{
    MemoryLedger, SkuEngine, SkuEntry, SkuLedger, SkuRejection, SkuTables, SqliteLedger,
};

const ACTOR: ActorId = ActorId(5);

fn engine_with(ledger: Arc<dyn SkuLedger>) -> SkuEngine {
    SkuEngine::new(SkuTables::default(), ledger, Arc::new(TracingSink))
        .with_suffix_source(|| "2603ABC".to_string())
}

#[derive(Default)]
struct Recorder(Mutex<Vec<Activity>>);

impl AuditSink for Recorder {
    fn record(&self, activity: &Activity) -> Result<()> {
        self.0.lock().unwrap().push(activity.clone());
        Ok(())
    }
}

struct DownLedger;

impl SkuLedger for DownLedger {
    fn try_record(&self, _entry: &SkuEntry<'_>) -> Result<bool> {
        Err(Error::Other("ledger offline".to_string()))
    }

    fn contains(&self, _sku: &str) -> Result<bool> {
        Err(Error::Other("ledger offline".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Token extraction
// ---------------------------------------------------------------------------

#[test]
fn tumbler_gets_every_token() {
    let engine = engine_with(Arc::new(MemoryLedger::new()));
    let sku = engine
        .generate(ACTOR, "Custom Logo 40oz Stainless Steel Tumbler", "", "black")
        .unwrap();
    assert_eq!(sku, "TUM-SS-40OZ-BK-2603ABC");
}

#[test]
fn unknown_product_falls_back_to_first_word() {
    let engine = engine_with(Arc::new(MemoryLedger::new()));
    assert_eq!(
        engine.generate(ACTOR, "Widget Thing", "", "").unwrap(),
        "WID-2603ABC"
    );
}

#[test]
fn fallback_skips_marketing_words_and_short_words() {
    let engine = engine_with(Arc::new(MemoryLedger::new()));
    let tokens = engine.tokens("Custom Branded XY Gizmo", "");
    assert_eq!(tokens.category, "GIZ");

    let tokens = engine.tokens("Custom Logo", "");
    assert_eq!(tokens.category, "PRD");
}

#[test]
fn non_ascii_product_names_still_yield_valid_skus() {
    let engine = engine_with(Arc::new(MemoryLedger::new()));

    let sku = engine.generate(ACTOR, "Écharpe en laine", "", "").unwrap();
    assert_eq!(sku, "LAI-2603ABC");
    assert!(engine.validate(&sku), "{sku}");

    let sku = engine.generate(ACTOR, "Ésé çà", "", "").unwrap();
    assert_eq!(sku, "PRD-2603ABC");
    assert!(engine.validate(&sku), "{sku}");
}

#[test]
fn possessive_is_not_a_size() {
    let engine = engine_with(Arc::new(MemoryLedger::new()));
    let tokens = engine.tokens("Cotton Tee", "Men's Black");
    assert_eq!(tokens.size, None);
    assert_eq!(tokens.color.as_deref(), Some("BK"));
}

#[test]
fn clothing_size_and_color_come_from_variant() {
    let engine = engine_with(Arc::new(MemoryLedger::new()));
    let tokens = engine.tokens("Organic Cotton Hoodie", "Navy / XL");
    assert_eq!(tokens.category, "HOD");
    assert_eq!(tokens.material.as_deref(), Some("OCT"));
    assert_eq!(tokens.size.as_deref(), Some("XL"));
    assert_eq!(tokens.color.as_deref(), Some("NV"));
}

#[test]
fn specific_color_phrases_beat_generic_ones() {
    let engine = engine_with(Arc::new(MemoryLedger::new()));
    assert_eq!(
        engine.tokens("Mug", "Rose Gold").color.as_deref(),
        Some("RG")
    );
    assert_eq!(
        engine.tokens("Mug", "Royal Blue").color.as_deref(),
        Some("RB")
    );
}

// ---------------------------------------------------------------------------
// Uniqueness
// ---------------------------------------------------------------------------

#[test]
fn collisions_append_counter() {
    let engine = engine_with(Arc::new(MemoryLedger::new()));

    let first = engine.generate(ACTOR, "Ceramic Mug", "Color", "White").unwrap();
    let second = engine.generate(ACTOR, "Ceramic Mug", "Color", "White").unwrap();
    let third = engine.generate(ACTOR, "Ceramic Mug", "Color", "White").unwrap();

    assert_eq!(first, "MUG-CER-WH-2603ABC");
    assert_eq!(second, "MUG-CER-WH-2603ABC-1");
    assert_eq!(third, "MUG-CER-WH-2603ABC-2");
}

#[test]
fn historical_skus_are_never_reissued() {
    let ledger = Arc::new(MemoryLedger::with_existing(["WID-2603ABC"]));
    let engine = engine_with(ledger.clone());

    assert_eq!(
        engine.generate(ACTOR, "Widget", "", "").unwrap(),
        "WID-2603ABC-1"
    );
    assert!(ledger.contains("WID-2603ABC-1").unwrap());
}

#[test]
fn sqlite_ledger_persists_across_engines() {
    let ledger: Arc<dyn SkuLedger> = Arc::new(SqliteLedger::in_memory().unwrap());

    let a = engine_with(ledger.clone());
    let b = engine_with(ledger.clone());
    let first = a.generate(ACTOR, "Bamboo Pen", "", "").unwrap();
    let second = b.generate(ACTOR, "Bamboo Pen", "", "").unwrap();

    assert_eq!(first, "PEN-BMB-2603ABC");
    assert_eq!(second, "PEN-BMB-2603ABC-1");
    assert!(ledger.contains(&first).unwrap());
    assert!(!ledger.contains("PEN-BMB-2603ABC-2").unwrap());
}

#[test]
fn long_quantities_do_not_break_the_length_limit() {
    let engine = engine_with(Arc::new(MemoryLedger::new()));
    let sku = engine
        .generate(ACTOR, "Bottle 123456789012345678901234oz", "", "")
        .unwrap();
    assert!(engine.validate(&sku), "{sku}");
}

#[test]
fn overlong_sku_is_refused_before_logging() {
    let tables = SkuTables::from_toml_str(
        r#"
        categories = [{ keyword = "widget", code = "WIDGETWIDGETWIDGETWIDGET" }]
        materials = []
        colors = []
        "#,
    )
    .unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let engine = SkuEngine::new(tables, ledger.clone(), Arc::new(TracingSink))
        .with_suffix_source(|| "2603ABC".to_string());

    assert!(matches!(
        engine.generate(ACTOR, "Widget", "", ""),
        Err(Error::Validation(_))
    ));
    assert!(!ledger.contains("WIDGETWIDGETWIDGETWIDGET-2603ABC").unwrap());
}

#[test]
fn ledger_failure_fails_closed() {
    let engine = engine_with(Arc::new(DownLedger));
    assert!(matches!(
        engine.generate(ACTOR, "Widget", "", ""),
        Err(Error::Other(_))
    ));
}

#[test]
fn generation_is_audited() {
    let recorder = Arc::new(Recorder::default());
    let engine = SkuEngine::new(
        SkuTables::default(),
        Arc::new(MemoryLedger::with_existing(["CAP-RD-2603ABC"])),
        recorder.clone(),
    )
    .with_suffix_source(|| "2603ABC".to_string());

    let sku = engine.generate(ACTOR, "Baseball Cap", "Color", "Red").unwrap();

    let recorded = recorder.0.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].actor_id, ACTOR);
    assert_eq!(
        recorded[0].kind,
        ActivityKind::SkuGenerated {
            sku,
            product_name: "Baseball Cap".to_string(),
            variant_name: "Color".to_string(),
            variant_value: "Red".to_string(),
            collisions: 1,
        }
    );
}

#[test]
fn same_inputs_differ_only_in_suffix() {
    let engine = SkuEngine::new(
        SkuTables::default(),
        Arc::new(MemoryLedger::new()),
        Arc::new(TracingSink),
    );
    let product = "Custom Logo 40oz Stainless Steel Tumbler";
    let a = engine.generate(ACTOR, product, "", "black").unwrap();
    let b = engine.generate(ACTOR, product, "", "black").unwrap();

    assert_ne!(a, b);
    assert!(a.starts_with("TUM-SS-40OZ-BK-"), "{a}");
    assert!(b.starts_with("TUM-SS-40OZ-BK-"), "{b}");
    assert_eq!(engine.tokens(product, "black"), engine.tokens(product, "black"));
}

#[test]
fn default_suffix_is_random() {
    let engine = SkuEngine::new(
        SkuTables::default(),
        Arc::new(MemoryLedger::new()),
        Arc::new(TracingSink),
    );
    let sku = engine.generate(ACTOR, "Tote Bag", "", "").unwrap();
    assert!(sku.starts_with("TOT-"), "{sku}");
    assert!(engine.validate(&sku), "{sku}");
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn validate_accepts_well_formed_skus() {
    let engine = engine_with(Arc::new(MemoryLedger::new()));
    let longest = "X".repeat(30);
    for sku in ["ABC", "TUM-SS-40OZ-BK-24A7K", "A-1", longest.as_str()] {
        assert!(engine.validate(sku), "{sku} should be valid");
        assert_eq!(engine.last_error(), None);
    }
}

#[test]
fn validate_records_last_error() {
    let engine = engine_with(Arc::new(MemoryLedger::new()));

    assert!(!engine.validate("AB"));
    assert_eq!(engine.last_error(), Some(SkuRejection::Length(2)));

    assert!(!engine.validate(&"X".repeat(31)));
    assert_eq!(engine.last_error(), Some(SkuRejection::Length(31)));

    assert!(!engine.validate("tum-ss-1"));
    assert_eq!(engine.last_error(), Some(SkuRejection::Charset));

    assert!(!engine.validate("TUM_SS"));
    assert_eq!(engine.last_error(), Some(SkuRejection::Charset));

    assert!(engine.validate("TUM-SS"));
    assert_eq!(engine.last_error(), None);
}

// ---------------------------------------------------------------------------
// Table configuration
// ---------------------------------------------------------------------------

#[test]
fn tables_load_from_toml_in_order() {
    let tables = SkuTables::from_toml_str(
        r#"
        categories = [
            { keyword = "gadget", code = "GAD" },
            { keyword = "widget", code = "WGT" },
        ]
        materials = [{ keyword = "titanium", code = "TI" }]
        colors = [{ keyword = "teal", code = "TL" }]
        "#,
    )
    .unwrap();
    assert!(tables.is_stop_word("custom"));

    let engine = SkuEngine::new(tables, Arc::new(MemoryLedger::new()), Arc::new(TracingSink))
        .with_suffix_source(|| "2603ABC".to_string());
    assert_eq!(
        engine.generate(ACTOR, "Titanium Widget Gadget", "", "Teal").unwrap(),
        "GAD-TI-TL-2603ABC"
    );
}

#[test]
fn tables_reject_bad_entries() {
    assert!(matches!(
        SkuTables::from_toml_str("categories = []\nmaterials = []\ncolors = []"),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        SkuTables::from_toml_str(
            r#"
            categories = [{ keyword = "Mug", code = "MUG" }]
            materials = []
            colors = []
            "#
        ),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        SkuTables::from_toml_str(
            r#"
            categories = [{ keyword = "mug", code = "mg" }]
            materials = []
            colors = []
            "#
        ),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        SkuTables::from_toml_str("categories = 3"),
        Err(Error::Config(_))
    ));
}
