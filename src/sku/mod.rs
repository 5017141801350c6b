//! SKU token engine.
//!
//! Derives a compact inventory code from free-text product and variant names:
//! `CATEGORY[-MATERIAL][-SIZE][-COLOR]-UNIQUE`. Every token except the unique
//! suffix is a pure function of the input text and the keyword tables. The
//! suffix (`<yy><m><3 random>`) breaks most collisions; the rest are settled
//! against the historical SKU log by appending `-1`, `-2`, ...

pub mod ledger;
pub mod size;
pub mod tables;

use std::sync::{Arc, LazyLock, Mutex};

use chrono::{Datelike, Utc};
use opentelemetry::KeyValue;
use rand::Rng;
use regex::Regex;

use crate::audit::{self, Activity, ActivityKind, AuditSink};
use crate::error::{Error, Result};
use crate::model::ActorId;
use crate::telemetry::metrics;

pub use ledger::{MemoryLedger, SkuLedger, SqliteLedger};
pub use tables::{KeywordCode, SkuTables};

/// Category used when neither the table nor the fallback word yields one.
pub const FALLBACK_CATEGORY: &str = "PRD";

/// Upper bound on `-N` collision suffixes before giving up.
pub const MAX_COLLISION_SUFFIX: u32 = 999;

const SKU_MIN_LEN: usize = 3;
const SKU_MAX_LEN: usize = 30;

static SKU_CHARSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9-]+$").expect("sku charset pattern"));

/// A SKU to be written into the historical log.
#[derive(Debug, Clone, Copy)]
pub struct SkuEntry<'a> {
    pub sku: &'a str,
    pub product_name: &'a str,
    pub variant_name: &'a str,
    pub variant_value: &'a str,
}

/// Content-derived tokens, before the uniqueness suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkuTokens {
    pub category: String,
    pub material: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
}

impl SkuTokens {
    /// Join present tokens and `suffix` with hyphens, uppercased.
    pub fn with_suffix(&self, suffix: &str) -> String {
        std::iter::once(self.category.as_str())
            .chain(self.material.as_deref())
            .chain(self.size.as_deref())
            .chain(self.color.as_deref())
            .chain(std::iter::once(suffix))
            .collect::<Vec<_>>()
            .join("-")
            .to_uppercase()
    }
}

/// Why a SKU failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SkuRejection {
    #[error("sku must be 3-30 characters, got {0}")]
    Length(usize),
    #[error("sku may contain only A-Z, 0-9 and '-'")]
    Charset,
}

/// Check length and charset.
pub fn check(sku: &str) -> std::result::Result<(), SkuRejection> {
    let len = sku.chars().count();
    if !(SKU_MIN_LEN..=SKU_MAX_LEN).contains(&len) {
        return Err(SkuRejection::Length(len));
    }
    if !SKU_CHARSET.is_match(sku) {
        return Err(SkuRejection::Charset);
    }
    Ok(())
}

/// `<2-digit year><month without padding><3 random [A-Z0-9]>`.
pub fn default_unique_suffix() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let now = Utc::now();
    let mut rng = rand::rng();
    let random: String = (0..3)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect();
    format!("{:02}{}{}", now.year() % 100, now.month(), random)
}

/// `base`, then `base-1`, `base-2`, ... up to [`MAX_COLLISION_SUFFIX`].
pub fn collision_candidates(base: &str) -> impl Iterator<Item = (u32, String)> + '_ {
    (0..=MAX_COLLISION_SUFFIX).map(move |n| {
        if n == 0 {
            (0, base.to_string())
        } else {
            (n, format!("{base}-{n}"))
        }
    })
}

type SuffixSource = Box<dyn Fn() -> String + Send + Sync>;

/// The engine. Tables are immutable; the ledger and audit sink are injected.
pub struct SkuEngine {
    tables: SkuTables,
    ledger: Arc<dyn SkuLedger>,
    audit: Arc<dyn AuditSink>,
    suffix: SuffixSource,
    last_error: Mutex<Option<SkuRejection>>,
}

impl SkuEngine {
    pub fn new(tables: SkuTables, ledger: Arc<dyn SkuLedger>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            tables,
            ledger,
            audit,
            suffix: Box::new(default_unique_suffix),
            last_error: Mutex::new(None),
        }
    }

    /// Replace the random uniqueness suffix.
    pub fn with_suffix_source(mut self, source: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.suffix = Box::new(source);
        self
    }

    /// Extract the content-derived tokens.
    pub fn tokens(&self, product_name: &str, variant_value: &str) -> SkuTokens {
        let product = product_name.trim().to_lowercase();
        let variant = variant_value.trim().to_lowercase();
        let combined = format!("{product} {variant}");

        SkuTokens {
            category: self.category(&product),
            material: self.tables.material(&combined).map(str::to_string),
            size: size::size_token(&variant, &combined),
            color: self.tables.color(&variant).map(str::to_string),
        }
    }

    /// Tokens plus a fresh uniqueness suffix, not yet checked for collisions.
    pub fn candidate(&self, product_name: &str, variant_value: &str) -> String {
        self.tokens(product_name, variant_value)
            .with_suffix(&(self.suffix)())
    }

    /// Generate a SKU and record it in the historical log.
    ///
    /// Fails closed: if the ledger cannot be consulted no SKU is returned.
    pub fn generate(
        &self,
        actor_id: ActorId,
        product_name: &str,
        variant_name: &str,
        variant_value: &str,
    ) -> Result<String> {
        let span = tracing::info_span!("sku.generate", "sku.actor" = %actor_id);
        let _enter = span.enter();

        let base = self.candidate(product_name, variant_value);

        for (collisions, sku) in collision_candidates(&base) {
            check(&sku).map_err(|reason| {
                metrics::sku_generated().add(1, &[KeyValue::new("result", "rejected")]);
                Error::Validation(format!("generated sku {sku} is unusable: {reason}"))
            })?;
            let entry = SkuEntry {
                sku: &sku,
                product_name,
                variant_name,
                variant_value,
            };
            let recorded = self.ledger.try_record(&entry).inspect_err(|e| {
                metrics::sku_generated().add(1, &[KeyValue::new("result", "error")]);
                tracing::error!(candidate = %sku, error = %e, "sku ledger unavailable");
            })?;

            if !recorded {
                tracing::debug!(candidate = %sku, "sku collision");
                continue;
            }

            metrics::sku_generated().add(
                1,
                &[KeyValue::new(
                    "result",
                    if collisions == 0 { "ok" } else { "collision" },
                )],
            );
            tracing::info!(sku = %sku, collisions, "sku generated");

            audit::emit(
                self.audit.as_ref(),
                Activity::new(
                    actor_id,
                    ActivityKind::SkuGenerated {
                        sku: sku.clone(),
                        product_name: product_name.to_string(),
                        variant_name: variant_name.to_string(),
                        variant_value: variant_value.to_string(),
                        collisions,
                    },
                ),
            );
            return Ok(sku);
        }

        Err(Error::Other(format!(
            "no free sku for {base} after {MAX_COLLISION_SUFFIX} suffixes"
        )))
    }

    /// Validate `sku`, remembering the reason on failure.
    pub fn validate(&self, sku: &str) -> bool {
        let outcome = check(sku);
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = outcome.err();
        }
        outcome.is_ok()
    }

    /// Reason the most recent [`validate`](Self::validate) call failed.
    pub fn last_error(&self) -> Option<SkuRejection> {
        self.last_error.lock().ok().and_then(|slot| *slot)
    }

    fn category(&self, product: &str) -> String {
        if let Some(code) = self.tables.category(product) {
            return code.to_string();
        }

        product
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| word.chars().all(|c| c.is_ascii_alphanumeric()))
            .filter(|word| word.len() >= 3 && !self.tables.is_stop_word(word))
            .map(|word| word[..3].to_ascii_uppercase())
            .next()
            .unwrap_or_else(|| FALLBACK_CATEGORY.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_reports_length_before_charset() {
        assert_eq!(check("ab"), Err(SkuRejection::Length(2)));
        assert_eq!(check("tum-ss-1"), Err(SkuRejection::Charset));
        assert_eq!(check("TUM-SS-40OZ-BK-24A7K"), Ok(()));
        assert_eq!(check(&"A".repeat(31)), Err(SkuRejection::Length(31)));
    }

    #[test]
    fn unique_suffix_has_date_prefix_and_three_random_chars() {
        let suffix = default_unique_suffix();
        let now = Utc::now();
        let prefix = format!("{:02}{}", now.year() % 100, now.month());
        assert!(suffix.starts_with(&prefix));
        let random = &suffix[prefix.len()..];
        assert_eq!(random.len(), 3);
        assert!(random.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn collision_candidates_count_up() {
        let first: Vec<_> = collision_candidates("MUG-2610ABC").take(3).collect();
        assert_eq!(
            first,
            vec![
                (0, "MUG-2610ABC".to_string()),
                (1, "MUG-2610ABC-1".to_string()),
                (2, "MUG-2610ABC-2".to_string()),
            ]
        );
    }

    #[test]
    fn tokens_join_in_fixed_order() {
        let tokens = SkuTokens {
            category: "tum".to_string(),
            material: None,
            size: Some("40oz".to_string()),
            color: Some("bk".to_string()),
        };
        assert_eq!(tokens.with_suffix("2610abc"), "TUM-40OZ-BK-2610ABC");
    }
}
