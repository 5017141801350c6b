//! Keyword tables driving token extraction.
//!
//! Every table is an ordered list of `(keyword, code)` pairs and the first
//! match wins, so specific phrases must sit above the generic words they
//! contain ("stainless steel" above "steel", "navy blue" above "blue").

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// One keyword and the code it contributes to a SKU.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeywordCode {
    pub keyword: String,
    pub code: String,
}

impl KeywordCode {
    fn new(keyword: &str, code: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            code: code.to_string(),
        }
    }
}

/// Immutable lookup configuration for the SKU engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SkuTables {
    pub categories: Vec<KeywordCode>,
    pub materials: Vec<KeywordCode>,
    pub colors: Vec<KeywordCode>,
    /// Marketing words skipped by the category fallback.
    #[serde(default = "default_stop_words")]
    pub stop_words: Vec<String>,
}

impl SkuTables {
    /// Parse tables from TOML. Array order is match order.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let tables: SkuTables = toml::from_str(content)
            .map_err(|e| Error::Config(format!("bad sku tables: {e}")))?;
        tables.check()?;
        Ok(tables)
    }

    /// Load tables from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// First category whose keyword occurs in `text`.
    pub fn category(&self, text: &str) -> Option<&str> {
        first_match(&self.categories, text)
    }

    pub fn material(&self, text: &str) -> Option<&str> {
        first_match(&self.materials, text)
    }

    pub fn color(&self, text: &str) -> Option<&str> {
        first_match(&self.colors, text)
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.iter().any(|w| w == word)
    }

    fn check(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(Error::Validation(
                "category table must not be empty".to_string(),
            ));
        }
        let all = self
            .categories
            .iter()
            .chain(&self.materials)
            .chain(&self.colors);
        for entry in all {
            if entry.keyword.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "empty keyword for code {:?}",
                    entry.code
                )));
            }
            if entry.keyword != entry.keyword.to_lowercase() {
                return Err(Error::Validation(format!(
                    "keyword {:?} must be lowercase",
                    entry.keyword
                )));
            }
            if entry.code.is_empty()
                || !entry
                    .code
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            {
                return Err(Error::Validation(format!(
                    "code {:?} must be uppercase alphanumeric",
                    entry.code
                )));
            }
        }
        Ok(())
    }
}

fn first_match<'a>(table: &'a [KeywordCode], text: &str) -> Option<&'a str> {
    table
        .iter()
        .find(|entry| text.contains(entry.keyword.as_str()))
        .map(|entry| entry.code.as_str())
}

fn default_stop_words() -> Vec<String> {
    [
        "custom",
        "branded",
        "logo",
        "promotional",
        "bulk",
        "wholesale",
    ]
    .iter()
    .map(|w| w.to_string())
    .collect()
}

impl Default for SkuTables {
    fn default() -> Self {
        let categories = [
            // Drinkware
            ("tumbler", "TUM"),
            ("water bottle", "BTL"),
            ("bottle", "BTL"),
            ("mug", "MUG"),
            ("cup", "CUP"),
            ("glass", "GLS"),
            ("can cooler", "KOZ"),
            ("koozie", "KOZ"),
            // Apparel
            ("t-shirt", "TSH"),
            ("tshirt", "TSH"),
            ("hoodie", "HOD"),
            ("sweatshirt", "SWT"),
            ("polo", "POL"),
            ("jacket", "JKT"),
            ("beanie", "BNE"),
            ("hat", "HAT"),
            ("cap", "CAP"),
            ("sock", "SOK"),
            // Bags
            ("backpack", "BPK"),
            ("tote", "TOT"),
            ("duffel", "DUF"),
            ("bag", "BAG"),
            // Office
            ("notebook", "NTB"),
            ("journal", "JRN"),
            ("pen", "PEN"),
            ("sticky note", "STN"),
            // Tech
            ("power bank", "PWB"),
            ("charger", "CHG"),
            ("speaker", "SPK"),
            ("earbud", "EAR"),
            ("usb", "USB"),
            ("mouse pad", "MPD"),
            // Misc
            ("keychain", "KEY"),
            ("lanyard", "LAN"),
            ("umbrella", "UMB"),
            ("towel", "TWL"),
            ("blanket", "BLK"),
            ("sticker", "STK"),
        ];

        let materials = [
            ("stainless steel", "SS"),
            ("stainless", "SS"),
            ("steel", "STL"),
            ("aluminum", "ALU"),
            ("bamboo", "BMB"),
            ("organic cotton", "OCT"),
            ("cotton", "CTN"),
            ("polyester", "PLY"),
            ("canvas", "CNV"),
            ("leather", "LTH"),
            ("silicone", "SIL"),
            ("ceramic", "CER"),
            ("glass", "GLS"),
            ("plastic", "PLS"),
            ("cork", "CRK"),
            ("wood", "WD"),
            ("nylon", "NYL"),
            ("jute", "JUT"),
        ];

        let colors = [
            ("navy", "NV"),
            ("royal blue", "RB"),
            ("light blue", "LB"),
            ("blue", "BL"),
            ("black", "BK"),
            ("white", "WH"),
            ("red", "RD"),
            ("forest green", "FG"),
            ("green", "GN"),
            ("yellow", "YL"),
            ("orange", "OR"),
            ("purple", "PR"),
            ("pink", "PK"),
            ("gray", "GY"),
            ("grey", "GY"),
            ("brown", "BR"),
            ("silver", "SV"),
            ("rose gold", "RG"),
            ("gold", "GD"),
            ("clear", "CL"),
            ("natural", "NT"),
        ];

        let table = |rows: &[(&str, &str)]| -> Vec<KeywordCode> {
            rows.iter().map(|(k, c)| KeywordCode::new(k, c)).collect()
        };

        Self {
            categories: table(&categories),
            materials: table(&materials),
            colors: table(&colors),
            stop_words: default_stop_words(),
        }
    }
}
