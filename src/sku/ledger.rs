//! Historical SKU logs used for uniqueness enforcement.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::storage::Storage;

use super::SkuEntry;

/// Append-only record of every SKU ever handed out.
pub trait SkuLedger: Send + Sync {
    /// Record `entry.sku` unless it is already present. Returns whether it
    /// was recorded; the check and the write are one atomic step.
    fn try_record(&self, entry: &SkuEntry<'_>) -> Result<bool>;

    fn contains(&self, sku: &str) -> Result<bool>;
}

/// Process-local ledger. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    skus: Mutex<HashSet<String>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with historical values.
    pub fn with_existing<I, S>(skus: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            skus: Mutex::new(skus.into_iter().map(Into::into).collect()),
        }
    }
}

impl SkuLedger for MemoryLedger {
    fn try_record(&self, entry: &SkuEntry<'_>) -> Result<bool> {
        let mut skus = self
            .skus
            .lock()
            .map_err(|_| Error::Other("sku ledger lock poisoned".to_string()))?;
        Ok(skus.insert(entry.sku.to_string()))
    }

    fn contains(&self, sku: &str) -> Result<bool> {
        let skus = self
            .skus
            .lock()
            .map_err(|_| Error::Other("sku ledger lock poisoned".to_string()))?;
        Ok(skus.contains(sku))
    }
}

/// Ledger stored in the `sku_log` table of a SQLite database.
pub struct SqliteLedger {
    storage: Mutex<Storage>,
}

impl SqliteLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            storage: Mutex::new(Storage::open(path)?),
        })
    }

    /// In-memory ledger (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            storage: Mutex::new(Storage::in_memory()?),
        })
    }
}

impl SkuLedger for SqliteLedger {
    fn try_record(&self, entry: &SkuEntry<'_>) -> Result<bool> {
        self.storage
            .lock()
            .map_err(|_| Error::Other("sku ledger lock poisoned".to_string()))?
            .try_record_sku(entry)
    }

    fn contains(&self, sku: &str) -> Result<bool> {
        self.storage
            .lock()
            .map_err(|_| Error::Other("sku ledger lock poisoned".to_string()))?
            .sku_exists(sku)
    }
}
