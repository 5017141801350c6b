//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast on malformed values.
//! The Postgres DSN is wrapped in secrecy::SecretString to prevent log leaks.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::model::LeaseDuration;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    /// Postgres DSN. When set, the Postgres backend is used.
    pub database_url: Option<SecretString>,
    /// SQLite database file for the embedded backend.
    pub db_path: PathBuf,
    /// Lease used until an admin stores one in settings.
    pub default_lease: LeaseDuration,
    /// Optional TOML file overriding the built-in SKU keyword tables.
    pub sku_tables_path: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: optional_var("DATABASE_URL").map(SecretString::from),
            db_path: optional_var("UPLOADQ_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploadq.db")),
            default_lease: lease_var("LEASE_MINUTES")?,
            sku_tables_path: optional_var("SKU_TABLES_PATH").map(PathBuf::from),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Unset and blank are both treated as absent.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn lease_var(name: &str) -> Result<LeaseDuration> {
    let Some(raw) = optional_var(name) else {
        return Ok(LeaseDuration::default());
    };
    let minutes: i64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} must be a whole number of minutes, got {raw:?}")))?;
    LeaseDuration::from_minutes(minutes).map_err(|e| Error::Config(format!("{name}: {e}")))
}
