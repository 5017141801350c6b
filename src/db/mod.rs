//! Postgres backend: connection pool, migrations, and health check.
//!
//! Same queue semantics as the embedded SQLite queue, for deployments where
//! many worker processes share one database. Row locks (`FOR UPDATE SKIP
//! LOCKED`) take the place of SQLite's single writer.

pub mod activity;
pub mod queue;
pub mod sku;

use crate::error::Result;
use crate::model::LeaseDuration;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared across all modules.
pub struct Db {
    pool: PgPool,
    default_lease: LeaseDuration,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self {
            pool,
            default_lease: LeaseDuration::default(),
        })
    }

    /// Lease used while no value is stored in settings.
    pub fn with_default_lease(mut self, lease: LeaseDuration) -> Self {
        self.default_lease = lease;
        self
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
