//! SKU log in Postgres.

use crate::audit::ActivityKind;
use crate::error::{Error, Result};
use crate::model::ActorId;
use crate::sku::{MAX_COLLISION_SUFFIX, SkuEntry, check, collision_candidates};

impl super::Db {
    /// Record `entry` unless the SKU is already logged.
    pub async fn try_record_sku(&self, entry: &SkuEntry<'_>) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO sku_log (sku, product_name, variant_name, variant_value)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (sku) DO NOTHING",
        )
        .bind(entry.sku)
        .bind(entry.product_name)
        .bind(entry.variant_name)
        .bind(entry.variant_value)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    pub async fn sku_exists(&self, sku: &str) -> Result<bool> {
        let found: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM sku_log WHERE sku = $1")
            .bind(sku)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Reserve `base`, or the first free `base-N`, in the SKU log.
    ///
    /// `base` is a full candidate from [`crate::sku::SkuEngine::candidate`].
    pub async fn reserve_sku(
        &self,
        actor_id: ActorId,
        base: &str,
        product_name: &str,
        variant_name: &str,
        variant_value: &str,
    ) -> Result<String> {
        for (collisions, sku) in collision_candidates(base) {
            check(&sku).map_err(|reason| {
                Error::Validation(format!("generated sku {sku} is unusable: {reason}"))
            })?;
            let entry = SkuEntry {
                sku: &sku,
                product_name,
                variant_name,
                variant_value,
            };
            if !self.try_record_sku(&entry).await? {
                tracing::debug!(candidate = %sku, "sku collision");
                continue;
            }

            tracing::info!(sku = %sku, collisions, "sku generated");
            self.emit(
                actor_id,
                ActivityKind::SkuGenerated {
                    sku: sku.clone(),
                    product_name: product_name.to_string(),
                    variant_name: variant_name.to_string(),
                    variant_value: variant_value.to_string(),
                    collisions,
                },
            )
            .await;
            return Ok(sku);
        }

        Err(Error::Other(format!(
            "no free sku for {base} after {MAX_COLLISION_SUFFIX} suffixes"
        )))
    }
}
