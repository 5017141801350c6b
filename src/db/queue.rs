//! Queue operations on Postgres: import, lease, settle, reclaim.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Postgres, Transaction};

use crate::audit::ActivityKind;
use crate::error::{Error, Result};
use crate::model::*;
use crate::queue::{report_enqueue, transition_metric, validate_transition};
use crate::storage::LEASE_MINUTES_KEY;
use crate::telemetry::metrics;
use crate::urls::partition_batch;

const ITEM_COLUMNS: &str =
    "id, url, status, created_at, created_by, assigned_to, assigned_at, completed_at";

impl super::Db {
    /// Bulk-import URLs in one transaction. See [`crate::queue::Queue::enqueue`].
    pub async fn enqueue<I, S>(
        &self,
        actor: &Actor,
        urls: I,
        mode: EnqueueMode,
    ) -> Result<EnqueueReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        actor.require(Capability::Manage)?;
        let (valid, rejected) = partition_batch(urls)?;
        let mut report = EnqueueReport {
            rejected,
            ..EnqueueReport::default()
        };
        if valid.is_empty() {
            tracing::warn!(rejected, "no acceptable urls in batch");
            return Ok(report);
        }

        let mut tx = self.pool.begin().await?;
        if mode == EnqueueMode::Replace {
            // Rows another transaction is assigning are locked; once that
            // commits they are no longer 'available' and are skipped here.
            report.replaced = sqlx::query("DELETE FROM queue_items WHERE status = 'available'")
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        let now = Utc::now();
        let mut seen = std::collections::HashSet::new();
        for url in &valid {
            if !seen.insert(url.as_str()) {
                report.duplicates += 1;
                continue;
            }
            let inserted = sqlx::query(
                "INSERT INTO queue_items (url, status, created_at, created_by)
                 VALUES ($1, 'available', $2, $3)
                 ON CONFLICT (url) DO NOTHING",
            )
            .bind(url)
            .bind(now)
            .bind(actor.id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if inserted == 1 {
                report.accepted += 1;
            } else {
                report.duplicates += 1;
            }
        }
        tx.commit().await?;

        report_enqueue(mode, &report);
        self.emit(
            actor.id,
            ActivityKind::UrlsEnqueued {
                mode,
                accepted: report.accepted,
                rejected: report.rejected,
                duplicates: report.duplicates,
                replaced: report.replaced,
            },
        )
        .await;
        Ok(report)
    }

    /// Reclaim expired leases, then return the actor's lease or claim the
    /// oldest available row with `FOR UPDATE SKIP LOCKED`.
    pub async fn request_item(&self, actor: &Actor) -> Result<RequestOutcome> {
        actor.require(Capability::Upload)?;
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // Duplicate requests from one actor queue up behind each other.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(actor.id.0)
            .execute(&mut *tx)
            .await?;

        let lease = self.lease_in(&mut tx).await?;
        let reclaimed = sqlx::query(
            "UPDATE queue_items
             SET status = 'available', assigned_to = NULL, assigned_at = NULL
             WHERE status = 'assigned' AND assigned_at <= $1",
        )
        .bind(now - lease.as_chrono())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let existing: Option<QueueItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM queue_items
             WHERE assigned_to = $1 AND status = 'assigned'"
        ))
        .bind(actor.id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = if let Some(row) = existing {
            RequestOutcome::Existing(row.try_into_work_item()?)
        } else {
            validate_transition(ItemStatus::Available, ItemStatus::Assigned)?;
            let claimed: Option<QueueItemRow> = sqlx::query_as(&format!(
                "WITH next AS (
                     SELECT id FROM queue_items
                     WHERE status = 'available'
                     ORDER BY created_at ASC, id ASC
                     LIMIT 1
                     FOR UPDATE SKIP LOCKED
                 )
                 UPDATE queue_items q
                 SET status = 'assigned', assigned_to = $1, assigned_at = $2
                 FROM next
                 WHERE q.id = next.id
                 RETURNING {}",
                qualified_columns("q")
            ))
            .bind(actor.id.0)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;
            match claimed {
                Some(row) => RequestOutcome::Assigned(row.try_into_work_item()?),
                None => RequestOutcome::NotAvailable,
            }
        };
        tx.commit().await?;

        if reclaimed > 0 {
            metrics::leases_reclaimed().add(reclaimed, &[]);
            tracing::info!(count = reclaimed, "expired leases reclaimed");
            self.emit(
                actor.id,
                ActivityKind::LeasesReclaimed {
                    count: reclaimed,
                    lease_minutes: lease.minutes(),
                },
            )
            .await;
        }
        if let RequestOutcome::Assigned(item) = &outcome {
            transition_metric(ItemStatus::Available, ItemStatus::Assigned);
            self.emit(
                actor.id,
                ActivityKind::UrlAssigned {
                    item_id: item.id,
                    url: item.url.clone(),
                },
            )
            .await;
        }
        Ok(outcome)
    }

    /// Delete the actor's lease and count the completion.
    pub async fn complete_item(&self, actor: &Actor, id: ItemId) -> Result<()> {
        actor.require(Capability::Upload)?;
        validate_transition(ItemStatus::Assigned, ItemStatus::Completed)?;
        let mut tx = self.pool.begin().await?;

        let url: Option<(String,)> = sqlx::query_as(
            "DELETE FROM queue_items
             WHERE id = $1 AND assigned_to = $2 AND status = 'assigned'
             RETURNING url",
        )
        .bind(id.0)
        .bind(actor.id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((url,)) = url else {
            return Err(Error::NotOwned {
                item: id,
                actor: actor.id,
            });
        };

        sqlx::query(
            "INSERT INTO queue_completions (day, count) VALUES ($1, 1)
             ON CONFLICT (day) DO UPDATE SET count = queue_completions.count + 1",
        )
        .bind(today())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        transition_metric(ItemStatus::Assigned, ItemStatus::Completed);
        self.emit(actor.id, ActivityKind::UrlCompleted { item_id: id, url })
            .await;
        Ok(())
    }

    /// Return the actor's lease to the pool.
    pub async fn release_item(&self, actor: &Actor, id: ItemId) -> Result<()> {
        actor.require(Capability::Upload)?;
        validate_transition(ItemStatus::Assigned, ItemStatus::Available)?;

        let url: Option<(String,)> = sqlx::query_as(
            "UPDATE queue_items
             SET status = 'available', assigned_to = NULL, assigned_at = NULL
             WHERE id = $1 AND assigned_to = $2 AND status = 'assigned'
             RETURNING url",
        )
        .bind(id.0)
        .bind(actor.id.0)
        .fetch_optional(&self.pool)
        .await?;
        let Some((url,)) = url else {
            return Err(Error::NotOwned {
                item: id,
                actor: actor.id,
            });
        };

        transition_metric(ItemStatus::Assigned, ItemStatus::Available);
        self.emit(actor.id, ActivityKind::UrlReleased { item_id: id, url })
            .await;
        Ok(())
    }

    /// The actor's current lease, if any.
    pub async fn current_assignment(&self, actor: &Actor) -> Result<Option<WorkItem>> {
        actor.require(Capability::Upload)?;
        let row: Option<QueueItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM queue_items
             WHERE assigned_to = $1 AND status = 'assigned'"
        ))
        .bind(actor.id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(QueueItemRow::try_into_work_item).transpose()
    }

    /// Get a queue row by ID. Either capability may read it.
    pub async fn get_item(&self, actor: &Actor, id: ItemId) -> Result<WorkItem> {
        if !actor.can_manage {
            actor.require(Capability::Upload)?;
        }
        let row: Option<QueueItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM queue_items WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("queue item {id}")))?
            .try_into_work_item()
    }

    /// Rows in FIFO order, optionally filtered by status.
    pub async fn list_items(
        &self,
        actor: &Actor,
        status: Option<ItemStatus>,
        limit: u32,
    ) -> Result<Vec<WorkItem>> {
        actor.require(Capability::Manage)?;
        let rows: Vec<QueueItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM queue_items
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at ASC, id ASC
             LIMIT $2"
        ))
        .bind(status.map(|s| s.to_string()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(QueueItemRow::try_into_work_item)
            .collect()
    }

    pub async fn stats(&self, actor: &Actor) -> Result<QueueStats> {
        if !actor.can_manage {
            actor.require(Capability::Upload)?;
        }
        let (total, available, assigned): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*),
                    COUNT(*) FILTER (WHERE status = 'available'),
                    COUNT(*) FILTER (WHERE status = 'assigned')
             FROM queue_items",
        )
        .fetch_one(&self.pool)
        .await?;
        let completed: Option<(i64,)> =
            sqlx::query_as("SELECT count FROM queue_completions WHERE day = $1")
                .bind(today())
                .fetch_optional(&self.pool)
                .await?;

        Ok(QueueStats {
            total: total as u64,
            available: available as u64,
            assigned: assigned as u64,
            completed_today: completed.map_or(0, |(n,)| n as u64),
            lease_minutes: self.lease().await?.minutes(),
        })
    }

    pub async fn clear(&self, actor: &Actor, scope: ClearScope) -> Result<u64> {
        actor.require(Capability::Manage)?;
        let sql = match scope {
            ClearScope::All => "DELETE FROM queue_items",
            ClearScope::Completed => "DELETE FROM queue_items WHERE status = 'completed'",
            ClearScope::Unassigned => "DELETE FROM queue_items WHERE status = 'available'",
        };
        let removed = sqlx::query(sql).execute(&self.pool).await?.rows_affected();

        tracing::info!(scope = %scope, removed, "queue cleared");
        self.emit(actor.id, ActivityKind::QueueCleared { scope, removed })
            .await;
        Ok(removed)
    }

    pub async fn set_lease_minutes(&self, actor: &Actor, minutes: i64) -> Result<LeaseDuration> {
        actor.require(Capability::Manage)?;
        let lease = LeaseDuration::from_minutes(minutes)?;
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(LEASE_MINUTES_KEY)
        .bind(lease.minutes().to_string())
        .execute(&self.pool)
        .await?;

        self.emit(
            actor.id,
            ActivityKind::LeaseUpdated {
                lease_minutes: lease.minutes(),
            },
        )
        .await;
        Ok(lease)
    }

    /// Effective lease, read fresh from settings.
    pub async fn lease(&self) -> Result<LeaseDuration> {
        let stored: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = $1")
            .bind(LEASE_MINUTES_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(LeaseDuration::from_stored(
            stored.as_ref().map(|(v,)| v.as_str()),
            self.default_lease,
        ))
    }

    async fn lease_in(&self, tx: &mut Transaction<'_, Postgres>) -> Result<LeaseDuration> {
        let stored: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = $1")
            .bind(LEASE_MINUTES_KEY)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(LeaseDuration::from_stored(
            stored.as_ref().map(|(v,)| v.as_str()),
            self.default_lease,
        ))
    }
}

fn qualified_columns(alias: &str) -> String {
    ITEM_COLUMNS
        .split(", ")
        .map(|col| format!("{alias}.{col}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct QueueItemRow {
    id: i64,
    url: String,
    status: String,
    created_at: DateTime<Utc>,
    created_by: i64,
    assigned_to: Option<i64>,
    assigned_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl QueueItemRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            id: ItemId(self.id),
            url: self.url,
            status: self.status.parse()?,
            created_at: self.created_at,
            created_by: ActorId(self.created_by),
            assigned_to: self.assigned_to.map(ActorId),
            assigned_at: self.assigned_at,
            completed_at: self.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returning_clause_is_alias_qualified() {
        let cols = qualified_columns("q");
        assert!(cols.starts_with("q.id, q.url, q.status"));
        assert!(cols.ends_with("q.completed_at"));
    }
}
