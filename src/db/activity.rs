//! Activity log in Postgres.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;

use crate::audit::{Activity, ActivityKind, RecordedActivity};
use crate::error::Result;
use crate::model::ActorId;
use crate::telemetry::metrics;

impl super::Db {
    /// Append an activity. Returns its sequence number.
    pub async fn record_activity(&self, activity: &Activity) -> Result<u64> {
        let seq: (i64,) = sqlx::query_as(
            "INSERT INTO activity_log (actor_id, action, metadata, created_at)
             VALUES ($1, $2, $3, $4)
             RETURNING seq",
        )
        .bind(activity.actor_id.0)
        .bind(activity.action())
        .bind(activity.metadata())
        .bind(activity.timestamp)
        .fetch_one(&self.pool)
        .await?;
        Ok(seq.0 as u64)
    }

    /// Get activities since a sequence number.
    pub async fn activities_since(&self, since_seq: u64) -> Result<Vec<RecordedActivity>> {
        let rows: Vec<(i64, i64, String, serde_json::Value, DateTime<Utc>)> = sqlx::query_as(
            "SELECT seq, actor_id, action, metadata, created_at
             FROM activity_log WHERE seq > $1 ORDER BY seq ASC",
        )
        .bind(since_seq as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(seq, actor_id, action, metadata, created_at)| RecordedActivity {
                seq: seq as u64,
                actor_id: ActorId(actor_id),
                action,
                metadata,
                created_at,
            })
            .collect())
    }

    /// Record after commit; a failure is logged and counted, never returned.
    pub(crate) async fn emit(&self, actor: ActorId, kind: ActivityKind) {
        let activity = Activity::new(actor, kind);
        if let Err(e) = self.record_activity(&activity).await {
            metrics::audit_failures().add(1, &[KeyValue::new("action", activity.action())]);
            tracing::warn!(
                action = activity.action(),
                actor = %actor,
                error = %e,
                "activity record dropped"
            );
        }
    }
}
