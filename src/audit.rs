//! Activity records emitted after every state-changing operation.
//!
//! The activity trail belongs to an external analytics collaborator. Emission
//! is fire-and-forget: a sink failure is logged and counted, never allowed to
//! undo the operation that produced it.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{ActorId, ClearScope, EnqueueMode, ItemId};
use crate::storage::Storage;
use crate::telemetry::metrics;

/// One entry for the activity trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub actor_id: ActorId,
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
}

impl Activity {
    pub fn new(actor_id: ActorId, kind: ActivityKind) -> Self {
        Self {
            actor_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// The action name stored alongside the metadata.
    pub fn action(&self) -> &'static str {
        self.kind.action()
    }

    /// Metadata as JSON, tagged with the action name.
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::to_value(&self.kind).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActivityKind {
    UrlsEnqueued {
        mode: EnqueueMode,
        accepted: u64,
        rejected: u64,
        duplicates: u64,
        replaced: u64,
    },
    QueueCleared {
        scope: ClearScope,
        removed: u64,
    },
    UrlAssigned {
        item_id: ItemId,
        url: String,
    },
    UrlCompleted {
        item_id: ItemId,
        url: String,
    },
    UrlReleased {
        item_id: ItemId,
        url: String,
    },
    LeasesReclaimed {
        count: u64,
        lease_minutes: u32,
    },
    LeaseUpdated {
        lease_minutes: u32,
    },
    SkuGenerated {
        sku: String,
        product_name: String,
        variant_name: String,
        variant_value: String,
        collisions: u32,
    },
}

impl ActivityKind {
    pub fn action(&self) -> &'static str {
        match self {
            ActivityKind::UrlsEnqueued { .. } => "urls_enqueued",
            ActivityKind::QueueCleared { .. } => "queue_cleared",
            ActivityKind::UrlAssigned { .. } => "url_assigned",
            ActivityKind::UrlCompleted { .. } => "url_completed",
            ActivityKind::UrlReleased { .. } => "url_released",
            ActivityKind::LeasesReclaimed { .. } => "leases_reclaimed",
            ActivityKind::LeaseUpdated { .. } => "lease_updated",
            ActivityKind::SkuGenerated { .. } => "sku_generated",
        }
    }
}

/// An activity read back from an append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedActivity {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    pub actor_id: ActorId,
    pub action: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Destination for activity records.
pub trait AuditSink: Send + Sync {
    fn record(&self, activity: &Activity) -> Result<()>;
}

/// Hand an activity to `sink`, swallowing and reporting any failure.
pub fn emit(sink: &dyn AuditSink, activity: Activity) {
    if let Err(e) = sink.record(&activity) {
        metrics::audit_failures().add(
            1,
            &[opentelemetry::KeyValue::new("action", activity.action())],
        );
        tracing::warn!(
            action = activity.action(),
            actor = %activity.actor_id,
            error = %e,
            "activity record dropped"
        );
    }
}

/// Writes activities as structured log events only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, activity: &Activity) -> Result<()> {
        tracing::info!(
            target: "uploadq::activity",
            action = activity.action(),
            actor = %activity.actor_id,
            metadata = %activity.metadata(),
            "activity"
        );
        Ok(())
    }
}

/// Append-only activity table in its own SQLite connection.
pub struct SqliteActivityLog {
    storage: Mutex<Storage>,
}

impl SqliteActivityLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            storage: Mutex::new(Storage::open(path)?),
        })
    }

    /// In-memory log (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            storage: Mutex::new(Storage::in_memory()?),
        })
    }

    /// Activities with a sequence number greater than `since_seq`.
    pub fn activities_since(&self, since_seq: u64) -> Result<Vec<RecordedActivity>> {
        self.storage
            .lock()
            .map_err(|_| Error::Other("activity log lock poisoned".to_string()))?
            .activities_since(since_seq)
    }
}

impl AuditSink for SqliteActivityLog {
    fn record(&self, activity: &Activity) -> Result<()> {
        let mut storage = self
            .storage
            .lock()
            .map_err(|_| Error::Audit("activity log lock poisoned".to_string()))?;
        storage
            .append_activity(activity)
            .map(|_| ())
            .map_err(|e| Error::Audit(e.to_string()))
    }
}
