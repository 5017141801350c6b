//! Core data model.
//!
//! A work item is one sourcing URL waiting for someone to upload the product
//! behind it. Items are handed out under time-boxed leases, one per actor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Queue row identifier. Monotonic, so it also breaks FIFO ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub i64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated user id supplied by the hosting platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub i64);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capabilities the hosting platform grants a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Bulk import, clear, lease settings.
    Manage,
    /// Request, complete and release work.
    Upload,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Capability::Manage => "manage",
            Capability::Upload => "upload",
        };
        write!(f, "{s}")
    }
}

/// A pre-authenticated caller. The core trusts these flags as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub can_manage: bool,
    pub can_upload: bool,
}

impl Actor {
    pub fn uploader(id: i64) -> Self {
        Self {
            id: ActorId(id),
            can_manage: false,
            can_upload: true,
        }
    }

    pub fn manager(id: i64) -> Self {
        Self {
            id: ActorId(id),
            can_manage: true,
            can_upload: false,
        }
    }

    /// Both capabilities. Used by the operator CLI.
    pub fn operator(id: i64) -> Self {
        Self {
            id: ActorId(id),
            can_manage: true,
            can_upload: true,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Manage => self.can_manage,
            Capability::Upload => self.can_upload,
        }
    }

    /// Fail with [`Error::Permission`] unless the actor holds `capability`.
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.has(capability) {
            Ok(())
        } else {
            Err(Error::Permission {
                actor: self.id,
                capability,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// One queued sourcing URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    /// Normalized URL, unique across live rows.
    pub url: String,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub created_by: ActorId,
    /// Set iff `status == Assigned`.
    pub assigned_to: Option<ActorId>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// Has this lease run its full `lease` as of `now`?
    pub fn lease_expired(&self, now: DateTime<Utc>, lease: LeaseDuration) -> bool {
        match (self.status, self.assigned_at) {
            (ItemStatus::Assigned, Some(at)) => at <= now - lease.as_chrono(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for an uploader.
    Available,
    /// Leased to exactly one actor.
    Assigned,
    /// Never persisted today: completion deletes the row.
    Completed,
}

impl ItemStatus {
    pub fn can_transition_to(self, to: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, to),
            (Available, Assigned)
                | (Assigned, Available) // release or expiry
                | (Assigned, Completed)
        )
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Available => "available",
            ItemStatus::Assigned => "assigned",
            ItemStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "available" => Ok(ItemStatus::Available),
            "assigned" => Ok(ItemStatus::Assigned),
            "completed" => Ok(ItemStatus::Completed),
            _ => Err(Error::Other(format!("unknown item status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Operation inputs and outputs
// ---------------------------------------------------------------------------

/// How a bulk import treats the rows already queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueMode {
    /// Drop every unassigned row first.
    Replace,
    Append,
}

/// Outcome of a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueReport {
    pub accepted: u64,
    /// Malformed or outside the domain allow-list.
    pub rejected: u64,
    /// Already queued, or repeated within the batch.
    pub duplicates: u64,
    /// Unassigned rows dropped by replace mode.
    pub replaced: u64,
}

/// What `request_item` handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A fresh lease on the oldest available item.
    Assigned(WorkItem),
    /// The actor already held this lease; returned unchanged.
    Existing(WorkItem),
    /// Nothing to hand out right now.
    NotAvailable,
}

impl RequestOutcome {
    pub fn item(&self) -> Option<&WorkItem> {
        match self {
            RequestOutcome::Assigned(item) | RequestOutcome::Existing(item) => Some(item),
            RequestOutcome::NotAvailable => None,
        }
    }

    pub fn into_item(self) -> Option<WorkItem> {
        match self {
            RequestOutcome::Assigned(item) | RequestOutcome::Existing(item) => Some(item),
            RequestOutcome::NotAvailable => None,
        }
    }
}

/// Aggregate counts for dashboards. Not used for decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: u64,
    pub available: u64,
    pub assigned: u64,
    /// Completions since midnight UTC.
    pub completed_today: u64,
    pub lease_minutes: u32,
}

/// Which rows an administrative clear removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearScope {
    All,
    /// Always empty while completion deletes rows.
    Completed,
    Unassigned,
}

impl std::fmt::Display for ClearScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClearScope::All => "all",
            ClearScope::Completed => "completed",
            ClearScope::Unassigned => "unassigned",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ClearScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(ClearScope::All),
            "completed" => Ok(ClearScope::Completed),
            "unassigned" => Ok(ClearScope::Unassigned),
            _ => Err(Error::Validation(format!("unknown clear scope: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// How long an assigned item may stay uncompleted before reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseDuration(u32);

impl LeaseDuration {
    pub const MIN_MINUTES: u32 = 5;
    pub const MAX_MINUTES: u32 = 1440;
    pub const DEFAULT_MINUTES: u32 = 60;

    /// Strict constructor for values an admin is setting.
    pub fn from_minutes(minutes: i64) -> Result<Self> {
        if (i64::from(Self::MIN_MINUTES)..=i64::from(Self::MAX_MINUTES)).contains(&minutes) {
            Ok(Self(minutes as u32))
        } else {
            Err(Error::Validation(format!(
                "lease duration must be between {} and {} minutes, got {minutes}",
                Self::MIN_MINUTES,
                Self::MAX_MINUTES
            )))
        }
    }

    /// Lenient reading of a stored setting: garbage falls back to `default`,
    /// out-of-range numbers are clamped.
    pub fn from_stored(raw: Option<&str>, default: LeaseDuration) -> Self {
        match raw.and_then(|s| s.trim().parse::<i64>().ok()) {
            Some(minutes) => Self(
                minutes.clamp(i64::from(Self::MIN_MINUTES), i64::from(Self::MAX_MINUTES)) as u32,
            ),
            None => default,
        }
    }

    pub fn minutes(self) -> u32 {
        self.0
    }

    pub fn as_chrono(self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.0))
    }
}

impl Default for LeaseDuration {
    fn default() -> Self {
        Self(Self::DEFAULT_MINUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_bounds_are_inclusive() {
        assert!(LeaseDuration::from_minutes(5).is_ok());
        assert!(LeaseDuration::from_minutes(1440).is_ok());
        assert!(LeaseDuration::from_minutes(4).is_err());
        assert!(LeaseDuration::from_minutes(1441).is_err());
    }

    #[test]
    fn stored_lease_is_clamped_or_defaulted() {
        let default = LeaseDuration::default();
        assert_eq!(LeaseDuration::from_stored(Some("2"), default).minutes(), 5);
        assert_eq!(LeaseDuration::from_stored(Some("9999"), default).minutes(), 1440);
        assert_eq!(LeaseDuration::from_stored(Some(" 90 "), default).minutes(), 90);
        assert_eq!(LeaseDuration::from_stored(Some("soon"), default).minutes(), 60);
        assert_eq!(LeaseDuration::from_stored(None, default).minutes(), 60);
    }

    #[test]
    fn completed_is_reachable_only_from_assigned() {
        assert!(ItemStatus::Assigned.can_transition_to(ItemStatus::Completed));
        assert!(!ItemStatus::Available.can_transition_to(ItemStatus::Completed));
        assert!(!ItemStatus::Completed.can_transition_to(ItemStatus::Available));
    }

    #[test]
    fn actor_without_capability_is_refused() {
        let actor = Actor::uploader(7);
        assert!(actor.require(Capability::Upload).is_ok());
        assert!(matches!(
            actor.require(Capability::Manage),
            Err(Error::Permission {
                capability: Capability::Manage,
                ..
            })
        ));
    }
}
