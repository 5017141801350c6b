//! URL work queue. The public API for handing out and settling work.
//!
//! The queue owns the storage handle and the audit sink. All state
//! transitions go through here and each one runs in a single write
//! transaction, so concurrent callers can never both win the same item.
//! Expired leases are reclaimed lazily at the start of every request.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;

use crate::audit::{self, Activity, ActivityKind, AuditSink, TracingSink};
use crate::error::{Error, Result};
use crate::model::*;
use crate::storage::{LEASE_MINUTES_KEY, Storage};
use crate::telemetry::metrics;
use crate::telemetry::queue::{record_state_transition, start_queue_span};
use crate::urls::partition_batch;

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The work queue. Cheap to share behind an `Arc`.
pub struct Queue {
    storage: Mutex<Storage>,
    audit: Arc<dyn AuditSink>,
    default_lease: LeaseDuration,
    clock: Clock,
}

/// Validate a state transition, returning an error if disallowed.
pub(crate) fn validate_transition(from: ItemStatus, to: ItemStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

fn observe(operation: &'static str, started: Instant) {
    metrics::operation_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", operation)],
    );
}

pub(crate) fn transition_metric(from: ItemStatus, to: ItemStatus) {
    metrics::queue_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}

/// Metrics and a log line for a finished import.
pub(crate) fn report_enqueue(mode: EnqueueMode, report: &EnqueueReport) {
    let mode_label = match mode {
        EnqueueMode::Replace => "replace",
        EnqueueMode::Append => "append",
    };
    for (result, count) in [
        ("accepted", report.accepted),
        ("rejected", report.rejected),
        ("duplicate", report.duplicates),
    ] {
        if count > 0 {
            metrics::urls_enqueued().add(
                count,
                &[KeyValue::new("mode", mode_label), KeyValue::new("result", result)],
            );
        }
    }

    tracing::info!(
        accepted = report.accepted,
        rejected = report.rejected,
        duplicates = report.duplicates,
        replaced = report.replaced,
        mode = mode_label,
        "urls enqueued"
    );
}

impl Queue {
    pub fn new(storage: Storage, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            storage: Mutex::new(storage),
            audit,
            default_lease: LeaseDuration::default(),
            clock: Box::new(Utc::now),
        }
    }

    /// Create a queue with in-memory storage (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Storage::in_memory()?, Arc::new(TracingSink)))
    }

    /// Create a queue backed by a file. Several queues, in this process or
    /// others, may open the same file.
    pub fn open(path: impl AsRef<std::path::Path>, audit: Arc<dyn AuditSink>) -> Result<Self> {
        Ok(Self::new(Storage::open(path)?, audit))
    }

    /// Lease used while no value is stored in settings.
    pub fn with_default_lease(mut self, lease: LeaseDuration) -> Self {
        self.default_lease = lease;
        self
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn storage(&self) -> Result<MutexGuard<'_, Storage>> {
        self.storage
            .lock()
            .map_err(|_| Error::Other("queue storage lock poisoned".to_string()))
    }

    fn emit(&self, actor: ActorId, kind: ActivityKind) {
        audit::emit(self.audit.as_ref(), Activity::new(actor, kind));
    }

    // -----------------------------------------------------------------------
    // Import and administration
    // -----------------------------------------------------------------------

    /// Bulk-import URLs. Invalid URLs are counted and skipped; duplicates of
    /// queued URLs (or of each other) are skipped silently. The insert batch
    /// commits atomically.
    pub fn enqueue<I, S>(&self, actor: &Actor, urls: I, mode: EnqueueMode) -> Result<EnqueueReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        actor.require(Capability::Manage)?;
        let started = Instant::now();
        let span = start_queue_span("enqueue", actor.id);
        let _enter = span.enter();

        let (valid, rejected) = partition_batch(urls)?;
        let mut report = EnqueueReport {
            rejected,
            ..EnqueueReport::default()
        };
        if valid.is_empty() {
            tracing::warn!(rejected, "no acceptable urls in batch");
            return Ok(report);
        }

        let now = self.now();
        let (accepted, duplicates, replaced) = self.storage()?.with_transaction(|ctx| {
            let replaced = match mode {
                EnqueueMode::Replace => ctx.delete_unassigned()?,
                EnqueueMode::Append => 0,
            };
            let mut seen = std::collections::HashSet::new();
            let (mut accepted, mut duplicates) = (0u64, 0u64);
            for url in &valid {
                if seen.insert(url.as_str()) && ctx.insert_item(url, actor.id, now)? {
                    accepted += 1;
                } else {
                    duplicates += 1;
                }
            }
            Ok((accepted, duplicates, replaced))
        })?;
        report.accepted = accepted;
        report.duplicates = duplicates;
        report.replaced = replaced;

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
        );
        observe("queue.enqueue", started);
        Ok(report)
    }

    /// Administrative bulk delete. Returns the number of rows removed.
    pub fn clear(&self, actor: &Actor, scope: ClearScope) -> Result<u64> {
        actor.require(Capability::Manage)?;
        let removed = self.storage()?.with_transaction(|ctx| ctx.clear(scope))?;

        tracing::info!(scope = %scope, removed, "queue cleared");
        self.emit(actor.id, ActivityKind::QueueCleared { scope, removed });
        Ok(removed)
    }

    /// Store a new lease duration. Takes effect on the next request.
    pub fn set_lease_minutes(&self, actor: &Actor, minutes: i64) -> Result<LeaseDuration> {
        actor.require(Capability::Manage)?;
        let lease = LeaseDuration::from_minutes(minutes)?;
        self.storage()?
            .set_setting(LEASE_MINUTES_KEY, &lease.minutes().to_string())?;

        tracing::info!(lease_minutes = lease.minutes(), "lease duration updated");
        self.emit(
            actor.id,
            ActivityKind::LeaseUpdated {
                lease_minutes: lease.minutes(),
            },
        );
        Ok(lease)
    }

    /// Effective lease, read fresh from settings.
    pub fn lease(&self) -> Result<LeaseDuration> {
        let stored = self.storage()?.setting(LEASE_MINUTES_KEY)?;
        Ok(LeaseDuration::from_stored(
            stored.as_deref(),
            self.default_lease,
        ))
    }

    /// Rows in FIFO order, optionally filtered by status.
    pub fn list(
        &self,
        actor: &Actor,
        status: Option<ItemStatus>,
        limit: u32,
    ) -> Result<Vec<WorkItem>> {
        actor.require(Capability::Manage)?;
        self.storage()?.list_items(status, limit)
    }

    /// Get a queue row by ID. Either capability may read it.
    pub fn get(&self, actor: &Actor, id: ItemId) -> Result<WorkItem> {
        if !actor.can_manage {
            actor.require(Capability::Upload)?;
        }
        self.storage()?
            .get_item(id)?
            .ok_or_else(|| Error::NotFound(format!("queue item {id}")))
    }

    /// Aggregate counts. Either capability may read them.
    pub fn stats(&self, actor: &Actor) -> Result<QueueStats> {
        if !actor.can_manage {
            actor.require(Capability::Upload)?;
        }
        let lease = self.lease()?;
        let storage = self.storage()?;
        let (total, available, assigned) = storage.counts()?;
        Ok(QueueStats {
            total,
            available,
            assigned,
            completed_today: storage.completions_on(self.now())?,
            lease_minutes: lease.minutes(),
        })
    }

    // -----------------------------------------------------------------------
    // Worker operations
    // -----------------------------------------------------------------------

    /// Hand the actor one item.
    ///
    /// Reclaims expired leases first, then returns the actor's existing lease
    /// if it has one, else assigns the oldest available item.
    pub fn request_item(&self, actor: &Actor) -> Result<RequestOutcome> {
        actor.require(Capability::Upload)?;
        let started = Instant::now();
        let span = start_queue_span("request", actor.id);
        let _enter = span.enter();

        let now = self.now();
        let (outcome, reclaimed, lease) = self.storage()?.with_transaction(|ctx| {
            let lease = LeaseDuration::from_stored(
                ctx.setting(LEASE_MINUTES_KEY)?.as_deref(),
                self.default_lease,
            );
            let reclaimed = ctx.reclaim_expired(now - lease.as_chrono())?;

            if let Some(item) = ctx.assignment_of(actor.id)? {
                return Ok((RequestOutcome::Existing(item), reclaimed, lease));
            }

            let Some(candidate) = ctx.oldest_available()? else {
                return Ok((RequestOutcome::NotAvailable, reclaimed, lease));
            };
            validate_transition(candidate.status, ItemStatus::Assigned)?;
            if !ctx.assign(candidate.id, actor.id, now)? {
                return Err(Error::InvalidTransition {
                    from: candidate.status,
                    to: ItemStatus::Assigned,
                });
            }
            let item = ctx
                .get_item(candidate.id)?
                .ok_or_else(|| Error::NotFound(format!("queue item {}", candidate.id)))?;
            Ok((RequestOutcome::Assigned(item), reclaimed, lease))
        })?;

        if reclaimed > 0 {
            metrics::leases_reclaimed().add(reclaimed, &[]);
            tracing::info!(
                count = reclaimed,
                lease_minutes = lease.minutes(),
                "expired leases reclaimed"
            );
            self.emit(
                actor.id,
                ActivityKind::LeasesReclaimed {
                    count: reclaimed,
                    lease_minutes: lease.minutes(),
                },
            );
        }

        match &outcome {
            RequestOutcome::Assigned(item) => {
                transition_metric(ItemStatus::Available, ItemStatus::Assigned);
                record_state_transition(&span, item.id.0, ItemStatus::Available, ItemStatus::Assigned);
                self.emit(
                    actor.id,
                    ActivityKind::UrlAssigned {
                        item_id: item.id,
                        url: item.url.clone(),
                    },
                );
            }
            RequestOutcome::Existing(item) => {
                tracing::debug!(item = %item.id, "returning existing lease");
            }
            RequestOutcome::NotAvailable => {
                tracing::debug!("no item available");
            }
        }

        observe("queue.request", started);
        Ok(outcome)
    }

    /// Finish the actor's lease. The row is deleted.
    pub fn complete_item(&self, actor: &Actor, id: ItemId) -> Result<()> {
        actor.require(Capability::Upload)?;
        let started = Instant::now();
        let span = start_queue_span("complete", actor.id);
        let _enter = span.enter();

        let now = self.now();
        let item = self.storage()?.with_transaction(|ctx| {
            let item = ctx.owned_item(id, actor.id)?.ok_or(Error::NotOwned {
                item: id,
                actor: actor.id,
            })?;
            validate_transition(item.status, ItemStatus::Completed)?;
            ctx.delete_item(id)?;
            ctx.bump_completions(now)?;
            Ok(item)
        })?;

        transition_metric(ItemStatus::Assigned, ItemStatus::Completed);
        record_state_transition(&span, id.0, ItemStatus::Assigned, ItemStatus::Completed);
        self.emit(
            actor.id,
            ActivityKind::UrlCompleted {
                item_id: id,
                url: item.url,
            },
        );
        observe("queue.complete", started);
        Ok(())
    }

    /// Give the actor's lease back to the pool.
    pub fn release_item(&self, actor: &Actor, id: ItemId) -> Result<()> {
        actor.require(Capability::Upload)?;
        let span = start_queue_span("release", actor.id);
        let _enter = span.enter();

        let item = self.storage()?.with_transaction(|ctx| {
            let item = ctx.owned_item(id, actor.id)?.ok_or(Error::NotOwned {
                item: id,
                actor: actor.id,
            })?;
            validate_transition(item.status, ItemStatus::Available)?;
            ctx.release_item(id)?;
            Ok(item)
        })?;

        transition_metric(ItemStatus::Assigned, ItemStatus::Available);
        record_state_transition(&span, id.0, ItemStatus::Assigned, ItemStatus::Available);
        self.emit(
            actor.id,
            ActivityKind::UrlReleased {
                item_id: id,
                url: item.url,
            },
        );
        Ok(())
    }

    /// The actor's current lease, if any. Read-only.
    pub fn current_assignment(&self, actor: &Actor) -> Result<Option<WorkItem>> {
        actor.require(Capability::Upload)?;
        self.storage()?.assignment_of(actor.id)
    }
}
