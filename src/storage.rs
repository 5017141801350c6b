//! SQLite storage layer.
//!
//! Single source of truth for the embedded deployment: queue rows, lease
//! settings, daily completion counters, the SKU history and the activity log.
//! WAL mode for concurrent readers. Every mutation runs inside
//! `BEGIN IMMEDIATE`, so processes sharing one database file serialize their
//! writers and a select-then-update never interleaves with another writer.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::audit::{Activity, RecordedActivity};
use crate::error::{Error, Result};
use crate::model::*;
use crate::sku::SkuEntry;

/// Settings key holding the lease duration in minutes.
pub const LEASE_MINUTES_KEY: &str = "lease_minutes";

const ITEM_COLUMNS: &str =
    "id, url, status, created_at, created_by, assigned_to, assigned_at, completed_at";

/// Storage backend. Owns the SQLite connection.
pub struct Storage {
    conn: Connection,
}

/// Handle for performing storage operations within a transaction.
///
/// Methods execute against the transaction's connection, so everything done
/// through one context commits together or not at all.
pub(crate) struct TxContext<'a> {
    tx: &'a Connection,
}

impl TxContext<'_> {
    /// Insert an available row. Returns false if the URL is already queued.
    pub fn insert_item(&self, url: &str, created_by: ActorId, now: DateTime<Utc>) -> Result<bool> {
        let inserted = self.tx.execute(
            "INSERT INTO queue_items (url, status, created_at, created_by)
             VALUES (?1, 'available', ?2, ?3)
             ON CONFLICT(url) DO NOTHING",
            params![url, encode_ts(now), created_by.0],
        )?;
        Ok(inserted == 1)
    }

    pub fn delete_unassigned(&self) -> Result<u64> {
        let removed = self
            .tx
            .execute("DELETE FROM queue_items WHERE status = 'available'", [])?;
        Ok(removed as u64)
    }

    /// Reset every lease stamped at or before `cutoff`. Guarded by status, so a
    /// second pass over the same rows changes nothing.
    pub fn reclaim_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let reclaimed = self.tx.execute(
            "UPDATE queue_items
             SET status = 'available', assigned_to = NULL, assigned_at = NULL
             WHERE status = 'assigned' AND assigned_at <= ?1",
            params![encode_ts(cutoff)],
        )?;
        Ok(reclaimed as u64)
    }

    pub fn assignment_of(&self, actor: ActorId) -> Result<Option<WorkItem>> {
        assignment_of_on(self.tx, actor)
    }

    pub fn oldest_available(&self) -> Result<Option<WorkItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM queue_items
             WHERE status = 'available'
             ORDER BY created_at ASC, id ASC
             LIMIT 1"
        );
        Ok(self.tx.query_row(&sql, [], row_to_work_item).optional()?)
    }

    /// Compare-and-swap Available -> Assigned. False if the row moved on.
    pub fn assign(&self, id: ItemId, actor: ActorId, now: DateTime<Utc>) -> Result<bool> {
        let updated = self.tx.execute(
            "UPDATE queue_items
             SET status = 'assigned', assigned_to = ?1, assigned_at = ?2
             WHERE id = ?3 AND status = 'available'",
            params![actor.0, encode_ts(now), id.0],
        )?;
        Ok(updated == 1)
    }

    pub fn get_item(&self, id: ItemId) -> Result<Option<WorkItem>> {
        get_item_on(self.tx, id)
    }

    /// The row, if it is currently leased to `actor`.
    pub fn owned_item(&self, id: ItemId, actor: ActorId) -> Result<Option<WorkItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM queue_items
             WHERE id = ?1 AND assigned_to = ?2 AND status = 'assigned'"
        );
        Ok(self
            .tx
            .query_row(&sql, params![id.0, actor.0], row_to_work_item)
            .optional()?)
    }

    pub fn delete_item(&self, id: ItemId) -> Result<()> {
        self.tx
            .execute("DELETE FROM queue_items WHERE id = ?1", params![id.0])?;
        Ok(())
    }

    pub fn release_item(&self, id: ItemId) -> Result<()> {
        self.tx.execute(
            "UPDATE queue_items
             SET status = 'available', assigned_to = NULL, assigned_at = NULL
             WHERE id = ?1",
            params![id.0],
        )?;
        Ok(())
    }

    pub fn bump_completions(&self, now: DateTime<Utc>) -> Result<()> {
        self.tx.execute(
            "INSERT INTO queue_completions (day, count) VALUES (?1, 1)
             ON CONFLICT(day) DO UPDATE SET count = count + 1",
            params![day_key(now)],
        )?;
        Ok(())
    }

    pub fn clear(&self, scope: ClearScope) -> Result<u64> {
        let sql = match scope {
            ClearScope::All => "DELETE FROM queue_items",
            ClearScope::Completed => "DELETE FROM queue_items WHERE status = 'completed'",
            ClearScope::Unassigned => "DELETE FROM queue_items WHERE status = 'available'",
        };
        Ok(self.tx.execute(sql, [])? as u64)
    }

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        setting_on(self.tx, key)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        set_setting_on(self.tx, key, value)
    }
}

impl Storage {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    fn init(&mut self) -> Result<()> {
        // WAL mode for concurrent readers; the pragma answers with a row.
        self.conn
            .query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
        self.conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        self.conn.busy_timeout(Duration::from_secs(5))?;

        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS queue_items (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                url             TEXT NOT NULL UNIQUE,
                status          TEXT NOT NULL DEFAULT 'available'
                                CHECK (status IN ('available', 'assigned', 'completed')),
                created_at      TEXT NOT NULL,
                created_by      INTEGER NOT NULL,
                assigned_to     INTEGER,
                assigned_at     TEXT,
                completed_at    TEXT,
                CHECK ((status = 'assigned') = (assigned_to IS NOT NULL))
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_one_lease_per_actor
                ON queue_items(assigned_to) WHERE status = 'assigned';
            CREATE INDEX IF NOT EXISTS idx_available
                ON queue_items(created_at ASC, id ASC) WHERE status = 'available';
            CREATE INDEX IF NOT EXISTS idx_assigned_at
                ON queue_items(assigned_at) WHERE status = 'assigned';

            CREATE TABLE IF NOT EXISTS settings (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS queue_completions (
                day         TEXT PRIMARY KEY,
                count       INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS sku_log (
                sku             TEXT PRIMARY KEY,
                product_name    TEXT NOT NULL,
                variant_name    TEXT NOT NULL,
                variant_value   TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS activity_log (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                actor_id    INTEGER NOT NULL,
                action      TEXT NOT NULL,
                metadata    TEXT NOT NULL DEFAULT '{}',
                created_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_activity_action ON activity_log(action, created_at);
            ",
        )?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Execute a closure within an immediate-mode SQLite transaction.
    ///
    /// The write lock is taken at BEGIN. The transaction commits if the
    /// closure returns Ok and rolls back on Err.
    pub(crate) fn with_transaction<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TxContext) -> Result<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut ctx = TxContext { tx: &tx };
        let result = f(&mut ctx)?;
        tx.commit()?;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Queue reads
    // -----------------------------------------------------------------------

    pub fn get_item(&self, id: ItemId) -> Result<Option<WorkItem>> {
        get_item_on(&self.conn, id)
    }

    pub fn assignment_of(&self, actor: ActorId) -> Result<Option<WorkItem>> {
        assignment_of_on(&self.conn, actor)
    }

    /// List rows in FIFO order, optionally filtered by status.
    pub fn list_items(&self, status: Option<ItemStatus>, limit: u32) -> Result<Vec<WorkItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM queue_items
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at ASC, id ASC
             LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map(
                params![status.map(|s| s.to_string()), limit],
                row_to_work_item,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// (total, available, assigned)
    pub fn counts(&self) -> Result<(u64, u64, u64)> {
        let (total, available, assigned): (i64, i64, i64) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'available'), 0),
                    COALESCE(SUM(status = 'assigned'), 0)
             FROM queue_items",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok((total as u64, available as u64, assigned as u64))
    }

    pub fn completions_on(&self, now: DateTime<Utc>) -> Result<u64> {
        let count: Option<i64> = self
            .conn
            .query_row(
                "SELECT count FROM queue_completions WHERE day = ?1",
                params![day_key(now)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0) as u64)
    }

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        setting_on(&self.conn, key)
    }

    // -----------------------------------------------------------------------
    // SKU history
    // -----------------------------------------------------------------------

    /// Insert-if-absent on the SKU history. False when the value is taken.
    pub fn try_record_sku(&mut self, entry: &SkuEntry<'_>) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO sku_log (sku, product_name, variant_name, variant_value, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(sku) DO NOTHING",
            params![
                entry.sku,
                entry.product_name,
                entry.variant_name,
                entry.variant_value,
                encode_ts(Utc::now()),
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn sku_exists(&self, sku: &str) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sku_log WHERE sku = ?1)",
            params![sku],
            |row| row.get(0),
        )?)
    }

    // -----------------------------------------------------------------------
    // Activity log
    // -----------------------------------------------------------------------

    /// Append an activity and return its sequence number.
    pub fn append_activity(&mut self, activity: &Activity) -> Result<u64> {
        self.conn.execute(
            "INSERT INTO activity_log (actor_id, action, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                activity.actor_id.0,
                activity.action(),
                activity.metadata().to_string(),
                encode_ts(activity.timestamp),
            ],
        )?;
        Ok(self.conn.last_insert_rowid() as u64)
    }

    /// Get activities since a sequence number.
    pub fn activities_since(&self, since_seq: u64) -> Result<Vec<RecordedActivity>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, actor_id, action, metadata, created_at
             FROM activity_log WHERE seq > ?1 ORDER BY seq ASC",
        )?;

        let activities = stmt
            .query_map(params![since_seq as i64], |row| {
                let metadata: String = row.get(3)?;
                Ok(RecordedActivity {
                    seq: row.get::<_, i64>(0)? as u64,
                    actor_id: ActorId(row.get(1)?),
                    action: row.get(2)?,
                    metadata: serde_json::from_str(&metadata)
                        .unwrap_or(serde_json::Value::String(metadata)),
                    created_at: decode_ts(4, &row.get::<_, String>(4)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(activities)
    }

    /// Write a setting outside any larger transaction.
    pub fn set_setting(&mut self, key: &str, value: &str) -> Result<()> {
        self.with_transaction(|ctx| ctx.set_setting(key, value))
    }
}

// ---------------------------------------------------------------------------
// Inner functions accept &Connection so they work with both
// Connection (auto-commit) and Transaction (deref to Connection).
// ---------------------------------------------------------------------------

fn get_item_on(conn: &Connection, id: ItemId) -> Result<Option<WorkItem>> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM queue_items WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.0], row_to_work_item)
        .optional()?)
}

fn assignment_of_on(conn: &Connection, actor: ActorId) -> Result<Option<WorkItem>> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM queue_items
         WHERE assigned_to = ?1 AND status = 'assigned'"
    );
    Ok(conn
        .query_row(&sql, params![actor.0], row_to_work_item)
        .optional()?)
}

fn setting_on(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

fn set_setting_on(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row parsing helpers
// ---------------------------------------------------------------------------

fn row_to_work_item(row: &rusqlite::Row) -> rusqlite::Result<WorkItem> {
    let status: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    let assigned_at: Option<String> = row.get(6)?;
    let completed_at: Option<String> = row.get(7)?;

    Ok(WorkItem {
        id: ItemId(row.get(0)?),
        url: row.get(1)?,
        status: status
            .parse()
            .map_err(|e: Error| conversion_failure(2, e))?,
        created_at: decode_ts(3, &created_at)?,
        created_by: ActorId(row.get(4)?),
        assigned_to: row.get::<_, Option<i64>>(5)?.map(ActorId),
        assigned_at: assigned_at.map(|s| decode_ts(6, &s)).transpose()?,
        completed_at: completed_at.map(|s| decode_ts(7, &s)).transpose()?,
    })
}

fn conversion_failure<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

/// Fixed-width UTC timestamps, so string order is time order in SQL.
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_failure(idx, e))
}

fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn encoded_timestamps_sort_chronologically() {
        let early = encode_ts(ts("2026-01-02T03:04:05Z"));
        let late = encode_ts(ts("2026-01-02T03:04:05.5Z"));
        assert!(early < late);
        assert_eq!(early.len(), late.len());
    }

    #[test]
    fn schema_rejects_second_lease_for_same_actor() {
        let mut storage = Storage::in_memory().unwrap();
        let now = ts("2026-03-01T10:00:00Z");
        let result = storage.with_transaction(|ctx| {
            ctx.insert_item("http://alibaba.com/a", ActorId(1), now)?;
            ctx.insert_item("http://alibaba.com/b", ActorId(1), now)?;
            ctx.assign(ItemId(1), ActorId(5), now)?;
            ctx.assign(ItemId(2), ActorId(5), now)
        });
        assert!(matches!(result, Err(Error::Storage(_))));
        // The failed transaction rolled back both inserts.
        assert_eq!(storage.counts().unwrap(), (0, 0, 0));
    }

    #[test]
    fn reclaim_is_idempotent() {
        let mut storage = Storage::in_memory().unwrap();
        let assigned = ts("2026-03-01T10:00:00Z");
        storage
            .with_transaction(|ctx| {
                ctx.insert_item("http://alibaba.com/a", ActorId(1), assigned)?;
                ctx.assign(ItemId(1), ActorId(2), assigned)
            })
            .unwrap();

        let cutoff = assigned;
        let first = storage
            .with_transaction(|ctx| ctx.reclaim_expired(cutoff))
            .unwrap();
        let second = storage
            .with_transaction(|ctx| ctx.reclaim_expired(cutoff))
            .unwrap();
        assert_eq!((first, second), (1, 0));

        let item = storage.get_item(ItemId(1)).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Available);
        assert_eq!(item.assigned_to, None);
    }

    #[test]
    fn sku_history_is_insert_if_absent() {
        let mut storage = Storage::in_memory().unwrap();
        let entry = SkuEntry {
            sku: "TUM-SS-2603ABC",
            product_name: "tumbler",
            variant_name: "",
            variant_value: "",
        };
        assert!(storage.try_record_sku(&entry).unwrap());
        assert!(!storage.try_record_sku(&entry).unwrap());
        assert!(storage.sku_exists("TUM-SS-2603ABC").unwrap());
        assert!(!storage.sku_exists("TUM-SS-2603ABC-1").unwrap());
    }
}
