//! Local metadata store.
//!
//! A small SQLite database holds the bookkeeping the periodic tasks need:
//! queued deletions, pin (seal) records, and a generic timestamp
//! key/value used for task rate-limiting. Tasks perform row-level updates
//! only; no multi-row transactions are required.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

// ════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Status of a queued deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStatus {
    Pending,
    Done,
    Failed,
}

impl CleanupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CleanupStatus::Pending => "pending",
            CleanupStatus::Done => "done",
            CleanupStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> CleanupStatus {
        match s {
            "done" => CleanupStatus::Done,
            "failed" => CleanupStatus::Failed,
            _ => CleanupStatus::Pending,
        }
    }
}

/// Status of a pin (seal) record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinStatus {
    Sealing,
    Sealed,
    Failed,
}

impl PinStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PinStatus::Sealing => "sealing",
            PinStatus::Sealed => "sealed",
            PinStatus::Failed => "failed",
        }
    }
}

/// A queued deletion row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupRecord {
    pub id: i64,
    pub cid: String,
    pub status: CleanupStatus,
}

// ════════════════════════════════════════════════════════════════════════
// TRAIT
// ════════════════════════════════════════════════════════════════════════

/// Local store collaborator boundary. Synchronous by design; every call
/// is a point read/write on a local database file.
pub trait LocalStore: Send + Sync {
    /// Oldest pending cleanup rows, up to `limit`.
    fn pending_cleanup_records(&self, limit: u32) -> StoreResult<Vec<CleanupRecord>>;

    /// Queue a deletion; returns the new record id.
    fn add_cleanup_record(&self, cid: &str) -> StoreResult<i64>;

    fn update_cleanup_status(&self, id: i64, status: CleanupStatus) -> StoreResult<()>;

    /// cids of all pin records still in `sealing` state.
    fn sealing_cids(&self) -> StoreResult<Vec<String>>;

    fn add_pin_record(&self, cid: &str) -> StoreResult<()>;

    fn update_pin_status(&self, cid: &str, status: PinStatus) -> StoreResult<()>;

    /// Read a timestamp saved under `key`; `None` when absent or garbled.
    fn read_time(&self, key: &str) -> StoreResult<Option<DateTime<Utc>>>;

    fn save_time(&self, key: &str, at: DateTime<Utc>) -> StoreResult<()>;
}

// ════════════════════════════════════════════════════════════════════════
// SQLITE IMPLEMENTATION
// ════════════════════════════════════════════════════════════════════════

pub struct MetaStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cleanup_record (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    cid        TEXT    NOT NULL,
    status     TEXT    NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cleanup_status ON cleanup_record(status);

CREATE TABLE IF NOT EXISTS pin_record (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    cid        TEXT    NOT NULL UNIQUE,
    status     TEXT    NOT NULL DEFAULT 'sealing',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pin_status ON pin_record(status);

CREATE TABLE IF NOT EXISTS config_kv (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

impl MetaStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<MetaStore> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory store, used by tests and tooling.
    pub fn open_in_memory() -> StoreResult<MetaStore> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<MetaStore> {
        conn.execute_batch(SCHEMA)?;
        Ok(MetaStore {
            conn: Mutex::new(conn),
        })
    }

    /// Terminal status of one cleanup record, `None` for an unknown id.
    /// Used by tests and tooling to audit drain outcomes.
    pub fn cleanup_status(&self, id: i64) -> StoreResult<Option<CleanupStatus>> {
        let conn = self.conn.lock();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM cleanup_record WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.as_deref().map(CleanupStatus::parse))
    }
}

impl LocalStore for MetaStore {
    fn pending_cleanup_records(&self, limit: u32) -> StoreResult<Vec<CleanupRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, cid, status FROM cleanup_record
             WHERE status = 'pending' ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(CleanupRecord {
                id: row.get(0)?,
                cid: row.get(1)?,
                status: CleanupStatus::parse(&row.get::<_, String>(2)?),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn add_cleanup_record(&self, cid: &str) -> StoreResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO cleanup_record (cid, status, created_at) VALUES (?1, 'pending', ?2)",
            params![cid, Utc::now().timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_cleanup_status(&self, id: i64, status: CleanupStatus) -> StoreResult<()> {
        self.conn.lock().execute(
            "UPDATE cleanup_record SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    fn sealing_cids(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT cid FROM pin_record WHERE status = 'sealing' ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn add_pin_record(&self, cid: &str) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO pin_record (cid, status, created_at)
             VALUES (?1, 'sealing', ?2)",
            params![cid, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn update_pin_status(&self, cid: &str, status: PinStatus) -> StoreResult<()> {
        self.conn.lock().execute(
            "UPDATE pin_record SET status = ?1 WHERE cid = ?2",
            params![status.as_str(), cid],
        )?;
        Ok(())
    }

    fn read_time(&self, key: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM config_kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        let Some(value) = value else {
            return Ok(None);
        };
        let secs = match value.parse::<i64>() {
            Ok(s) => s,
            Err(_) => return Ok(None),
        };
        Ok(DateTime::from_timestamp(secs, 0))
    }

    fn save_time(&self, key: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO config_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, at.timestamp().to_string()],
        )?;
        Ok(())
    }
}
