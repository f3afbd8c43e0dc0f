//! Durable ledger of cached builds
//!
//! A SQLite database under the storage path with three tables:
//!
//! | Table | Row lifetime |
//! |-------|--------------|
//! | `builds` | while a build directory exists under `builds/` |
//! | `download_queue` | while a fetch for that prefix is outstanding |
//! | `in_use` | while a holder is evaluating that prefix (reference counted) |
//!
//! Rows refer to builds by prefix only; the filesystem directory is derived
//! from the storage root, never stored as an object reference.

use crate::error::{BisectError, BisectResult};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Default file name of the ledger inside the storage path
pub const LEDGER_FILENAME: &str = "autobisect.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// A build recorded in the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerBuild {
    pub prefix: String,
    pub path: PathBuf,
    pub size: u64,
    pub last_access: i64,
    pub created_at: i64,
}

/// Progress of an outstanding fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Collaborator is producing the build
    Fetching,
    /// Build produced, being moved into place
    Finalizing,
}

impl QueueStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Finalizing => "finalizing",
        }
    }

    fn from_label(s: &str) -> Self {
        match s {
            "finalizing" => Self::Finalizing,
            _ => Self::Fetching,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the download queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub prefix: String,
    pub destination: PathBuf,
    pub status: QueueStatus,
    pub owner: String,
    pub started_at: i64,
}

/// One holder's claim on a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InUseEntry {
    pub prefix: String,
    pub holder: String,
    pub refs: u32,
    pub exclusive: bool,
    pub acquired_at: i64,
}

/// SQLite-backed cache ledger. `close` is idempotent; any other call after
/// close fails with [`BisectError::LedgerClosed`].
pub struct CacheLedger {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl CacheLedger {
    /// Open the ledger, creating the file and schema if missing
    pub fn open(path: &Path) -> BisectResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BisectError::io(format!("creating {}", parent.display()), e))?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!("Opened ledger {} (journal_mode={})", path.display(), mode);
        init_schema(&conn)?;

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the connection. Calling this more than once is a no-op.
    pub fn close(&self) -> BisectResult<()> {
        let mut guard = self.lock()?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| BisectError::Sqlite(e))?;
            debug!("Closed ledger {}", self.path.display());
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|g| g.is_none()).unwrap_or(true)
    }

    /// Names of the tables present in the database
    pub fn tables(&self) -> BisectResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
    }

    // builds

    pub fn build(&self, prefix: &str) -> BisectResult<Option<LedgerBuild>> {
        self.with_conn(|conn| {
            let build = conn
                .query_row(
                    "SELECT prefix, path, size, last_access, created_at FROM builds WHERE prefix = ?1",
                    params![prefix],
                    build_from_row,
                )
                .optional()?;
            Ok(build)
        })
    }

    /// All builds, least recently used first
    pub fn builds(&self) -> BisectResult<Vec<LedgerBuild>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT prefix, path, size, last_access, created_at FROM builds \
                 ORDER BY last_access ASC, prefix ASC",
            )?;
            let builds = stmt
                .query_map([], build_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(builds)
        })
    }

    pub fn total_size(&self) -> BisectResult<u64> {
        self.with_conn(|conn| {
            let total: i64 =
                conn.query_row("SELECT COALESCE(SUM(size), 0) FROM builds", [], |row| {
                    row.get(0)
                })?;
            Ok(total.max(0) as u64)
        })
    }

    /// Insert or replace a build row
    pub fn insert_build(&self, build: &LedgerBuild) -> BisectResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO builds (prefix, path, size, last_access, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    build.prefix,
                    build.path.to_string_lossy(),
                    build.size as i64,
                    build.last_access,
                    build.created_at
                ],
            )?;
            Ok(())
        })
    }

    /// Record a finished fetch: the build row appears and the queue row goes
    /// away in one transaction
    pub fn complete_download(&self, build: &LedgerBuild) -> BisectResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT OR REPLACE INTO builds (prefix, path, size, last_access, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    build.prefix,
                    build.path.to_string_lossy(),
                    build.size as i64,
                    build.last_access,
                    build.created_at
                ],
            )?;
            tx.execute(
                "DELETE FROM download_queue WHERE prefix = ?1",
                params![build.prefix],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn touch(&self, prefix: &str, now: i64) -> BisectResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE builds SET last_access = ?2 WHERE prefix = ?1",
                params![prefix, now],
            )?;
            Ok(())
        })
    }

    /// Delete a build row unconditionally. Returns whether a row existed.
    pub fn remove_build(&self, prefix: &str) -> BisectResult<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM builds WHERE prefix = ?1", params![prefix])?;
            Ok(n > 0)
        })
    }

    /// Delete a build row only if no holder has it in use, checked in the
    /// same transaction
    pub fn remove_build_if_unused(&self, prefix: &str) -> BisectResult<bool> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let holders: i64 = tx.query_row(
                "SELECT COUNT(*) FROM in_use WHERE prefix = ?1",
                params![prefix],
                |row| row.get(0),
            )?;
            if holders > 0 {
                return Ok(false);
            }
            let n = tx.execute("DELETE FROM builds WHERE prefix = ?1", params![prefix])?;
            tx.commit()?;
            Ok(n > 0)
        })
    }

    // download queue

    pub fn queue_entry(&self, prefix: &str) -> BisectResult<Option<QueueEntry>> {
        self.with_conn(|conn| {
            let entry = conn
                .query_row(
                    "SELECT prefix, destination, status, owner, started_at FROM download_queue \
                     WHERE prefix = ?1",
                    params![prefix],
                    queue_from_row,
                )
                .optional()?;
            Ok(entry)
        })
    }

    pub fn queue_entries(&self) -> BisectResult<Vec<QueueEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT prefix, destination, status, owner, started_at FROM download_queue \
                 ORDER BY started_at ASC",
            )?;
            let entries = stmt
                .query_map([], queue_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }

    /// Register an outstanding fetch. Fails with `AlreadyInUse` if another
    /// row exists for the prefix; the primary key keeps it to one per prefix.
    pub fn enqueue(
        &self,
        prefix: &str,
        destination: &Path,
        owner: &str,
        now: i64,
    ) -> BisectResult<()> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO download_queue (prefix, destination, status, owner, started_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    prefix,
                    destination.to_string_lossy(),
                    QueueStatus::Fetching.as_str(),
                    owner,
                    now
                ],
            )?;
            if inserted == 0 {
                return Err(BisectError::AlreadyInUse(prefix.to_string()));
            }
            Ok(())
        })
    }

    pub fn set_queue_status(&self, prefix: &str, status: QueueStatus) -> BisectResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE download_queue SET status = ?2 WHERE prefix = ?1",
                params![prefix, status.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn dequeue(&self, prefix: &str) -> BisectResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM download_queue WHERE prefix = ?1",
                params![prefix],
            )?;
            Ok(())
        })
    }

    // in-use markers

    /// Add one reference for `holder`. Exclusive access conflicts with any
    /// other holder; shared access conflicts only with an exclusive one.
    pub fn acquire(
        &self,
        prefix: &str,
        holder: &str,
        exclusive: bool,
        now: i64,
    ) -> BisectResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let others: Vec<bool> = {
                let mut stmt =
                    tx.prepare("SELECT exclusive FROM in_use WHERE prefix = ?1 AND holder != ?2")?;
                let rows = stmt
                    .query_map(params![prefix, holder], |row| row.get::<_, bool>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            if (exclusive && !others.is_empty()) || others.iter().any(|&x| x) {
                return Err(BisectError::AlreadyInUse(prefix.to_string()));
            }
            tx.execute(
                "INSERT INTO in_use (prefix, holder, refs, exclusive, acquired_at) \
                 VALUES (?1, ?2, 1, ?3, ?4) \
                 ON CONFLICT(prefix, holder) DO UPDATE SET \
                 refs = refs + 1, exclusive = MAX(exclusive, excluded.exclusive), \
                 acquired_at = excluded.acquired_at",
                params![prefix, holder, exclusive, now],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Drop one reference for `holder`. Returns the references left on the
    /// prefix across all holders.
    pub fn release(&self, prefix: &str, holder: &str) -> BisectResult<u32> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "UPDATE in_use SET refs = refs - 1 WHERE prefix = ?1 AND holder = ?2",
                params![prefix, holder],
            )?;
            tx.execute(
                "DELETE FROM in_use WHERE prefix = ?1 AND refs <= 0",
                params![prefix],
            )?;
            let remaining: i64 = tx.query_row(
                "SELECT COALESCE(SUM(refs), 0) FROM in_use WHERE prefix = ?1",
                params![prefix],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(remaining.max(0) as u32)
        })
    }

    pub fn in_use_entries(&self) -> BisectResult<Vec<InUseEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT prefix, holder, refs, exclusive, acquired_at FROM in_use ORDER BY prefix",
            )?;
            let entries = stmt
                .query_map([], |row| {
                    Ok(InUseEntry {
                        prefix: row.get(0)?,
                        holder: row.get(1)?,
                        refs: row.get::<_, i64>(2)?.max(0) as u32,
                        exclusive: row.get(3)?,
                        acquired_at: row.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }

    pub fn is_in_use(&self, prefix: &str) -> BisectResult<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM in_use WHERE prefix = ?1",
                params![prefix],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// Remove a holder's claim outright, used when reclaiming stale rows
    pub fn remove_in_use(&self, prefix: &str, holder: &str) -> BisectResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM in_use WHERE prefix = ?1 AND holder = ?2",
                params![prefix, holder],
            )?;
            Ok(())
        })
    }

    fn lock(&self) -> BisectResult<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| BisectError::Internal("ledger connection mutex poisoned".to_string()))
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> BisectResult<T>,
    ) -> BisectResult<T> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(BisectError::LedgerClosed)?;
        f(conn)
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS builds (
            prefix TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            size INTEGER NOT NULL,
            last_access INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS download_queue (
            prefix TEXT PRIMARY KEY,
            destination TEXT NOT NULL,
            status TEXT NOT NULL,
            owner TEXT NOT NULL,
            started_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS in_use (
            prefix TEXT NOT NULL,
            holder TEXT NOT NULL,
            refs INTEGER NOT NULL,
            exclusive INTEGER NOT NULL DEFAULT 0,
            acquired_at INTEGER NOT NULL,
            PRIMARY KEY(prefix, holder)
        );
        "#,
    )
}

fn build_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerBuild> {
    Ok(LedgerBuild {
        prefix: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        size: row.get::<_, i64>(2)?.max(0) as u64,
        last_access: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn queue_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        prefix: row.get(0)?,
        destination: PathBuf::from(row.get::<_, String>(1)?),
        status: QueueStatus::from_label(&row.get::<_, String>(2)?),
        owner: row.get(3)?,
        started_at: row.get(4)?,
    })
}
