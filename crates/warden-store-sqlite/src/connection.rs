//! Opening connections and mapping SQLite failures onto `StoreError`.

use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OpenFlags};
use tracing::debug;

use warden_contracts::error::StoreError;

use crate::schema::SCHEMA;

/// How long a writer waits on another process's lock before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A schema-initialized connection behind a mutex, plus where it points.
#[derive(Debug)]
pub(crate) struct Db {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    read_only: bool,
}

impl Db {
    pub(crate) fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable {
                    reason: format!("cannot create '{}': {e}", parent.display()),
                })?;
            }
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|e| StoreError::Unavailable {
            reason: format!("cannot open '{}': {e}", path.display()),
        })?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open an existing database for reading. Never creates the file, its
    /// directory, or any table: a mistyped path is `Unavailable`, not a fresh
    /// empty ledger.
    pub(crate) fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        if !path.is_file() {
            return Err(StoreError::Unavailable {
                reason: format!("ledger database '{}' does not exist", path.display()),
            });
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|e| StoreError::Unavailable {
            reason: format!("cannot open '{}': {e}", path.display()),
        })?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(map_err)?;
        debug!(path = %path.display(), "sqlite store opened read-only");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
            read_only: true,
        })
    }

    pub(crate) fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(map_err)?;
        conn.execute_batch(SCHEMA).map_err(map_err)?;
        debug!(path = ?path, "sqlite store initialized");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            read_only: false,
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|e| StoreError::Backend {
            reason: format!("sqlite connection lock poisoned: {e}"),
        })
    }

    /// The connection, for statements that modify the database.
    pub(crate) fn lock_for_write(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly { backend: self.identity() });
        }
        self.lock()
    }

    /// `"sqlite:<path>"` or `"sqlite::memory:"`.
    pub(crate) fn identity(&self) -> String {
        match &self.path {
            Some(p) => format!("sqlite:{}", p.display()),
            None => "sqlite::memory:".to_string(),
        }
    }
}

/// Lock contention and unreachable files are transient; everything else is a
/// backend error.
pub(crate) fn map_err(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen) => {
            StoreError::Unavailable { reason: err.to_string() }
        }
        _ => StoreError::Backend { reason: err.to_string() },
    }
}

/// The canonical text form of a timestamp in every column.
pub(crate) fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{s}': {e}"))
}
