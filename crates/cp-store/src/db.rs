//! Database opening and transaction helpers.
//!
//! One [`Store`] wraps one `rusqlite::Connection`. Connections are not
//! shared across threads; each worker opens its own against the same
//! path. WAL mode makes that safe for one writer and many readers.

use crate::error::{Result, StoreError};
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default busy timeout: writers queue behind each other rather than
/// failing immediately.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// A handle to the SQLite store.
pub struct Store {
    path: PathBuf,
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        Self::configure(&conn)?;
        debug!(path = %path.display(), "store opened");
        Ok(Store { path, conn })
    }

    /// Open an in-memory database (tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Store {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Open read-only; fails if the file does not exist.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Store { path, conn })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    /// The database file path this store was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open another connection against the same database.
    ///
    /// Used by worker threads; `Store` itself is deliberately not
    /// `Sync`.
    pub fn reopen(&self) -> Result<Store> {
        if self.path == Path::new(":memory:") {
            return Err(StoreError::Busy(
                "in-memory stores cannot be reopened across threads".into(),
            ));
        }
        Store::open(&self.path)
    }

    /// Borrow the underlying connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside an IMMEDIATE transaction, committing on `Ok`.
    ///
    /// IMMEDIATE takes the write lock up front, so the transaction can
    /// never fail with `SQLITE_BUSY` halfway through its writes.
    pub fn with_tx<T>(
        &mut self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/cowrie.db");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let store = Store::open_in_memory().unwrap();
        let on: i64 = store
            .conn()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(on, 1);
    }

    #[test]
    fn test_with_tx_rolls_back_on_error() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .conn()
            .execute("CREATE TABLE t (x INTEGER)", [])
            .unwrap();
        let result: Result<()> = store.with_tx(|tx| {
            tx.execute("INSERT INTO t (x) VALUES (1)", [])?;
            Err(StoreError::Busy("forced".into()))
        });
        assert!(result.is_err());
        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
