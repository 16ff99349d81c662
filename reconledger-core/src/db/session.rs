//! Connection and transaction management for one workspace database
//!
//! A [`SessionManager`] owns the workspace's single SQLite connection. Every
//! write runs inside [`SessionManager::with_transaction`], which opens an
//! `IMMEDIATE` transaction (the write lock is taken up front, so two writers
//! never deadlock upgrading a read lock), commits when the closure succeeds and
//! rolls back on any error or unwind.
//!
//! Busy/locked errors from other connections on the same file are retried with
//! exponential backoff. A unique-constraint failure inside a transaction means
//! another connection created the same natural key between our read-check and
//! insert; the whole closure is re-run so the re-read finds and merges the row.

use crate::db::schema::{run_migrations, ProtocolSchema};
use crate::error::{Error, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Bounded retry with exponential backoff for transient contention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after `delay`, doubled and capped at `max_backoff`
    pub fn next_delay(&self, delay: Duration) -> Duration {
        std::cmp::min(delay.saturating_mul(2), self.max_backoff)
    }
}

/// Owner of a workspace's database connection
pub struct SessionManager {
    conn: Mutex<Option<Connection>>,
    retry: RetryPolicy,
    location: String,
}

impl SessionManager {
    /// Open or create the database at `path`
    pub fn open(path: &Path, busy_timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(|e| {
            Error::Connection(format!("failed to open {}: {}", path.display(), e))
        })?;

        // SQLite reads the file lazily; a corrupt or unreadable file first
        // fails here.
        let unavailable = |e: rusqlite::Error| {
            Error::Connection(format!("failed to open {}: {}", path.display(), e))
        };

        conn.busy_timeout(busy_timeout).map_err(unavailable)?;
        // Enable foreign keys and WAL mode for concurrent readers
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )
        .map_err(unavailable)?;

        tracing::info!(path = %path.display(), "Opened workspace database");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            retry,
            location: path.display().to_string(),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(retry: RetryPolicy) -> Result<Self> {
        let unavailable =
            |e: rusqlite::Error| Error::Connection(format!("failed to open :memory:: {}", e));
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        conn.execute("PRAGMA foreign_keys = ON", []).map_err(unavailable)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            retry,
            location: ":memory:".to_string(),
        })
    }

    /// Where the database lives, for diagnostics
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Path of the database file, `None` for in-memory databases
    pub fn path(&self) -> Option<PathBuf> {
        (self.location != ":memory:").then(|| PathBuf::from(&self.location))
    }

    /// Run `f` inside a write transaction.
    ///
    /// Commits when `f` returns `Ok`; rolls back when it returns `Err`, when it
    /// panics, or when the commit itself fails. `f` may run more than once if
    /// the transaction is retried, so it must not have side effects outside
    /// the transaction.
    pub fn with_transaction<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        let mut attempt = 0;
        let mut delay = self.retry.initial_backoff;

        loop {
            match self.try_transaction(&mut f) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() || e.is_constraint_race() => {
                    if attempt >= self.retry.max_retries {
                        if e.is_transient() {
                            tracing::warn!(
                                db = %self.location,
                                attempts = attempt + 1,
                                "Giving up on contended transaction"
                            );
                            return Err(Error::Connection(format!(
                                "database busy after {} attempts: {}",
                                attempt + 1,
                                e
                            )));
                        }
                        return Err(e);
                    }

                    attempt += 1;
                    tracing::debug!(
                        db = %self.location,
                        attempt,
                        max_retries = self.retry.max_retries,
                        ?delay,
                        error = %e,
                        "Retrying transaction"
                    );
                    std::thread::sleep(delay);
                    delay = self.retry.next_delay(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_transaction<T, F>(&self, f: &mut F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(Error::Closed)?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // Dropping `tx` on the error path rolls back.
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run a read-only query against the connection.
    ///
    /// Busy errors are retried like writes; reads never hold a transaction
    /// across calls.
    pub fn read<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&Connection) -> Result<T>,
    {
        let mut attempt = 0;
        let mut delay = self.retry.initial_backoff;

        loop {
            let result = {
                let guard = self.lock();
                let conn = guard.as_ref().ok_or(Error::Closed)?;
                f(conn)
            };

            match result {
                Err(e) if e.is_transient() => {
                    if attempt >= self.retry.max_retries {
                        return Err(Error::Connection(format!(
                            "database busy after {} attempts: {}",
                            attempt + 1,
                            e
                        )));
                    }
                    attempt += 1;
                    std::thread::sleep(delay);
                    delay = self.retry.next_delay(delay);
                }
                other => return other,
            }
        }
    }

    /// Apply pending base and protocol migrations.
    ///
    /// The migrations take the write lock themselves, so this runs outside
    /// [`with_transaction`](Self::with_transaction). Nothing is written when
    /// the file cannot be migrated.
    pub fn migrate(&self, schema: &dyn ProtocolSchema) -> Result<()> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(Error::Closed)?;
        run_migrations(conn, schema)
    }

    /// Wait for in-flight work, then close the connection.
    ///
    /// Later calls fail with [`Error::Closed`]. Closing twice is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        let mut guard = self.lock();
        match guard.take() {
            Some(conn) => {
                conn.close().map_err(|(_, e)| Error::Database(e))?;
                tracing::info!(db = %self.location, "Closed workspace database");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has completed
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        // A panic inside a transaction already rolled it back, so the
        // connection behind a poisoned lock is still consistent.
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
