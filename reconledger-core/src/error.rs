//! Error types for reconledger-core

use rusqlite::ErrorCode;
use thiserror::Error;

/// Extended SQLite result codes for constraint failures we classify.
const SQLITE_CONSTRAINT_FOREIGNKEY: i32 = 787;
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

/// Main error type for the reconledger-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input rejected before touching storage
    #[error("validation error: {0}")]
    Validation(String),

    /// A relation or entity references a row that does not exist
    #[error("foreign key error: no row {id} in {table}")]
    ForeignKey { table: &'static str, id: i64 },

    /// Schema registration or reflection mismatch
    #[error("schema error: {0}")]
    Schema(String),

    /// Storage unavailable, or contention that outlived the retry budget
    #[error("connection error: {0}")]
    Connection(String),

    /// The session manager has been shut down
    #[error("session manager is closed")]
    Closed,

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for reconledger-core
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Transient lock contention reported by the engine (`SQLITE_BUSY` / `SQLITE_LOCKED`).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Database(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }

    /// Two writers raced to create the same natural key.
    ///
    /// Only reachable when another connection committed between our read-check
    /// and our insert; re-running the transaction re-reads and merges.
    pub fn is_constraint_race(&self) -> bool {
        matches!(
            self,
            Error::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation
                    && matches!(
                        e.extended_code,
                        SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY
                    )
        )
    }

    /// Rewrites an engine-level foreign key failure into [`Error::ForeignKey`].
    pub(crate) fn foreign_key_on(self, table: &'static str, id: i64) -> Self {
        match &self {
            Error::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                Error::ForeignKey { table, id }
            }
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> Error {
        Error::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }

    #[test]
    fn test_transient_classification() {
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_BUSY).is_transient());
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_LOCKED).is_transient());
        assert!(!sqlite_failure(SQLITE_CONSTRAINT_UNIQUE).is_transient());
        assert!(!Error::Closed.is_transient());
    }

    #[test]
    fn test_constraint_race_classification() {
        assert!(sqlite_failure(SQLITE_CONSTRAINT_UNIQUE).is_constraint_race());
        assert!(sqlite_failure(SQLITE_CONSTRAINT_PRIMARYKEY).is_constraint_race());
        assert!(!sqlite_failure(SQLITE_CONSTRAINT_FOREIGNKEY).is_constraint_race());
    }

    #[test]
    fn test_foreign_key_mapping() {
        let err = sqlite_failure(SQLITE_CONSTRAINT_FOREIGNKEY).foreign_key_on("hosts", 7);
        assert!(matches!(err, Error::ForeignKey { table: "hosts", id: 7 }));

        let err = Error::Closed.foreign_key_on("hosts", 7);
        assert!(matches!(err, Error::Closed));
    }
}
