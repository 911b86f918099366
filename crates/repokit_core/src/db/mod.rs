//! SQLite storage bootstrap, pooling and error classification.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the core.
//! - Hand out pooled connections with checkout/return discipline.
//! - Translate store-native failures into domain error kinds.
//!
//! # Invariants
//! - Returned connections have the configured pragmas applied.
//! - A connection is never returned to the pool while inside a transaction.
//! - Unrecognized store failures classify as `internal` with the cause kept.

use crate::error::{DomainError, ErrorKind};
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod pool;

pub use pool::{Database, PooledConnection};
pub(crate) use pool::lock;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The pool has been closed by its owning layer.
    Closed,
    /// A statement would exceed the caller's deadline.
    DeadlineExceeded,
    /// The private directory of an ephemeral database could not be created.
    Scratch(std::io::Error),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Closed => write!(f, "database pool is closed"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded before store call"),
            Self::Scratch(err) => write!(f, "cannot create ephemeral store: {err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Closed => None,
            Self::DeadlineExceeded => None,
            Self::Scratch(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<DbError> for DomainError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => classify_sqlite_error(err),
            DbError::Closed => DomainError::unavailable("database pool is closed")
                .with_code("store_closed")
                .with_cause(DbError::Closed),
            DbError::DeadlineExceeded => DomainError::unavailable("deadline exceeded")
                .with_code("deadline_exceeded")
                .with_cause(DbError::DeadlineExceeded),
            DbError::Scratch(err) => DomainError::unavailable("cannot create ephemeral store")
                .with_code("store_scratch_failed")
                .with_cause(DbError::Scratch(err)),
        }
    }
}

impl From<rusqlite::Error> for DomainError {
    fn from(value: rusqlite::Error) -> Self {
        classify_sqlite_error(value)
    }
}

/// Returns the domain kind a store failure belongs to.
pub fn classify_sqlite(err: &rusqlite::Error) -> ErrorKind {
    match err {
        rusqlite::Error::QueryReturnedNoRows => ErrorKind::NotFound,
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation => match failure.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ErrorKind::AlreadyExists,
                rusqlite::ffi::SQLITE_CONSTRAINT_NOTNULL | rusqlite::ffi::SQLITE_CONSTRAINT_CHECK => {
                    ErrorKind::Validation
                }
                _ => ErrorKind::Conflict,
            },
            ErrorCode::DatabaseBusy if failure.extended_code == rusqlite::ffi::SQLITE_BUSY_SNAPSHOT => {
                ErrorKind::Conflict
            }
            ErrorCode::DatabaseLocked => ErrorKind::Conflict,
            ErrorCode::DatabaseBusy
            | ErrorCode::OperationInterrupted
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure => ErrorKind::Unavailable,
            _ => ErrorKind::Internal,
        },
        _ => ErrorKind::Internal,
    }
}

fn classify_sqlite_error(err: rusqlite::Error) -> DomainError {
    let kind = classify_sqlite(&err);
    let message = match kind {
        ErrorKind::NotFound => "record not found",
        ErrorKind::AlreadyExists => "record violates a uniqueness constraint",
        ErrorKind::Validation => "record violates a store constraint",
        ErrorKind::Conflict => "write conflicts with concurrent or related state",
        ErrorKind::Unavailable => "store is unavailable",
        _ => "store operation failed",
    };
    DomainError::new(kind, message).with_cause(err)
}

#[cfg(test)]
mod tests {
    use super::{classify_sqlite, DbError};
    use crate::error::{DomainError, ErrorKind};
    use rusqlite::{ffi, Connection};

    fn failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), None)
    }

    #[test]
    fn classification_covers_constraint_families() {
        assert_eq!(
            classify_sqlite(&failure(ffi::SQLITE_CONSTRAINT_UNIQUE)),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            classify_sqlite(&failure(ffi::SQLITE_CONSTRAINT_PRIMARYKEY)),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            classify_sqlite(&failure(ffi::SQLITE_CONSTRAINT_NOTNULL)),
            ErrorKind::Validation
        );
        assert_eq!(
            classify_sqlite(&failure(ffi::SQLITE_CONSTRAINT_FOREIGNKEY)),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn classification_covers_contention_and_unknown_failures() {
        assert_eq!(classify_sqlite(&failure(ffi::SQLITE_BUSY)), ErrorKind::Unavailable);
        assert_eq!(
            classify_sqlite(&failure(ffi::SQLITE_BUSY_SNAPSHOT)),
            ErrorKind::Conflict
        );
        assert_eq!(classify_sqlite(&failure(ffi::SQLITE_LOCKED)), ErrorKind::Conflict);
        assert_eq!(
            classify_sqlite(&rusqlite::Error::QueryReturnedNoRows),
            ErrorKind::NotFound
        );
        assert_eq!(
            classify_sqlite(&rusqlite::Error::InvalidQuery),
            ErrorKind::Internal
        );
    }

    #[test]
    fn unique_violation_from_live_statement_maps_to_already_exists() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT NOT NULL UNIQUE);")
            .unwrap();
        conn.execute("INSERT INTO t (name) VALUES ('a');", []).unwrap();
        let err = conn
            .execute("INSERT INTO t (name) VALUES ('a');", [])
            .unwrap_err();

        let domain = DomainError::from(err);
        assert_eq!(domain.kind(), ErrorKind::AlreadyExists);
        assert!(domain.cause().is_some());
    }

    #[test]
    fn closed_pool_maps_to_unavailable() {
        let domain = DomainError::from(DbError::Closed);
        assert_eq!(domain.kind(), ErrorKind::Unavailable);
        assert_eq!(domain.code(), "store_closed");
    }
}
