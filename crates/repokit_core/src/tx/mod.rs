//! Unit-of-work contracts.
//!
//! # Responsibility
//! - Define the all-or-nothing execution contract used by services.
//! - Name the isolation levels a caller may request.
//!
//! # Invariants
//! - One `with_tx*` invocation produces at most one outcome (commit xor
//!   rollback).
//! - Nested invocations join the open scope whatever isolation they request;
//!   they never open a second physical transaction.
//! - Unsupported isolation fails fast with `internal`; it is never downgraded.

use crate::error::DomainResult;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

mod sqlite_tx;

pub use sqlite_tx::{ScopeState, SqliteTransactionManager, UnitOfWork};
pub(crate) use sqlite_tx::active_scope;

/// Requested isolation, from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Whatever the manager is configured to use.
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    WriteCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
    Linearizable,
}

impl IsolationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::ReadUncommitted => "read_uncommitted",
            Self::ReadCommitted => "read_committed",
            Self::WriteCommitted => "write_committed",
            Self::RepeatableRead => "repeatable_read",
            Self::Snapshot => "snapshot",
            Self::Serializable => "serializable",
            Self::Linearizable => "linearizable",
        }
    }
}

impl Display for IsolationLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns whether SQLite can honor `level` without weakening it.
///
/// SQLite executes every transaction serializably, which satisfies all the
/// classic levels. `write_committed` and `linearizable` have no SQLite
/// counterpart.
pub fn sqlite_supports(level: IsolationLevel) -> bool {
    !matches!(
        level,
        IsolationLevel::WriteCommitted | IsolationLevel::Linearizable
    )
}

/// Executes work with all-or-nothing semantics.
pub trait TransactionManager {
    /// Opaque unit-of-work token handed to the work closure.
    type Handle;

    /// Runs `work` in a unit of work using the default isolation.
    fn with_tx<T, F>(&self, work: F) -> DomainResult<T>
    where
        F: FnOnce(&Self::Handle) -> DomainResult<T>,
    {
        self.with_tx_isolation(IsolationLevel::Default, work)
    }

    /// Runs `work` in a unit of work with explicit isolation.
    ///
    /// Commits when `work` returns `Ok`, rolls back and propagates otherwise.
    fn with_tx_isolation<T, F>(&self, isolation: IsolationLevel, work: F) -> DomainResult<T>
    where
        F: FnOnce(&Self::Handle) -> DomainResult<T>;

    /// Runs `work` inside an already-open unit of work.
    ///
    /// A failure marks the scope rollback-only; the owning invocation decides
    /// the outcome.
    fn join_tx<T, F>(&self, handle: &Self::Handle, work: F) -> DomainResult<T>
    where
        F: FnOnce(&Self::Handle) -> DomainResult<T>;
}
