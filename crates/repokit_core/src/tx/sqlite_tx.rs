//! SQLite unit-of-work implementation.
//!
//! # Responsibility
//! - Open one physical transaction per outermost `with_tx*` call.
//! - Track the scope open on the current thread so nested calls join it.
//! - Roll back on error, on rollback-only marks, and on panic.
//!
//! # Invariants
//! - A scope owns its pooled connection until it ends, then releases it.
//! - Ended scopes reject every further statement.
//! - A nested call always joins the open scope, whatever level it asks for.
//!   Every supported level runs serializably, so the joined scope is never
//!   weaker than requested.

use super::{sqlite_supports, IsolationLevel, TransactionManager};
use crate::db::{lock, Database, PooledConnection};
use crate::error::{DomainError, DomainResult};
use log::{debug, info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

thread_local! {
    static ACTIVE_SCOPES: RefCell<Vec<UnitOfWork>> = const { RefCell::new(Vec::new()) };
}

/// Returns the innermost open scope on this thread for the given database.
pub(crate) fn active_scope(db_id: Uuid) -> Option<UnitOfWork> {
    ACTIVE_SCOPES.with(|scopes| {
        scopes
            .borrow()
            .iter()
            .rev()
            .find(|scope| scope.db_id() == db_id && scope.is_open())
            .cloned()
    })
}

/// Lifecycle of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Active,
    /// A joined operation failed; the scope can only roll back.
    RollbackOnly,
    Committed,
    RolledBack,
}

struct TxScope {
    id: Uuid,
    db_id: Uuid,
    isolation: IsolationLevel,
    started_at: Instant,
    conn: Mutex<Option<PooledConnection>>,
    state: Mutex<ScopeState>,
}

/// Handle to one open (or ended) SQLite transaction.
///
/// Cloning shares the same scope. Repositories bound with
/// `Repository::with_tx` route every statement through it.
#[derive(Clone)]
pub struct UnitOfWork {
    scope: Arc<TxScope>,
}

impl Debug for UnitOfWork {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.scope.id)
            .field("isolation", &self.scope.isolation)
            .field("state", &self.state())
            .finish()
    }
}

impl UnitOfWork {
    fn begin(conn: PooledConnection, isolation: IsolationLevel) -> Self {
        Self {
            scope: Arc::new(TxScope {
                id: Uuid::new_v4(),
                db_id: conn.database().id(),
                isolation,
                started_at: Instant::now(),
                conn: Mutex::new(Some(conn)),
                state: Mutex::new(ScopeState::Active),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.scope.id
    }

    pub fn db_id(&self) -> Uuid {
        self.scope.db_id
    }

    /// Effective isolation of the physical transaction.
    pub fn isolation(&self) -> IsolationLevel {
        self.scope.isolation
    }

    pub fn state(&self) -> ScopeState {
        *lock(&self.scope.state)
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.state(),
            ScopeState::Active | ScopeState::RollbackOnly
        )
    }

    /// Forces the scope to roll back when its owner finishes.
    pub fn set_rollback_only(&self) {
        let mut state = lock(&self.scope.state);
        if *state == ScopeState::Active {
            *state = ScopeState::RollbackOnly;
        }
    }

    /// Runs raw statements inside this scope.
    ///
    /// Lets callers layer side effects (other tables, audit rows) onto the
    /// same atomic unit as repository mutations.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> DomainResult<T> {
        self.with_conn(|conn| f(conn).map_err(DomainError::from))
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> DomainResult<T>,
    ) -> DomainResult<T> {
        if !self.is_open() {
            return Err(self.ended_error());
        }
        let guard = lock(&self.scope.conn);
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(self.ended_error()),
        }
    }

    fn ended_error(&self) -> DomainError {
        DomainError::internal("unit of work has already ended")
            .with_code("tx_ended")
            .with_detail("tx_id", self.scope.id.to_string())
            .with_detail("state", format!("{:?}", self.state()))
    }

    fn commit(&self) -> DomainResult<()> {
        let committed = self.with_conn(|conn| {
            conn.execute_batch("COMMIT;")
                .map_err(DomainError::from)
        });
        match committed {
            Ok(()) => {
                self.end(ScopeState::Committed);
                info!(
                    "event=tx_commit module=tx status=ok tx_id={} isolation={} duration_ms={}",
                    self.scope.id,
                    self.scope.isolation,
                    self.scope.started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    "event=tx_commit module=tx status=error tx_id={} error_code={} error={}",
                    self.scope.id,
                    err.code(),
                    err
                );
                self.rollback("commit_failed");
                Err(err)
            }
        }
    }

    fn rollback(&self, reason: &str) {
        if !self.is_open() {
            return;
        }
        let rolled_back = self.with_conn(|conn| {
            conn.execute_batch("ROLLBACK;")
                .map_err(DomainError::from)
        });
        if let Err(err) = rolled_back {
            warn!(
                "event=tx_rollback module=tx status=error tx_id={} error={}",
                self.scope.id, err
            );
        }
        self.end(ScopeState::RolledBack);
        warn!(
            "event=tx_rollback module=tx status=ok tx_id={} reason={} duration_ms={}",
            self.scope.id,
            reason,
            self.scope.started_at.elapsed().as_millis()
        );
    }

    fn end(&self, outcome: ScopeState) {
        *lock(&self.scope.state) = outcome;
        let released = lock(&self.scope.conn).take();
        drop(released);
    }
}

/// Pops the thread-local registration and rolls back a scope left open by an
/// unwinding `work` closure.
struct ScopeRegistration {
    handle: UnitOfWork,
}

impl ScopeRegistration {
    fn register(handle: UnitOfWork) -> Self {
        ACTIVE_SCOPES.with(|scopes| scopes.borrow_mut().push(handle.clone()));
        Self { handle }
    }
}

impl Drop for ScopeRegistration {
    fn drop(&mut self) {
        if self.handle.is_open() {
            self.handle.rollback("abandoned");
        }
        let id = self.handle.id();
        ACTIVE_SCOPES.with(|scopes| scopes.borrow_mut().retain(|scope| scope.id() != id));
    }
}

/// Transaction manager over a pooled SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteTransactionManager {
    db: Arc<Database>,
    default_isolation: IsolationLevel,
}

impl SqliteTransactionManager {
    pub fn new(db: Arc<Database>, default_isolation: IsolationLevel) -> Self {
        Self {
            db,
            default_isolation,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn default_isolation(&self) -> IsolationLevel {
        self.resolve_default()
    }

    fn resolve_default(&self) -> IsolationLevel {
        match self.default_isolation {
            IsolationLevel::Default => IsolationLevel::Serializable,
            other => other,
        }
    }

    fn resolve(&self, requested: IsolationLevel) -> DomainResult<IsolationLevel> {
        let resolved = match requested {
            IsolationLevel::Default => self.resolve_default(),
            other => other,
        };
        if !sqlite_supports(resolved) {
            return Err(DomainError::internal(format!(
                "isolation level `{resolved}` is not supported by sqlite"
            ))
            .with_code("tx_isolation_unsupported")
            .with_detail("isolation", resolved.as_str()));
        }
        Ok(resolved)
    }

    fn run_scope<T, F>(&self, isolation: IsolationLevel, work: F) -> DomainResult<T>
    where
        F: FnOnce(&UnitOfWork) -> DomainResult<T>,
    {
        let conn = self.db.checkout()?;
        conn.execute_batch(begin_statement(transaction_behavior(isolation)))?;

        let handle = UnitOfWork::begin(conn, isolation);
        let _registration = ScopeRegistration::register(handle.clone());
        debug!(
            "event=tx_begin module=tx status=ok tx_id={} isolation={}",
            handle.id(),
            isolation
        );

        match work(&handle) {
            Ok(value) => {
                if handle.state() == ScopeState::RollbackOnly {
                    handle.rollback("rollback_only");
                    return Err(DomainError::internal(
                        "unit of work rolled back after a nested operation failed",
                    )
                    .with_code("tx_rollback_only")
                    .with_detail("tx_id", handle.id().to_string()));
                }
                handle.commit()?;
                Ok(value)
            }
            Err(err) => {
                handle.rollback(err.code());
                Err(err)
            }
        }
    }
}

impl TransactionManager for SqliteTransactionManager {
    type Handle = UnitOfWork;

    fn with_tx_isolation<T, F>(&self, isolation: IsolationLevel, work: F) -> DomainResult<T>
    where
        F: FnOnce(&UnitOfWork) -> DomainResult<T>,
    {
        let resolved = self.resolve(isolation)?;

        if let Some(active) = active_scope(self.db.id()) {
            return self.join_tx(&active, work);
        }

        self.run_scope(resolved, work)
    }

    fn join_tx<T, F>(&self, handle: &UnitOfWork, work: F) -> DomainResult<T>
    where
        F: FnOnce(&UnitOfWork) -> DomainResult<T>,
    {
        if handle.db_id() != self.db.id() {
            return Err(DomainError::internal(
                "unit of work belongs to a different database",
            )
            .with_code("tx_foreign_handle")
            .with_detail("tx_id", handle.id().to_string()));
        }
        if !handle.is_open() {
            return Err(handle.ended_error());
        }

        debug!(
            "event=tx_join module=tx status=ok tx_id={}",
            handle.id()
        );
        let outcome = work(handle);
        if outcome.is_err() {
            handle.set_rollback_only();
        }
        outcome
    }
}

/// Serializable scopes take the write lock up front; the rest defer it to
/// the first write.
fn transaction_behavior(isolation: IsolationLevel) -> TransactionBehavior {
    match isolation {
        IsolationLevel::Serializable => TransactionBehavior::Immediate,
        _ => TransactionBehavior::Deferred,
    }
}

fn begin_statement(behavior: TransactionBehavior) -> &'static str {
    match behavior {
        TransactionBehavior::Immediate => "BEGIN IMMEDIATE;",
        TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE;",
        _ => "BEGIN DEFERRED;",
    }
}
