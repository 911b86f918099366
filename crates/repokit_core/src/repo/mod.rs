//! Repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Define the generic CRUD contract over one entity type.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Default reads exclude soft-deleted records; `IncludeDeleted` opts in.
//! - A repository bound to a unit of work routes every call through it.
//! - Failures surface as classified `DomainError`s; nothing is swallowed.

use crate::error::DomainResult;
use crate::model::entity::Entity;
use crate::query::QueryModifier;

mod sqlite_repo;

pub use sqlite_repo::{SqlKey, SqliteEntity, SqliteRepository};

/// Generic CRUD contract over entity `E`.
///
/// Implementations hold no per-call mutable state and can be shared across
/// threads; transactional binding produces a new instance via [`with_tx`].
///
/// [`with_tx`]: Repository::with_tx
pub trait Repository<E: Entity>: Sized {
    /// Unit-of-work token this repository can be bound to.
    type Handle;

    /// Inserts `entity`, populating its id (when unassigned) and timestamps.
    fn create(&self, entity: &mut E) -> DomainResult<()>;

    /// Returns the visible record for `id`, or `not_found`.
    ///
    /// Filters, `IncludeDeleted` and `Preload` apply; ordering and pagination
    /// are ignored.
    fn get_by_id(&self, id: &E::Key, modifiers: &[QueryModifier]) -> DomainResult<E>;

    /// Returns visible records refined by `modifiers` in canonical order.
    fn get_all(&self, modifiers: &[QueryModifier]) -> DomainResult<Vec<E>>;

    /// Replaces the stored record keyed by `entity`'s id.
    ///
    /// Fails `not_found` when no visible record exists and `conflict` when
    /// the stored record changed since `entity` was read.
    fn update(&self, entity: &mut E) -> DomainResult<()>;

    /// Soft-deletes the record. Repeating the call is a no-op.
    fn delete(&self, id: &E::Key) -> DomainResult<()>;

    /// Physically removes the record, tombstoned or not.
    fn hard_delete(&self, id: &E::Key) -> DomainResult<()>;

    fn exists(&self, id: &E::Key) -> DomainResult<bool>;

    /// Counts visible records matching the filters of `modifiers`.
    fn count(&self, modifiers: &[QueryModifier]) -> DomainResult<u64>;

    /// Returns a copy bound to `handle`; `self` stays unbound.
    fn with_tx(&self, handle: &Self::Handle) -> Self;
}
