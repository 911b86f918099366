//! Generic transactional CRUD service.
//!
//! # Responsibility
//! - Run each mutation in exactly one unit of work.
//! - Delegate reads to the unbound repository.
//!
//! # Invariants
//! - Mutations always go through a repository rebound to the open handle.
//! - A failed mutation rolls back its whole unit of work.

use crate::error::DomainResult;
use crate::model::entity::Entity;
use crate::query::QueryModifier;
use crate::repo::Repository;
use crate::tx::{IsolationLevel, TransactionManager};
use log::{debug, warn};
use std::marker::PhantomData;
use std::time::Instant;

/// Use-case service over entity `E`, repository `R` and manager `T`.
pub struct Service<E, R, T> {
    repo: R,
    txm: T,
    isolation: IsolationLevel,
    _entity: PhantomData<fn() -> E>,
}

impl<E, R, T> Service<E, R, T>
where
    E: Entity,
    T: TransactionManager,
    R: Repository<E, Handle = T::Handle>,
{
    /// Creates a service using the manager's default isolation.
    pub fn new(repo: R, txm: T) -> Self {
        Self {
            repo,
            txm,
            isolation: IsolationLevel::Default,
            _entity: PhantomData,
        }
    }

    /// Runs mutations at `isolation` instead of the manager default.
    #[must_use]
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn transaction_manager(&self) -> &T {
        &self.txm
    }

    pub fn get_by_id(&self, id: &E::Key, modifiers: &[QueryModifier]) -> DomainResult<E> {
        self.repo.get_by_id(id, modifiers)
    }

    pub fn get_all(&self, modifiers: &[QueryModifier]) -> DomainResult<Vec<E>> {
        self.repo.get_all(modifiers)
    }

    pub fn exists(&self, id: &E::Key) -> DomainResult<bool> {
        self.repo.exists(id)
    }

    pub fn count(&self, modifiers: &[QueryModifier]) -> DomainResult<u64> {
        self.repo.count(modifiers)
    }

    /// Creates `entity` in its own unit of work.
    pub fn create(&self, entity: &mut E) -> DomainResult<()> {
        self.mutate("create", |repo| repo.create(entity))
    }

    /// Updates `entity` in its own unit of work.
    pub fn update(&self, entity: &mut E) -> DomainResult<()> {
        self.mutate("update", |repo| repo.update(entity))
    }

    /// Soft-deletes `id` in its own unit of work.
    pub fn delete(&self, id: &E::Key) -> DomainResult<()> {
        self.mutate("delete", |repo| repo.delete(id))
    }

    /// Physically removes `id` in its own unit of work.
    pub fn hard_delete(&self, id: &E::Key) -> DomainResult<()> {
        self.mutate("hard_delete", |repo| repo.hard_delete(id))
    }

    /// Runs `work` in one unit of work with a repository bound to it.
    ///
    /// Side effects issued through the handle share the same outcome as the
    /// repository calls.
    pub fn atomically<U, F>(&self, work: F) -> DomainResult<U>
    where
        F: FnOnce(&R, &T::Handle) -> DomainResult<U>,
    {
        self.txm.with_tx_isolation(self.isolation, |handle| {
            let bound = self.repo.with_tx(handle);
            work(&bound, handle)
        })
    }

    fn mutate<U>(
        &self,
        operation: &'static str,
        work: impl FnOnce(&R) -> DomainResult<U>,
    ) -> DomainResult<U> {
        let started_at = Instant::now();
        let outcome = self.atomically(|repo, _| work(repo));
        match &outcome {
            Ok(_) => debug!(
                "event=service_mutation module=service status=ok entity={} op={} duration_ms={}",
                E::NAME,
                operation,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=service_mutation module=service status=error entity={} op={} error_code={} duration_ms={}",
                E::NAME,
                operation,
                err.code(),
                started_at.elapsed().as_millis()
            ),
        }
        outcome
    }
}
