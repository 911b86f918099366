//! Data layer owning the store pool.
//!
//! # Invariants
//! - The pool is closed exactly once, on the first `defer()`.
//! - Health probes never wait longer than the context deadline.

use super::{BaseLayer, Context, HealthReport, Layer, LayerState};
use crate::config::StoreConfig;
use crate::db::Database;
use crate::error::{DomainError, DomainResult};
use crate::repo::{SqlKey, SqliteEntity, SqliteRepository};
use crate::service::Service;
use crate::tx::{IsolationLevel, SqliteTransactionManager};
use log::warn;
use std::sync::Arc;
use std::time::Instant;

pub type SqliteService<E> = Service<E, SqliteRepository<E>, SqliteTransactionManager>;

/// Layer that owns one [`Database`] and hands out managers and repositories
/// over it.
#[derive(Debug)]
pub struct DataLayer {
    base: BaseLayer,
    db: Arc<Database>,
    default_isolation: IsolationLevel,
}

impl DataLayer {
    pub fn new(
        name: impl Into<String>,
        db: Arc<Database>,
        default_isolation: IsolationLevel,
    ) -> Self {
        Self {
            base: BaseLayer::new(name),
            db,
            default_isolation,
        }
    }

    /// Opens the configured store and wraps it in a layer named `data`.
    pub fn open(config: &StoreConfig) -> DomainResult<Self> {
        let db = Database::open(config)?;
        Ok(Self::new("data", db, config.default_isolation))
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn transaction_manager(&self) -> SqliteTransactionManager {
        SqliteTransactionManager::new(Arc::clone(&self.db), self.default_isolation)
    }

    /// Builds a repository for `E`, checking its table shape.
    pub fn repository<E>(&self) -> DomainResult<SqliteRepository<E>>
    where
        E: SqliteEntity,
        E::Key: SqlKey,
    {
        SqliteRepository::try_new(Arc::clone(&self.db))
    }

    /// Builds a transactional service for `E`.
    pub fn service<E>(&self) -> DomainResult<SqliteService<E>>
    where
        E: SqliteEntity,
        E::Key: SqlKey,
    {
        Ok(Service::new(self.repository()?, self.transaction_manager()))
    }

    fn probe(&self, ctx: &Context) -> DomainResult<()> {
        ctx.check()?;
        self.db.ping(ctx.remaining()).map_err(DomainError::from)
    }
}

impl Layer for DataLayer {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn state(&self) -> LayerState {
        self.base.state()
    }

    fn init_layer(&self, ctx: &Context) -> DomainResult<()> {
        self.base.initialize_with(ctx, || self.probe(ctx))
    }

    fn health(&self, ctx: &Context) -> HealthReport {
        let started_at = Instant::now();
        let state = self.state();
        let outcome = match state {
            LayerState::TornDown => Err(DomainError::unavailable(format!(
                "layer `{}` has been torn down",
                self.name()
            ))
            .with_code("layer_torn_down")),
            _ => self.probe(ctx),
        };
        let probe_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);

        let report = match outcome {
            Ok(()) => HealthReport::healthy(self.name()),
            Err(err) => {
                warn!(
                    "event=health_probe module=layer status=error layer={} error_code={} duration_ms={}",
                    self.name(),
                    err.code(),
                    probe_ms
                );
                HealthReport::unhealthy(self.name(), err)
            }
        };
        report
            .with_detail("state", state.as_str())
            .with_detail("store", self.db.mode())
            .with_detail("idle_connections", self.db.idle_connections())
            .with_detail("probe_ms", probe_ms)
    }

    fn defer(&self) {
        self.base.tear_down_with(|| {
            self.db.close();
        });
    }
}
