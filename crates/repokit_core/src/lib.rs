//! Generic persistence core: repositories, units of work, services and layer
//! lifecycle over SQLite.
//! This crate is the single source of truth for data-access invariants.

pub mod config;
pub mod db;
pub mod error;
pub mod layer;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod service;
pub mod tx;

pub use config::{ConfigError, CoreConfig, LogLevel, LoggingConfig, StoreConfig};
pub use db::{Database, DbError, DbResult, PooledConnection};
pub use error::{
    is_already_exists, is_conflict, is_not_found, wrap_error, DomainError, DomainResult,
    ErrorKind,
};
pub use layer::{
    BaseLayer, BusinessLayer, Context, DataLayer, HealthReport, Layer, LayerState, SqliteService,
};
pub use logging::{active_logging, init_logging, LoggingError};
pub use model::entity::{now_millis, Entity, EntityKey, RecordMeta};
pub use query::{
    Filter, FilterOp, FilterValue, OrderDirection, Ordering, QueryModifier, QueryPlan,
};
pub use repo::{Repository, SqlKey, SqliteEntity, SqliteRepository};
pub use service::Service;
pub use tx::{
    IsolationLevel, ScopeState, SqliteTransactionManager, TransactionManager, UnitOfWork,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
