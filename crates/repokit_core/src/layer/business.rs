//! Business layer composed over exactly one data layer.

use super::{BaseLayer, Context, DataLayer, HealthReport, Layer, LayerState};
use crate::error::DomainResult;
use crate::tx::{TransactionManager, UnitOfWork};

/// Layer that owns one [`DataLayer`]: init goes data-first, health is
/// delegated and teardown cascades.
#[derive(Debug)]
pub struct BusinessLayer {
    base: BaseLayer,
    data: DataLayer,
}

impl BusinessLayer {
    pub fn new(name: impl Into<String>, data: DataLayer) -> Self {
        Self {
            base: BaseLayer::new(name),
            data,
        }
    }

    pub fn data(&self) -> &DataLayer {
        &self.data
    }

    /// Runs `work` in one unit of work on the data layer's store.
    pub fn with_transaction<T, F>(&self, work: F) -> DomainResult<T>
    where
        F: FnOnce(&UnitOfWork) -> DomainResult<T>,
    {
        self.data.transaction_manager().with_tx(work)
    }
}

impl Layer for BusinessLayer {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn state(&self) -> LayerState {
        self.base.state()
    }

    fn init_layer(&self, ctx: &Context) -> DomainResult<()> {
        self.base.initialize_with(ctx, || self.data.init_layer(ctx))
    }

    fn health(&self, ctx: &Context) -> HealthReport {
        let delegated = self.data.health(ctx);
        let data_layer = delegated.layer.clone();
        HealthReport {
            layer: self.name().to_string(),
            ..delegated
        }
        .with_detail("data_layer", data_layer)
        .with_detail("state", self.state().as_str())
    }

    fn defer(&self) {
        self.base.tear_down_with(|| self.data.defer());
    }
}
