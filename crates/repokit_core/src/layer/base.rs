//! Default layer behavior and the shared state machine.

use super::{Context, HealthReport, Layer, LayerState};
use crate::db::lock;
use crate::error::{DomainError, DomainResult};
use log::info;
use std::sync::Mutex;
use std::time::Instant;

/// Layer with no resources: no-op init, always healthy.
///
/// Data and business layers embed it for their state transitions.
#[derive(Debug)]
pub struct BaseLayer {
    name: String,
    state: Mutex<LayerState>,
}

impl BaseLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(LayerState::Uninitialized),
        }
    }

    /// Runs `init` on the `uninitialized -> initialized` transition only.
    pub(crate) fn initialize_with(
        &self,
        ctx: &Context,
        init: impl FnOnce() -> DomainResult<()>,
    ) -> DomainResult<()> {
        let mut state = lock(&self.state);
        match *state {
            LayerState::Initialized => Ok(()),
            LayerState::TornDown => Err(DomainError::unavailable(format!(
                "layer `{}` has been torn down",
                self.name
            ))
            .with_code("layer_torn_down")
            .with_detail("layer", self.name.as_str())),
            LayerState::Uninitialized => {
                ctx.check()?;
                let started_at = Instant::now();
                init()?;
                *state = LayerState::Initialized;
                info!(
                    "event=layer_init module=layer status=ok layer={} request_id={} trace_id={} duration_ms={}",
                    self.name,
                    ctx.request_id().unwrap_or("-"),
                    ctx.trace_id().unwrap_or("-"),
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
        }
    }

    /// Runs `release` on the first teardown only. Returns whether this call
    /// performed it.
    pub(crate) fn tear_down_with(&self, release: impl FnOnce()) -> bool {
        let mut state = lock(&self.state);
        if *state == LayerState::TornDown {
            return false;
        }
        let started_at = Instant::now();
        let previous = *state;
        *state = LayerState::TornDown;
        release();
        info!(
            "event=layer_defer module=layer status=ok layer={} previous_state={} duration_ms={}",
            self.name,
            previous,
            started_at.elapsed().as_millis()
        );
        true
    }
}

impl Layer for BaseLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> LayerState {
        *lock(&self.state)
    }

    fn init_layer(&self, ctx: &Context) -> DomainResult<()> {
        self.initialize_with(ctx, || Ok(()))
    }

    fn health(&self, _ctx: &Context) -> HealthReport {
        HealthReport::healthy(self.name.as_str()).with_detail("state", self.state().as_str())
    }

    fn defer(&self) {
        self.tear_down_with(|| {});
    }
}

#[cfg(test)]
mod tests {
    use super::BaseLayer;
    use crate::error::ErrorKind;
    use crate::layer::{Context, Layer, LayerState};
    use std::time::Instant;

    #[test]
    fn lifecycle_moves_forward_only() {
        let layer = BaseLayer::new("base");
        assert_eq!(layer.state(), LayerState::Uninitialized);

        layer.init_layer(&Context::background()).unwrap();
        layer.init_layer(&Context::background()).unwrap();
        assert_eq!(layer.state(), LayerState::Initialized);

        layer.defer();
        layer.defer();
        assert_eq!(layer.state(), LayerState::TornDown);

        let err = layer.init_layer(&Context::background()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(err.code(), "layer_torn_down");
    }

    #[test]
    fn teardown_runs_release_once() {
        let layer = BaseLayer::new("base");
        let mut releases = 0;
        assert!(layer.tear_down_with(|| releases += 1));
        assert!(!layer.tear_down_with(|| releases += 1));
        assert_eq!(releases, 1);
    }

    #[test]
    fn expired_context_blocks_initialization() {
        let layer = BaseLayer::new("base");
        let err = layer
            .init_layer(&Context::with_deadline(Instant::now()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(layer.state(), LayerState::Uninitialized);
    }

    #[test]
    fn health_is_available_in_every_state() {
        let layer = BaseLayer::new("base");
        assert!(layer.health(&Context::background()).healthy);
        layer.defer();
        let report = layer.health(&Context::background());
        assert!(report.healthy);
        assert_eq!(report.details["state"], "torn_down");
    }
}
