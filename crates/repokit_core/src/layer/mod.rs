//! Layer lifecycle for the process orchestrator.
//!
//! # Responsibility
//! - Define the init / health / teardown contract shared by layers.
//! - Carry the caller's deadline and identity across lifecycle calls.
//!
//! # Invariants
//! - State moves `uninitialized -> initialized -> torn_down`, never back.
//! - `defer()` is idempotent and safe on a never-initialized layer.
//! - `health()` never panics and never blocks past the context deadline.

use crate::error::{DomainError, DomainResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};
use uuid::Uuid;

mod base;
mod business;
mod data;

pub use base::BaseLayer;
pub use business::BusinessLayer;
pub use data::{DataLayer, SqliteService};

/// Deadline and caller identity carried through lifecycle calls.
///
/// Identity fields are optional and only travel with the context; layers
/// attach them to their log events.
///
/// ```
/// use repokit_core::Context;
/// use std::time::Duration;
///
/// let ctx = Context::with_timeout(Duration::from_secs(2))
///     .with_request_id("req-7")
///     .with_tenant_id("acme");
/// assert_eq!(ctx.request_id(), Some("req-7"));
/// assert_eq!(ctx.trace_id(), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    deadline: Option<Instant>,
    user_id: Option<Uuid>,
    request_id: Option<String>,
    trace_id: Option<String>,
    tenant_id: Option<String>,
}

impl Context {
    /// Context without a deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            ..Self::default()
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Time left before the deadline; `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Fails `unavailable` once the deadline has passed.
    pub fn check(&self) -> DomainResult<()> {
        if self.is_expired() {
            let mut err =
                DomainError::unavailable("context deadline exceeded").with_code("deadline_exceeded");
            if let Some(request_id) = self.request_id() {
                err = err.with_detail("request_id", request_id);
            }
            return Err(err);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerState {
    Uninitialized,
    Initialized,
    TornDown,
}

impl LayerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::TornDown => "torn_down",
        }
    }
}

impl Display for LayerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one health probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub layer: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<DomainError>,
    pub details: BTreeMap<String, Value>,
}

impl HealthReport {
    pub fn healthy(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            healthy: true,
            cause: None,
            details: BTreeMap::new(),
        }
    }

    pub fn unhealthy(layer: impl Into<String>, cause: DomainError) -> Self {
        Self {
            layer: layer.into(),
            healthy: false,
            cause: Some(cause),
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Lifecycle contract driven by the process orchestrator.
pub trait Layer {
    fn name(&self) -> &str;

    fn state(&self) -> LayerState;

    /// Brings the layer up. Repeating the call on an initialized layer is a
    /// no-op; a torn-down layer or an expired context fails `unavailable`.
    fn init_layer(&self, ctx: &Context) -> DomainResult<()>;

    /// Probes the layer, bounded by the context deadline.
    fn health(&self, ctx: &Context) -> HealthReport;

    /// Releases owned resources exactly once.
    fn defer(&self);
}
