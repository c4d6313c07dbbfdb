//! Application state for Axum handlers.

use civic_jobs::{DeadLetterStore, JobRuntime, OpsService, RequeueOperator};
use std::sync::Arc;

/// Renders the Prometheus exposition text.
pub type MetricsRenderer = Arc<dyn Fn() -> String + Send + Sync>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub ops: OpsService,
    pub requeue: RequeueOperator,
    pub dead_letters: Arc<dyn DeadLetterStore>,
    pub prometheus: Option<MetricsRenderer>,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        ops: OpsService,
        requeue: RequeueOperator,
        dead_letters: Arc<dyn DeadLetterStore>,
    ) -> Self {
        Self {
            ops,
            requeue,
            dead_letters,
            prometheus: None,
        }
    }

    /// Creates the state from a job runtime's components.
    pub fn from_runtime(runtime: &JobRuntime) -> Self {
        Self::new(
            runtime.ops_service(),
            runtime.requeue_operator(),
            runtime.dead_letters(),
        )
    }

    /// Serve `/metrics` through `renderer`.
    #[must_use]
    pub fn with_prometheus(mut self, renderer: MetricsRenderer) -> Self {
        self.prometheus = Some(renderer);
        self
    }
}
