//! Application state shared across all handlers.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::metrics::MetricsCollector;
use crate::registry::ModelRegistry;
use crate::scheduler::BatchScheduler;

pub struct AppState {
    pub config: Config,
    pub registry: Arc<ModelRegistry>,
    pub scheduler: Arc<BatchScheduler>,
    pub metrics: Arc<MetricsCollector>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: Arc<ModelRegistry>,
        scheduler: Arc<BatchScheduler>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { config, registry, scheduler, metrics, started_at: Instant::now() }
    }
}
