//! Metrics for the gateway.
//!
//! `core` holds the lock-free primitives; `collector` aggregates them and
//! renders the Prometheus text exposition.

pub mod collector;
pub mod core;

pub use collector::{MetricsCollector, PROMETHEUS_CONTENT_TYPE};
pub use core::{Counter, Gauge, Histogram};
