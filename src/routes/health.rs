//! Health, readiness, server info, and metrics endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::metrics::PROMETHEUS_CONTENT_TYPE;
use crate::session::iso_timestamp;
use crate::state::AppState;

/// Liveness probe.
///
/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": iso_timestamp(),
    }))
}

/// Readiness probe: 503 until at least one model is loaded.
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let models_loaded = state.registry.count().await;
    let ready = models_loaded > 0;

    let body = Json(json!({
        "status": if ready { "ready" } else { "not_ready" },
        "models_loaded": models_loaded,
        "timestamp": iso_timestamp(),
    }));

    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, body)
}

/// Server info.
///
/// GET /
pub async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "models_loaded": state.registry.count().await,
        "batching_enabled": state.config.batching.enabled,
        "providers": state.config.inference.providers,
    }))
}

/// Prometheus exposition.
///
/// GET <metrics.path>
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.export_prometheus(),
    )
}
