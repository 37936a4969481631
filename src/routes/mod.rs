//! HTTP route handlers:
//! - `health`: liveness, readiness, server info, Prometheus exposition
//! - `models`: model listing, schemas, reload, inference

pub mod health;
pub mod models;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;

pub use health::{health, info, metrics, ready};
pub use models::{get_model, infer, list_models, reload_model};

/// Middleware recording every request into the metrics collector, keyed by
/// the matched route pattern rather than the raw path so per-model calls
/// share one endpoint label.
pub async fn track_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let start = Instant::now();
    let response = next.run(request).await;

    state.metrics.record_request(
        &endpoint,
        &method,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
