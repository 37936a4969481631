//! ONNX inference gateway library.
//!
//! A long-running HTTP service that loads ONNX artifacts from a watched
//! directory, exposes them over a JSON API, and coalesces concurrent
//! inference requests into batches. The library exposes the full pipeline
//! so the binary stays thin:
//!
//! - [`registry::ModelRegistry`]: hot-reloadable name -> session mapping
//! - [`scheduler::BatchScheduler`]: dynamic request batching
//! - [`session::SessionManager`]: facade over the inference backend
//! - [`metrics::MetricsCollector`]: Prometheus-shape observability

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

pub mod backend;
pub mod config;
pub mod convert;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod routes;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod types;

pub use config::Config;
pub use state::AppState;

use backend::OrtBackend;
use metrics::MetricsCollector;
use registry::ModelRegistry;
use scheduler::BatchScheduler;
use session::SessionManager;

/// Build the HTTP router over a fully constructed application state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(routes::health))
        .route("/ready", get(routes::ready))
        .route("/", get(routes::info))
        .route("/v1/models", get(routes::list_models))
        .route("/v1/models/:name", get(routes::get_model))
        .route("/v1/models/:name/reload", post(routes::reload_model))
        .route("/v1/models/:name/infer", post(routes::infer));

    if state.config.metrics.enabled {
        router = router.route(&state.config.metrics.path, get(routes::metrics));
    }

    router
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            routes::track_requests,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the gateway until a shutdown signal arrives, then stop the
/// scheduler and watcher cooperatively.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let metrics = Arc::new(MetricsCollector::new(&config.metrics));

    let backend = Arc::new(OrtBackend::new(config.inference.clone())?);
    let registry = Arc::new(ModelRegistry::new(
        SessionManager::new(backend),
        config.models.clone(),
        Arc::clone(&metrics),
    ));
    registry.initialize().await;

    let scheduler = Arc::new(BatchScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&metrics),
        config.batching.clone(),
    ));
    scheduler.start();

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&registry),
        Arc::clone(&scheduler),
        metrics,
    ));
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, models_dir = %config.models.directory, "Gateway listening");
    info!(models_loaded = registry.count().await, "Registry ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    scheduler.stop().await;
    registry.stop_watcher().await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
