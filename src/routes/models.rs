//! Model management and inference endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::convert::{outputs_to_json, parse_inputs};
use crate::error::ServerError;
use crate::session::iso_timestamp;
use crate::state::AppState;
use crate::types::{InferenceRequest, ModelSchema};

/// List all loaded models.
///
/// GET /v1/models
pub async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let models: Vec<_> = state
        .registry
        .list()
        .await
        .iter()
        .map(|schema| {
            json!({
                "name": schema.name,
                "version": schema.version,
                "path": schema.path,
                "loaded_at": schema.loaded_at,
                "input_names": schema.input_names,
                "output_names": schema.output_names,
            })
        })
        .collect();

    Json(json!({ "models": models }))
}

/// Full schema for one model.
///
/// GET /v1/models/:name
pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let schema = state
        .registry
        .get(&name)
        .await
        .ok_or_else(|| ServerError::ModelNotFound(name))?;

    Ok(Json(schema_to_json(&schema)))
}

fn schema_to_json(schema: &ModelSchema) -> serde_json::Value {
    let io = |names: &[String], shapes: &[Vec<i64>], dtypes: &[crate::types::Dtype]| {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                json!({
                    "name": name,
                    "shape": shapes.get(i).cloned().unwrap_or_default(),
                    "dtype": dtypes.get(i).map(|d| d.as_str()).unwrap_or("unknown"),
                })
            })
            .collect::<Vec<_>>()
    };

    json!({
        "name": schema.name,
        "version": schema.version,
        "path": schema.path,
        "loaded_at": schema.loaded_at,
        "inputs": io(&schema.input_names, &schema.input_shapes, &schema.input_dtypes),
        "outputs": io(&schema.output_names, &schema.output_shapes, &schema.output_dtypes),
    })
}

/// Hot-reload one model from its artifact file.
///
/// POST /v1/models/:name/reload
pub async fn reload_model(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    info!(model = %name, "Reloading model");

    if !state.registry.has(&name).await {
        return Err(ServerError::ModelNotFound(name));
    }
    if !state.registry.reload(&name).await {
        return Err(ServerError::ModelLoad {
            name,
            detail: "artifact could not be reloaded; previous session kept".into(),
        });
    }

    Ok(Json(json!({
        "status": "reloaded",
        "model": name,
        "timestamp": iso_timestamp(),
    })))
}

/// Run inference.
///
/// POST /v1/models/:name/infer
pub async fn infer(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: String,
) -> Result<impl IntoResponse, ServerError> {
    let body: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| ServerError::bad_request_with("Invalid JSON body", e.to_string()))?;
    let inputs = parse_inputs(&body)?;

    if !state.registry.has(&name).await {
        return Err(ServerError::ModelNotFound(name));
    }

    let request = InferenceRequest::new(name.clone(), Uuid::new_v4().to_string(), inputs);
    let response = state.scheduler.submit(request).await;

    if !response.success {
        // The model may have been removed between the lookup and dispatch.
        if response.is_model_not_found() {
            return Err(ServerError::ModelNotFound(name));
        }
        return Err(ServerError::internal("Inference failed", response.error));
    }

    state
        .metrics
        .record_inference(&name, response.inference_time_ms / 1000.0);

    let mut payload = json!({
        "model_name": name,
        "outputs": outputs_to_json(&response.outputs),
    });
    if response.inference_time_ms > 0.0 {
        payload["timing"] = json!({
            "inference_ms": response.inference_time_ms,
            "queue_ms": response.queue_time_ms,
        });
    }

    Ok(Json(payload))
}
