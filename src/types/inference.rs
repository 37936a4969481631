//! Model schemas and the request/response pair of the inference pipeline.

use std::time::Instant;

use serde::Serialize;

use super::tensor::{Dtype, TensorData};

/// I/O signature of a loaded model, discovered at load time.
///
/// The `input_*` sequences are parallel (one entry per input tensor), as
/// are the `output_*` sequences. Schemas are immutable once published by
/// the registry.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSchema {
    pub name: String,
    pub version: String,
    pub path: String,
    /// ISO-8601 UTC timestamp of the moment the session was created.
    pub loaded_at: String,
    pub input_names: Vec<String>,
    pub input_shapes: Vec<Vec<i64>>,
    pub input_dtypes: Vec<Dtype>,
    pub output_names: Vec<String>,
    pub output_shapes: Vec<Vec<i64>>,
    pub output_dtypes: Vec<Dtype>,
}

impl ModelSchema {
    /// Whether the parallel sequences have equal length pairwise.
    pub fn is_consistent(&self) -> bool {
        self.input_names.len() == self.input_shapes.len()
            && self.input_names.len() == self.input_dtypes.len()
            && self.output_names.len() == self.output_shapes.len()
            && self.output_names.len() == self.output_dtypes.len()
    }
}

/// A single inference call flowing through the scheduler and registry.
#[derive(Debug)]
pub struct InferenceRequest {
    pub model_name: String,
    pub request_id: String,
    pub inputs: Vec<TensorData>,
    /// When the request entered the pipeline; the scheduler derives
    /// `queue_time_ms` from this.
    pub enqueue_time: Instant,
}

impl InferenceRequest {
    pub fn new(
        model_name: impl Into<String>,
        request_id: impl Into<String>,
        inputs: Vec<TensorData>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            request_id: request_id.into(),
            inputs,
            enqueue_time: Instant::now(),
        }
    }
}

/// Outcome of one inference call.
///
/// Backend failures travel as data (`success == false`, `error` set); the
/// pipeline never unwinds for them.
#[derive(Debug, Clone, Default)]
pub struct InferenceResponse {
    pub outputs: Vec<TensorData>,
    pub inference_time_ms: f64,
    pub queue_time_ms: f64,
    pub success: bool,
    pub error: String,
}

impl InferenceResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, error: error.into(), ..Default::default() }
    }

    pub fn model_not_found(name: &str) -> Self {
        Self::failure(format!("Model not found: {name}"))
    }

    pub fn is_model_not_found(&self) -> bool {
        !self.success && self.error.starts_with("Model not found")
    }
}
