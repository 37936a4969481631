//! Session manager: the single choke point between the gateway and the
//! inference backend.
//!
//! Loading extracts the published [`ModelSchema`] from the backend's raw
//! signature; running assembles inputs in request order, dispatches one
//! execution, and decodes outputs in schema order. Backend failures are
//! returned as data (`success == false`), never as errors.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use crate::backend::{BackendError, BackendSession, InferenceBackend};
use crate::types::{Dtype, InferenceRequest, InferenceResponse, ModelSchema};

pub struct SessionManager {
    backend: Arc<dyn InferenceBackend>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }

    /// Open the artifact at `path` and publish its schema.
    pub fn load(
        &self,
        path: &Path,
        name: &str,
    ) -> Result<(Box<dyn BackendSession>, ModelSchema), BackendError> {
        info!(model = name, path = %path.display(), "Loading model");
        let start = Instant::now();

        let (session, signature) = self.backend.load(path)?;

        let schema = ModelSchema {
            name: name.to_string(),
            version: "1".to_string(),
            path: path.display().to_string(),
            loaded_at: iso_timestamp(),
            input_names: signature.inputs.iter().map(|t| t.name.clone()).collect(),
            input_shapes: signature.inputs.iter().map(|t| t.shape.clone()).collect(),
            input_dtypes: signature.inputs.iter().map(|t| t.dtype).collect(),
            output_names: signature.outputs.iter().map(|t| t.name.clone()).collect(),
            output_shapes: signature.outputs.iter().map(|t| t.shape.clone()).collect(),
            output_dtypes: signature.outputs.iter().map(|t| t.dtype).collect(),
        };

        info!(
            model = name,
            load_ms = start.elapsed().as_millis() as u64,
            inputs = schema.input_names.len(),
            outputs = schema.output_names.len(),
            "Model loaded"
        );

        Ok((session, schema))
    }

    /// Execute one inference call against a loaded session.
    pub fn run(
        &self,
        session: &dyn BackendSession,
        request: &InferenceRequest,
        schema: &ModelSchema,
    ) -> InferenceResponse {
        // Unknown element types may surface in a schema but cannot be
        // represented in a tensor buffer, so such models are rejected here.
        if schema.input_dtypes.contains(&Dtype::Unknown)
            || schema.output_dtypes.contains(&Dtype::Unknown)
        {
            return InferenceResponse::failure(format!(
                "model '{}' declares unsupported tensor element types",
                schema.name
            ));
        }

        let start = Instant::now();
        let result = session.run(&request.inputs, &schema.output_names);
        let inference_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(outputs) => InferenceResponse {
                outputs,
                inference_time_ms,
                queue_time_ms: 0.0,
                success: true,
                error: String::new(),
            },
            Err(e) => {
                error!(model = %schema.name, request_id = %request.request_id, error = %e, "Inference error");
                InferenceResponse {
                    inference_time_ms,
                    error: e.to_string(),
                    ..InferenceResponse::failure("")
                }
            }
        }
    }
}

/// ISO-8601 UTC timestamp at second resolution.
pub(crate) fn iso_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::types::{TensorBuffer, TensorData};

    fn manager(backend: MockBackend) -> SessionManager {
        SessionManager::new(Arc::new(backend))
    }

    fn request() -> InferenceRequest {
        InferenceRequest::new(
            "m",
            "req-1",
            vec![TensorData::new("input", vec![1, 4], TensorBuffer::F32(vec![1.0, 2.0, 3.0, 4.0]))],
        )
    }

    #[test]
    fn load_publishes_consistent_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.onnx");
        std::fs::write(&path, b"model").unwrap();

        let manager = manager(MockBackend::default());
        let (_session, schema) = manager.load(&path, "m").unwrap();

        assert!(schema.is_consistent());
        assert_eq!(schema.name, "m");
        assert_eq!(schema.version, "1");
        assert_eq!(schema.input_names, vec!["input"]);
        assert_eq!(schema.output_names, vec!["output"]);
        // e.g. 2025-01-01T00:00:00Z
        assert!(schema.loaded_at.ends_with('Z') && schema.loaded_at.contains('T'));
    }

    #[test]
    fn load_of_missing_file_fails() {
        let manager = manager(MockBackend::default());
        let result = manager.load(Path::new("/nowhere/m.onnx"), "m");
        assert!(matches!(result, Err(BackendError::Load { .. })));
    }

    #[test]
    fn run_decodes_outputs_in_schema_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.onnx");
        std::fs::write(&path, b"model").unwrap();

        let manager = manager(MockBackend::default());
        let (session, schema) = manager.load(&path, "m").unwrap();

        let response = manager.run(session.as_ref(), &request(), &schema);
        assert!(response.success, "{}", response.error);
        assert_eq!(response.outputs.len(), 1);
        assert_eq!(response.outputs[0].name, "output");
        assert_eq!(response.outputs[0].data, TensorBuffer::F32(vec![1.0, 2.0, 3.0, 4.0]));
        assert!(response.inference_time_ms >= 0.0);
    }

    #[test]
    fn backend_failure_becomes_response_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.onnx");
        std::fs::write(&path, b"model").unwrap();

        let backend = MockBackend { fail_inference: true, ..Default::default() };
        let manager = manager(backend);
        let (session, schema) = manager.load(&path, "m").unwrap();

        let response = manager.run(session.as_ref(), &request(), &schema);
        assert!(!response.success);
        assert!(response.error.contains("mock failure"));
    }

    #[test]
    fn unknown_schema_dtype_is_rejected_at_run_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.onnx");
        std::fs::write(&path, b"model").unwrap();

        let manager = manager(MockBackend::default());
        let (session, mut schema) = manager.load(&path, "m").unwrap();
        schema.output_dtypes[0] = Dtype::Unknown;

        let response = manager.run(session.as_ref(), &request(), &schema);
        assert!(!response.success);
        assert!(response.error.contains("unsupported"));
    }
}
