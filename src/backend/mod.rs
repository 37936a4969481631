//! Seam between the gateway and the inference runtime.
//!
//! The gateway only ever talks to the runtime through these two traits:
//! [`InferenceBackend`] opens an artifact and reports its raw I/O
//! signature, [`BackendSession`] executes one call against named tensors.
//! Everything above this seam (session manager, registry, scheduler) is
//! runtime-agnostic; the ONNX Runtime adapter lives in [`ort`].

pub mod ort;

use std::path::Path;

use crate::types::{Dtype, TensorData};

pub use self::ort::OrtBackend;

/// Errors surfaced by the inference runtime.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The runtime environment itself failed to come up.
    #[error("runtime initialization failed: {0}")]
    Init(String),

    /// The artifact could not be opened or was rejected by the runtime.
    #[error("failed to load model from {path}: {detail}")]
    Load { path: String, detail: String },

    /// A single execution failed. The pipeline converts this into an
    /// `InferenceResponse` with `success == false`.
    #[error("inference failed: {0}")]
    Inference(String),

    /// The request referenced a tensor the session cannot represent.
    #[error("unsupported tensor: {0}")]
    UnsupportedTensor(String),
}

/// Raw I/O signature of one tensor as reported by the runtime.
#[derive(Debug, Clone)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<i64>,
    pub dtype: Dtype,
}

/// Raw model signature as reported by the runtime at load time. The
/// session manager turns this into a published `ModelSchema`.
#[derive(Debug, Clone, Default)]
pub struct IoSignature {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

/// A loaded artifact capable of executing inference calls. Handles are
/// thread-safe for concurrent read-only execution; replacement happens by
/// dropping the owning registry entry.
pub trait BackendSession: Send + Sync {
    /// Execute one call. `inputs` arrive in request order; outputs must be
    /// returned in `output_names` order.
    fn run(
        &self,
        inputs: &[TensorData],
        output_names: &[String],
    ) -> Result<Vec<TensorData>, BackendError>;
}

/// Factory for sessions. One backend instance is shared by the whole
/// process; per-model state lives in the returned sessions.
pub trait InferenceBackend: Send + Sync {
    /// Open the artifact at `path` and report its I/O signature.
    fn load(&self, path: &Path) -> Result<(Box<dyn BackendSession>, IoSignature), BackendError>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! Identity backend for tests: loads any file and echoes inputs back
    //! under the session's declared output names.

    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{BackendError, BackendSession, InferenceBackend, IoSignature, TensorSpec};
    use crate::types::{Dtype, TensorData};

    pub struct MockSession {
        delay: Duration,
        runs: Arc<AtomicU64>,
        run_log: Arc<std::sync::Mutex<Vec<String>>>,
        fail: bool,
    }

    impl BackendSession for MockSession {
        fn run(
            &self,
            inputs: &[TensorData],
            output_names: &[String],
        ) -> Result<Vec<TensorData>, BackendError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if let Some(first) = inputs.first() {
                self.run_log.lock().unwrap().push(first.name.clone());
            }
            if self.fail {
                return Err(BackendError::Inference("mock failure".into()));
            }
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            Ok(inputs
                .iter()
                .zip(output_names)
                .map(|(input, name)| TensorData {
                    name: name.clone(),
                    ..input.clone()
                })
                .collect())
        }
    }

    /// Identity backend: every load succeeds (the file only has to exist)
    /// and sessions echo their inputs.
    pub struct MockBackend {
        pub delay: Duration,
        pub fail_inference: bool,
        pub runs: Arc<AtomicU64>,
        pub loads: Arc<AtomicU64>,
        /// First input name of every run, in execution order.
        pub run_log: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl Default for MockBackend {
        fn default() -> Self {
            Self {
                delay: Duration::ZERO,
                fail_inference: false,
                runs: Arc::new(AtomicU64::new(0)),
                loads: Arc::new(AtomicU64::new(0)),
                run_log: Arc::new(std::sync::Mutex::new(Vec::new())),
            }
        }
    }

    impl InferenceBackend for MockBackend {
        fn load(
            &self,
            path: &Path,
        ) -> Result<(Box<dyn BackendSession>, IoSignature), BackendError> {
            if !path.exists() {
                return Err(BackendError::Load {
                    path: path.display().to_string(),
                    detail: "no such file".into(),
                });
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            let signature = IoSignature {
                inputs: vec![TensorSpec {
                    name: "input".into(),
                    shape: vec![-1, 4],
                    dtype: Dtype::F32,
                }],
                outputs: vec![TensorSpec {
                    name: "output".into(),
                    shape: vec![-1, 4],
                    dtype: Dtype::F32,
                }],
            };
            let session = MockSession {
                delay: self.delay,
                runs: Arc::clone(&self.runs),
                run_log: Arc::clone(&self.run_log),
                fail: self.fail_inference,
            };
            Ok((Box::new(session), signature))
        }
    }
}
