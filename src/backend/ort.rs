//! ONNX Runtime adapter behind the backend seam.
//!
//! Translates the gateway's inference options onto `ort` session options
//! (execution providers, thread counts, graph optimization, accelerator
//! memory limit) and converts between [`TensorData`] and `ort` values.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::tensor::TensorElementType;
use ort::value::{DynValue, Tensor, ValueType};
use tracing::{debug, info, warn};

use super::{BackendError, BackendSession, InferenceBackend, IoSignature, TensorSpec};
use crate::config::InferenceConfig;
use crate::types::{Dtype, TensorBuffer, TensorData};

/// Shared factory for ONNX Runtime sessions.
pub struct OrtBackend {
    config: InferenceConfig,
}

impl OrtBackend {
    /// Initialize the ONNX Runtime environment once for the process.
    pub fn new(config: InferenceConfig) -> Result<Self, BackendError> {
        ort::init()
            .with_name("onnx-gateway")
            .commit()
            .map_err(|e| BackendError::Init(e.to_string()))?;
        Ok(Self { config })
    }

    /// Build the execution provider list from the configured preference
    /// order. Providers unavailable in this build are skipped with a
    /// warning; CPU is always appended as the final fallback.
    fn execution_providers(&self) -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::new();

        for name in &self.config.providers {
            match name.as_str() {
                "tensorrt" => {
                    let trt = TensorRTExecutionProvider::default()
                        .with_device_id(self.config.gpu_device_id);
                    if trt.is_available().unwrap_or(false) {
                        info!(device_id = self.config.gpu_device_id, "Using TensorRT execution provider");
                        providers.push(trt.build());
                    } else {
                        warn!("TensorRT provider requested but not available in this build");
                    }
                }
                "cuda" => {
                    let mut cuda = CUDAExecutionProvider::default()
                        .with_device_id(self.config.gpu_device_id);
                    if self.config.memory_limit_mb > 0 {
                        // Passed straight to the CUDA arena as bytes; the
                        // runtime decides how strictly it is enforced.
                        cuda = cuda
                            .with_memory_limit((self.config.memory_limit_mb * 1024 * 1024) as usize);
                    }
                    if cuda.is_available().unwrap_or(false) {
                        info!(device_id = self.config.gpu_device_id, "Using CUDA execution provider");
                        providers.push(cuda.build());
                    } else {
                        warn!("CUDA provider requested but not available in this build");
                    }
                }
                "cpu" => {
                    debug!("Using CPU execution provider");
                    providers.push(CPUExecutionProvider::default().build());
                }
                other => {
                    warn!(provider = other, "Unknown execution provider, skipping");
                }
            }
        }

        // CPU fallback when the preference list named none of the known
        // providers (or only unavailable accelerators).
        if providers.is_empty() {
            providers.push(CPUExecutionProvider::default().build());
        }

        providers
    }

    fn optimization_level(&self) -> GraphOptimizationLevel {
        match self.config.graph_optimization.as_str() {
            "disabled" => GraphOptimizationLevel::Disable,
            "basic" => GraphOptimizationLevel::Level1,
            "extended" => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        }
    }
}

impl InferenceBackend for OrtBackend {
    fn load(&self, path: &Path) -> Result<(Box<dyn BackendSession>, IoSignature), BackendError> {
        let load_err = |e: ort::Error| BackendError::Load {
            path: path.display().to_string(),
            detail: e.to_string(),
        };

        let mut builder = Session::builder()
            .map_err(load_err)?
            .with_execution_providers(self.execution_providers())
            .map_err(load_err)?
            .with_optimization_level(self.optimization_level())
            .map_err(load_err)?;

        if self.config.intra_op_threads > 0 {
            builder = builder
                .with_intra_threads(self.config.intra_op_threads as usize)
                .map_err(load_err)?;
        }
        if self.config.inter_op_threads > 0 {
            builder = builder
                .with_inter_threads(self.config.inter_op_threads as usize)
                .map_err(load_err)?;
        }

        let session = builder.commit_from_file(path).map_err(load_err)?;

        let signature = IoSignature {
            inputs: session
                .inputs
                .iter()
                .map(|i| tensor_spec(&i.name, &i.input_type))
                .collect(),
            outputs: session
                .outputs
                .iter()
                .map(|o| tensor_spec(&o.name, &o.output_type))
                .collect(),
        };

        // Remember each output's element type so decoding does not have to
        // interrogate the runtime value again.
        let output_dtypes = signature
            .outputs
            .iter()
            .map(|spec| (spec.name.clone(), spec.dtype))
            .collect();

        Ok((Box::new(OrtSession { session, output_dtypes }), signature))
    }
}

fn tensor_spec(name: &str, value_type: &ValueType) -> TensorSpec {
    let (dtype, shape) = match value_type {
        ValueType::Tensor { ty, dimensions, .. } => (element_to_dtype(*ty), dimensions.clone()),
        _ => (Dtype::Unknown, Vec::new()),
    };
    TensorSpec { name: name.to_string(), shape, dtype }
}

/// Fixed mapping between the runtime's element-type tag and the gateway
/// dtype. Tags without a gateway representation map to `Unknown`, which
/// may surface in a schema but is rejected at run time.
fn element_to_dtype(ty: TensorElementType) -> Dtype {
    match ty {
        TensorElementType::Float32 => Dtype::F32,
        TensorElementType::Float64 => Dtype::F64,
        TensorElementType::Int8 => Dtype::I8,
        TensorElementType::Int16 => Dtype::I16,
        TensorElementType::Int32 => Dtype::I32,
        TensorElementType::Int64 => Dtype::I64,
        TensorElementType::Uint8 => Dtype::U8,
        TensorElementType::Uint16 => Dtype::U16,
        TensorElementType::Bool => Dtype::Bool,
        TensorElementType::String => Dtype::String,
        _ => Dtype::Unknown,
    }
}

struct OrtSession {
    session: Session,
    output_dtypes: HashMap<String, Dtype>,
}

impl BackendSession for OrtSession {
    fn run(
        &self,
        inputs: &[TensorData],
        output_names: &[String],
    ) -> Result<Vec<TensorData>, BackendError> {
        let mut session_inputs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> =
            Vec::with_capacity(inputs.len());
        for input in inputs {
            let value = encode_input(input)?;
            session_inputs.push((Cow::Owned(input.name.clone()), value.into()));
        }

        let outputs = self
            .session
            .run(session_inputs)
            .map_err(|e| BackendError::Inference(e.to_string()))?;

        let mut decoded = Vec::with_capacity(output_names.len());
        for name in output_names {
            let value = outputs.get(name.as_str()).ok_or_else(|| {
                BackendError::Inference(format!("runtime produced no output named '{name}'"))
            })?;
            let dtype = self.output_dtypes.get(name).copied().unwrap_or(Dtype::Unknown);
            decoded.push(decode_output(name, dtype, value)?);
        }
        Ok(decoded)
    }
}

fn encode_input(input: &TensorData) -> Result<DynValue, BackendError> {
    let shape = input.shape.clone();
    let err = |e: ort::Error| {
        BackendError::UnsupportedTensor(format!("input '{}': {e}", input.name))
    };
    let value = match &input.data {
        TensorBuffer::F32(v) => Tensor::from_array((shape, v.clone())).map_err(err)?.into_dyn(),
        TensorBuffer::F64(v) => Tensor::from_array((shape, v.clone())).map_err(err)?.into_dyn(),
        TensorBuffer::I8(v) => Tensor::from_array((shape, v.clone())).map_err(err)?.into_dyn(),
        TensorBuffer::I16(v) => Tensor::from_array((shape, v.clone())).map_err(err)?.into_dyn(),
        TensorBuffer::I32(v) => Tensor::from_array((shape, v.clone())).map_err(err)?.into_dyn(),
        TensorBuffer::I64(v) => Tensor::from_array((shape, v.clone())).map_err(err)?.into_dyn(),
        TensorBuffer::U8(v) => Tensor::from_array((shape, v.clone())).map_err(err)?.into_dyn(),
        TensorBuffer::U16(v) => Tensor::from_array((shape, v.clone())).map_err(err)?.into_dyn(),
        TensorBuffer::Bool(v) => Tensor::from_array((shape, v.clone())).map_err(err)?.into_dyn(),
        TensorBuffer::String(_) => {
            return Err(BackendError::UnsupportedTensor(format!(
                "input '{}': string tensors are not supported",
                input.name
            )))
        }
    };
    Ok(value)
}

fn decode_output(name: &str, dtype: Dtype, value: &DynValue) -> Result<TensorData, BackendError> {
    macro_rules! extract {
        ($t:ty, $variant:ident) => {{
            let (shape, data) = value
                .try_extract_raw_tensor::<$t>()
                .map_err(|e| BackendError::Inference(format!("output '{name}': {e}")))?;
            TensorData::new(name, shape.to_vec(), TensorBuffer::$variant(data.to_vec()))
        }};
    }

    let tensor = match dtype {
        Dtype::F32 => extract!(f32, F32),
        Dtype::F64 => extract!(f64, F64),
        Dtype::I8 => extract!(i8, I8),
        Dtype::I16 => extract!(i16, I16),
        Dtype::I32 => extract!(i32, I32),
        Dtype::I64 => extract!(i64, I64),
        Dtype::U8 => extract!(u8, U8),
        Dtype::U16 => extract!(u16, U16),
        Dtype::Bool => extract!(bool, Bool),
        Dtype::String | Dtype::Unknown => {
            return Err(BackendError::Inference(format!(
                "output '{name}' has an unsupported element type"
            )))
        }
    };
    Ok(tensor)
}
