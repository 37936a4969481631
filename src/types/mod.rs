//! Core data types shared across the gateway:
//! - `tensor`: self-describing tensor values and element types
//! - `inference`: model schemas and the request/response pair that flows
//!   through the scheduler and registry

pub mod inference;
pub mod tensor;

pub use inference::{InferenceRequest, InferenceResponse, ModelSchema};
pub use tensor::{Dtype, TensorBuffer, TensorData};
