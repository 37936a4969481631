//! Conversion between the HTTP JSON wire format and [`TensorData`].
//!
//! Request bodies look like `{"inputs": {"x": {"shape": [1, 4], "data":
//! [...], "dtype": "float32"}}}`; `data` may be flat or nested and is
//! flattened in row-major order. Responses mirror the same shape under
//! `outputs`, without the dtype (it is implied by the values).

use serde_json::{json, Map, Value};

use crate::error::ServerError;
use crate::types::{Dtype, TensorBuffer, TensorData};

/// Parse the `inputs` object of an inference request body, preserving the
/// order the caller wrote the tensors in.
pub fn parse_inputs(body: &Value) -> Result<Vec<TensorData>, ServerError> {
    let inputs = body
        .get("inputs")
        .ok_or_else(|| ServerError::bad_request("Missing 'inputs' field"))?;
    let inputs = inputs
        .as_object()
        .ok_or_else(|| ServerError::bad_request("'inputs' must be an object"))?;

    inputs
        .iter()
        .map(|(name, tensor)| parse_tensor(name, tensor))
        .collect()
}

fn parse_tensor(name: &str, tensor: &Value) -> Result<TensorData, ServerError> {
    let dtype: Dtype = tensor
        .get("dtype")
        .and_then(Value::as_str)
        .unwrap_or("float32")
        .parse()
        .unwrap_or(Dtype::Unknown);
    if dtype == Dtype::Unknown {
        return Err(ServerError::bad_request_with(
            "Unsupported tensor dtype",
            format!("input '{name}'"),
        ));
    }

    let data = tensor
        .get("data")
        .ok_or_else(|| ServerError::bad_request_with("Missing tensor data", format!("input '{name}'")))?;
    let mut leaves = Vec::new();
    flatten(data, &mut leaves);

    let buffer = build_buffer(name, dtype, &leaves)?;

    let shape: Vec<i64> = match tensor.get("shape") {
        Some(shape) => shape
            .as_array()
            .ok_or_else(|| {
                ServerError::bad_request_with("'shape' must be an array", format!("input '{name}'"))
            })?
            .iter()
            .map(|dim| {
                dim.as_i64().ok_or_else(|| {
                    ServerError::bad_request_with(
                        "'shape' must contain integers",
                        format!("input '{name}'"),
                    )
                })
            })
            .collect::<Result<_, _>>()?,
        // A flat tensor without an explicit shape is one-dimensional.
        None => vec![buffer.len() as i64],
    };

    let parsed = TensorData { name: name.to_string(), dtype, shape, data: buffer };
    if !parsed.shape_matches_data() {
        return Err(ServerError::bad_request_with(
            "Tensor shape does not match data length",
            format!(
                "input '{name}': shape implies {} elements, data has {}",
                parsed.shape_elements(),
                parsed.data.len()
            ),
        ));
    }
    Ok(parsed)
}

/// Flatten arbitrarily nested arrays in row-major order.
fn flatten<'a>(value: &'a Value, leaves: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten(item, leaves);
            }
        }
        other => leaves.push(other),
    }
}

fn build_buffer(name: &str, dtype: Dtype, leaves: &[&Value]) -> Result<TensorBuffer, ServerError> {
    let type_error = |expected: &str| {
        ServerError::bad_request_with(
            "Tensor data does not match dtype",
            format!("input '{name}': expected {expected} elements"),
        )
    };

    macro_rules! numeric {
        ($variant:ident, $get:ident, $t:ty, $expected:literal) => {{
            let values = leaves
                .iter()
                .map(|v| v.$get().map(|n| n as $t))
                .collect::<Option<Vec<$t>>>()
                .ok_or_else(|| type_error($expected))?;
            TensorBuffer::$variant(values)
        }};
    }

    let buffer = match dtype {
        Dtype::F32 => numeric!(F32, as_f64, f32, "numeric"),
        Dtype::F64 => numeric!(F64, as_f64, f64, "numeric"),
        Dtype::I8 => numeric!(I8, as_i64, i8, "integer"),
        Dtype::I16 => numeric!(I16, as_i64, i16, "integer"),
        Dtype::I32 => numeric!(I32, as_i64, i32, "integer"),
        Dtype::I64 => numeric!(I64, as_i64, i64, "integer"),
        Dtype::U8 => numeric!(U8, as_u64, u8, "unsigned integer"),
        Dtype::U16 => numeric!(U16, as_u64, u16, "unsigned integer"),
        Dtype::Bool => {
            let values = leaves
                .iter()
                .map(|v| v.as_bool())
                .collect::<Option<Vec<bool>>>()
                .ok_or_else(|| type_error("boolean"))?;
            TensorBuffer::Bool(values)
        }
        Dtype::String => {
            let values = leaves
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<String>>>()
                .ok_or_else(|| type_error("string"))?;
            TensorBuffer::String(values)
        }
        Dtype::Unknown => return Err(type_error("supported")),
    };
    Ok(buffer)
}

/// Render response outputs as `{name: {shape, data}}`.
pub fn outputs_to_json(outputs: &[TensorData]) -> Value {
    let mut object = Map::new();
    for output in outputs {
        object.insert(
            output.name.clone(),
            json!({ "shape": output.shape, "data": output.data }),
        );
    }
    Value::Object(object)
}
