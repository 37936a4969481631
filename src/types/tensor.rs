//! Self-describing tensor values.
//!
//! A [`TensorData`] carries a name, an element type, a shape, and exactly
//! one data buffer whose variant matches the element type. This is the
//! representation that crosses the HTTP boundary and the backend seam.

use serde::{Deserialize, Serialize};

/// Tensor element types understood by the gateway.
///
/// `Unknown` covers element types the backend reports but the gateway has
/// no buffer representation for; it may appear in a model schema but is
/// rejected when a request actually tries to run through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "float64")]
    F64,
    #[serde(rename = "int8")]
    I8,
    #[serde(rename = "int16")]
    I16,
    #[serde(rename = "int32")]
    I32,
    #[serde(rename = "int64")]
    I64,
    #[serde(rename = "uint8")]
    U8,
    #[serde(rename = "uint16")]
    U16,
    Bool,
    String,
    Unknown,
}

impl Dtype {
    /// The wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dtype::F32 => "float32",
            Dtype::F64 => "float64",
            Dtype::I8 => "int8",
            Dtype::I16 => "int16",
            Dtype::I32 => "int32",
            Dtype::I64 => "int64",
            Dtype::U8 => "uint8",
            Dtype::U16 => "uint16",
            Dtype::Bool => "bool",
            Dtype::String => "string",
            Dtype::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dtype {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "float32" => Dtype::F32,
            "float64" => Dtype::F64,
            "int8" => Dtype::I8,
            "int16" => Dtype::I16,
            "int32" => Dtype::I32,
            "int64" => Dtype::I64,
            "uint8" => Dtype::U8,
            "uint16" => Dtype::U16,
            "bool" => Dtype::Bool,
            "string" => Dtype::String,
            _ => Dtype::Unknown,
        })
    }
}

/// The single data buffer of a tensor. Exactly one variant is populated
/// and it must match the declared [`Dtype`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TensorBuffer {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    Bool(Vec<bool>),
    String(Vec<String>),
}

impl TensorBuffer {
    /// Number of elements in the buffer.
    pub fn len(&self) -> usize {
        match self {
            TensorBuffer::F32(v) => v.len(),
            TensorBuffer::F64(v) => v.len(),
            TensorBuffer::I8(v) => v.len(),
            TensorBuffer::I16(v) => v.len(),
            TensorBuffer::I32(v) => v.len(),
            TensorBuffer::I64(v) => v.len(),
            TensorBuffer::U8(v) => v.len(),
            TensorBuffer::U16(v) => v.len(),
            TensorBuffer::Bool(v) => v.len(),
            TensorBuffer::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The element type this buffer variant corresponds to.
    pub fn dtype(&self) -> Dtype {
        match self {
            TensorBuffer::F32(_) => Dtype::F32,
            TensorBuffer::F64(_) => Dtype::F64,
            TensorBuffer::I8(_) => Dtype::I8,
            TensorBuffer::I16(_) => Dtype::I16,
            TensorBuffer::I32(_) => Dtype::I32,
            TensorBuffer::I64(_) => Dtype::I64,
            TensorBuffer::U8(_) => Dtype::U8,
            TensorBuffer::U16(_) => Dtype::U16,
            TensorBuffer::Bool(_) => Dtype::Bool,
            TensorBuffer::String(_) => Dtype::String,
        }
    }
}

/// A named, typed, shaped tensor payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub name: String,
    pub dtype: Dtype,
    pub shape: Vec<i64>,
    pub data: TensorBuffer,
}

impl TensorData {
    pub fn new(name: impl Into<String>, shape: Vec<i64>, data: TensorBuffer) -> Self {
        let dtype = data.dtype();
        Self { name: name.into(), dtype, shape, data }
    }

    /// Element count implied by the shape (product of dimensions).
    pub fn shape_elements(&self) -> usize {
        self.shape.iter().product::<i64>().max(0) as usize
    }

    /// Whether `product(shape)` matches the number of buffered elements.
    pub fn shape_matches_data(&self) -> bool {
        self.shape_elements() == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_wire_names_round_trip() {
        for dtype in [
            Dtype::F32,
            Dtype::F64,
            Dtype::I8,
            Dtype::I16,
            Dtype::I32,
            Dtype::I64,
            Dtype::U8,
            Dtype::U16,
            Dtype::Bool,
            Dtype::String,
        ] {
            let parsed: Dtype = dtype.as_str().parse().unwrap();
            assert_eq!(parsed, dtype);
        }
        assert_eq!("float16".parse::<Dtype>().unwrap(), Dtype::Unknown);
    }

    #[test]
    fn shape_consistency() {
        let t = TensorData::new("x", vec![2, 3], TensorBuffer::F32(vec![0.0; 6]));
        assert_eq!(t.dtype, Dtype::F32);
        assert!(t.shape_matches_data());

        let bad = TensorData::new("x", vec![2, 4], TensorBuffer::F32(vec![0.0; 6]));
        assert!(!bad.shape_matches_data());
    }

    #[test]
    fn buffer_serializes_as_plain_array() {
        let t = TensorData::new("x", vec![3], TensorBuffer::I64(vec![1, 2, 3]));
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["data"], serde_json::json!([1, 2, 3]));
        assert_eq!(json["dtype"], "int64");
    }
}
