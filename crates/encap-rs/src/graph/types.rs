use std::fmt;

use serde::{Deserialize, Serialize};

use super::shape::PartialShape;

/// Element types carried on graph data edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    F16,
    Bf16,
    F32,
    F64,
    String,
    /// Handle to mutable state (variables, queues). Passed by reference, never copied.
    Resource,
}

impl DType {
    pub fn as_str(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::F16 => "f16",
            DType::Bf16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::String => "string",
            DType::Resource => "resource",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed attribute payload attached to nodes and node definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Type(DType),
    TypeList(Vec<DType>),
    I64List(Vec<i64>),
    Shape(PartialShape),
    ShapeList(Vec<PartialShape>),
}

impl AttrValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::I64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            AttrValue::Bytes(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<DType> {
        match self {
            AttrValue::Type(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64_list(&self) -> Option<&[i64]> {
        match self {
            AttrValue::I64List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_shape(&self) -> Option<&PartialShape> {
        match self {
            AttrValue::Shape(shape) => Some(shape),
            _ => None,
        }
    }

    pub fn as_shape_list(&self) -> Option<&[PartialShape]> {
        match self {
            AttrValue::ShapeList(shapes) => Some(shapes),
            _ => None,
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::I64(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<DType> for AttrValue {
    fn from(value: DType) -> Self {
        AttrValue::Type(value)
    }
}

impl From<Vec<DType>> for AttrValue {
    fn from(values: Vec<DType>) -> Self {
        AttrValue::TypeList(values)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(values: Vec<i64>) -> Self {
        AttrValue::I64List(values)
    }
}

impl From<PartialShape> for AttrValue {
    fn from(value: PartialShape) -> Self {
        AttrValue::Shape(value)
    }
}
