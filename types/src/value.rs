//! Dynamic record values and the legacy scalar subset.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::RecordError;

/// A value stored in a `MetricsRecord` or `ConfigsRecord`.
///
/// Which variants a record accepts is decided by the record on insert, not
/// by this type. Lists are expected to be homogeneous; nothing here enforces
/// that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Bytes(Vec<u8>),
    Float(f64),
    Int(i64),
    Str(String),
    List(Vec<Value>),
}

/// Discriminant of a [`Value`], used in validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Bytes,
    Float,
    Int,
    Str,
    List,
}

impl ValueKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::Bytes => "bytes",
            ValueKind::Float => "float",
            ValueKind::Int => "int",
            ValueKind::Str => "str",
            ValueKind::List => "list",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Value {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Float(_) => ValueKind::Float,
            Value::Int(_) => ValueKind::Int,
            Value::Str(_) => ValueKind::Str,
            Value::List(_) => ValueKind::List,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float view; integers widen, everything else is `None`.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<Vec<i64>> for Value {
    fn from(value: Vec<i64>) -> Self {
        Value::List(value.into_iter().map(Value::Int).collect())
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::List(value.into_iter().map(Value::Float).collect())
    }
}

impl From<Vec<bool>> for Value {
    fn from(value: Vec<bool>) -> Self {
        Value::List(value.into_iter().map(Value::Bool).collect())
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::List(value.into_iter().map(Value::Str).collect())
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

/// Scalar value of the legacy instruction/result API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    Bytes(Vec<u8>),
    Float(f64),
    Int(i64),
    Str(String),
}

impl Scalar {
    /// Convert a record value into a scalar, failing loudly for lists.
    ///
    /// `key` is only used to name the offending entry in the error.
    pub fn from_value(key: &str, value: Value) -> Result<Self, RecordError> {
        match value {
            Value::Bool(v) => Ok(Scalar::Bool(v)),
            Value::Bytes(v) => Ok(Scalar::Bytes(v)),
            Value::Float(v) => Ok(Scalar::Float(v)),
            Value::Int(v) => Ok(Scalar::Int(v)),
            Value::Str(v) => Ok(Scalar::Str(v)),
            other @ Value::List(_) => Err(RecordError::NotAScalar {
                key: key.to_string(),
                found: other.kind(),
            }),
        }
    }
}

impl From<Scalar> for Value {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Bool(v) => Value::Bool(v),
            Scalar::Bytes(v) => Value::Bytes(v),
            Scalar::Float(v) => Value::Float(v),
            Scalar::Int(v) => Value::Int(v),
            Scalar::Str(v) => Value::Str(v),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

impl From<Vec<u8>> for Scalar {
    fn from(value: Vec<u8>) -> Self {
        Scalar::Bytes(value)
    }
}
