//! Node values

use crate::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Double,
    Integer,
    String,
    Bytes,
    Complex,
}

/// A settable / gettable node value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Double(f64),
    Integer(i64),
    String(String),
    Bytes(Vec<u8>),
    Complex { real: f64, imag: f64 },
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Double(_) => ValueType::Double,
            Value::Integer(_) => ValueType::Integer,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Complex { .. } => ValueType::Complex,
        }
    }

    /// Convert to the requested type.
    ///
    /// Double and integer convert into each other (integers are rounded), a
    /// string converts to bytes and back when it is valid UTF-8. Everything
    /// else is a [`ProtocolError::TypeMismatch`].
    pub fn coerce(self, target: ValueType) -> Result<Value, ProtocolError> {
        let actual = self.value_type();
        if actual == target {
            return Ok(self);
        }
        match (self, target) {
            (Value::Integer(v), ValueType::Double) => Ok(Value::Double(v as f64)),
            (Value::Double(v), ValueType::Integer) if v.is_finite() => {
                Ok(Value::Integer(v.round() as i64))
            },
            (Value::Double(v), ValueType::Complex) => Ok(Value::Complex { real: v, imag: 0.0 }),
            (Value::String(s), ValueType::Bytes) => Ok(Value::Bytes(s.into_bytes())),
            (Value::Bytes(b), ValueType::String) => String::from_utf8(b)
                .map(Value::String)
                .map_err(|_| ProtocolError::TypeMismatch {
                    expected: target,
                    actual,
                }),
            _ => Err(ProtocolError::TypeMismatch {
                expected: target,
                actual,
            }),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Double(v) if v.is_finite() => Some(v.round() as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Double(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{}", s),
                Err(_) => write!(f, "<{} bytes>", b.len()),
            },
            Value::Complex { real, imag } => write!(f, "{}{:+}i", real, imag),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}
