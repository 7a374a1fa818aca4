//! Transformed reply values handed back to callers.

use std::collections::HashMap;

use bytes::Bytes;

use crate::resp::RespValue;

/// A reply after its command's transform was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null bulk reply, or the "no result" sentinel of an aborted transaction
    /// nested in a pipeline.
    Nil,
    /// Status reply such as `OK`.
    Status(String),
    /// Bulk string payload.
    Bytes(Bytes),
    Integer(i64),
    Bool(bool),
    Float(f64),
    Array(Vec<Value>),
    /// Field/value map (HGETALL, CONFIG GET, INFO).
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns string content for status and UTF-8 bulk replies.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Status(text) => Some(text),
            Value::Bytes(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(data) => Some(data),
            Value::Status(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Identity conversion of a non-error raw reply.
    ///
    /// Error frames nested inside arrays are kept as status text; top-level
    /// errors are intercepted before any transform runs.
    pub fn from_resp(raw: RespValue) -> Value {
        match raw {
            RespValue::Simple(text) | RespValue::Error(text) => {
                Value::Status(String::from_utf8_lossy(&text).into_owned())
            }
            RespValue::Integer(value) => Value::Integer(value),
            RespValue::Bulk(Some(data)) => Value::Bytes(Bytes::from(data)),
            RespValue::Bulk(None) | RespValue::NullArray => Value::Nil,
            RespValue::Array(items) => Value::Array(items.into_iter().map(Value::from_resp).collect()),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}
