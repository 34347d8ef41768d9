//! Arbitrary failure values raised by middleware business logic.
//!
//! A [`Fault`] is whatever a middleware wants to fail with. It is turned into
//! the canonical [`RpcError`] shape by [`crate::serialize::serialize_error`]
//! at the boundary where a response has to be produced.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::RpcError;

/// Capability for values that know their own canonical error shape.
///
/// The serializer uses the result verbatim.
pub trait SerializeError: std::fmt::Debug + Send + Sync {
    fn serialize_error(&self) -> RpcError;
}

impl SerializeError for RpcError {
    fn serialize_error(&self) -> RpcError {
        self.clone()
    }
}

/// A native error: a message, a textual stack, and any extra own fields.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeError {
    pub message: String,
    pub stack: Option<String>,
    pub fields: Map<String, Value>,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let stack = format!("Error: {message}");
        Self {
            message,
            stack: Some(stack),
            fields: Map::new(),
        }
    }

    /// Capture a std error, recording its source chain as the stack.
    pub fn from_std(error: &(dyn std::error::Error + 'static)) -> Self {
        let message = error.to_string();
        let mut stack = format!("Error: {message}");
        let mut source = error.source();
        while let Some(inner) = source {
            stack.push_str(&format!("\n    caused by: {inner}"));
            source = inner.source();
        }
        Self {
            message,
            stack: Some(stack),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn without_stack(mut self) -> Self {
        self.stack = None;
        self
    }
}

/// Anything a middleware can fail with.
#[derive(Debug, Clone)]
pub enum Fault {
    /// A value that serializes itself.
    Serializable(Arc<dyn SerializeError>),
    /// Arbitrary JSON.
    Value(Value),
    /// A native error with message and stack.
    Native(NativeError),
}

impl Fault {
    /// Shorthand for a native error with the given message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Native(NativeError::new(message))
    }

    pub fn from_std(error: &(dyn std::error::Error + 'static)) -> Self {
        Self::Native(NativeError::from_std(error))
    }

    pub fn serializable(value: impl SerializeError + 'static) -> Self {
        Self::Serializable(Arc::new(value))
    }

    /// The message a reader would see for this fault.
    pub fn message(&self) -> String {
        match self {
            Self::Serializable(s) => s.serialize_error().message,
            Self::Native(n) => n.message.clone(),
            Self::Value(v) => v
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| v.to_string()),
        }
    }
}

impl From<RpcError> for Fault {
    fn from(error: RpcError) -> Self {
        Self::Serializable(Arc::new(error))
    }
}

impl From<Value> for Fault {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<NativeError> for Fault {
    fn from(error: NativeError) -> Self {
        Self::Native(error)
    }
}

impl From<serde_json::Error> for Fault {
    fn from(error: serde_json::Error) -> Self {
        Self::from_std(&error)
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for Fault {}
