//! Error serializer: normalizes any [`Fault`] into the canonical
//! `{code, message, data?, stack?}` shape.

use serde_json::{Map, Value, json};

use crate::error::{ErrorCode, RpcError};
use crate::fault::{Fault, NativeError};

/// Keys never copied into a sanitized cause.
const FORBIDDEN_KEYS: [&str; 2] = ["__proto__", "constructor"];

/// Options for [`serialize_error`].
#[derive(Debug, Clone)]
pub struct SerializeOptions {
    /// Shape used when the fault is not already canonical.
    pub fallback: RpcError,
    /// Keep the top-level `stack` field.
    pub include_stack: bool,
    /// Replace the fallback message with the fault's own non-empty message.
    pub preserve_message: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            fallback: RpcError::from_code(ErrorCode::InternalError),
            include_stack: true,
            preserve_message: true,
        }
    }
}

impl SerializeOptions {
    pub fn without_stack(mut self) -> Self {
        self.include_stack = false;
        self
    }

    pub fn with_fallback(mut self, fallback: RpcError) -> Self {
        self.fallback = fallback;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Must provide fallback error with integer number code and string message.")]
pub struct InvalidFallback;

/// Serialize with default options. The default fallback is always valid.
pub fn serialize(fault: &Fault) -> RpcError {
    build_error(fault, &SerializeOptions::default())
}

/// Serialize a fault into its canonical error shape.
///
/// The fallback is validated before anything else is looked at.
pub fn serialize_error(fault: &Fault, options: &SerializeOptions) -> Result<RpcError, InvalidFallback> {
    if options.fallback.message.is_empty() {
        return Err(InvalidFallback);
    }
    let mut serialized = build_error(fault, options);
    if !options.include_stack {
        serialized.stack = None;
    }
    Ok(serialized)
}

fn build_error(fault: &Fault, options: &SerializeOptions) -> RpcError {
    match fault {
        Fault::Serializable(s) => s.serialize_error(),
        Fault::Value(value) => match as_error_shape(value) {
            Some(error) => error,
            None => with_cause(
                &options.fallback,
                original_message(value).filter(|_| options.preserve_message),
                sanitize_cause(value),
            ),
        },
        Fault::Native(native) => with_cause(
            &options.fallback,
            Some(native.message.as_str())
                .filter(|m| options.preserve_message && !m.is_empty()),
            native_cause(native),
        ),
    }
}

fn with_cause(fallback: &RpcError, message: Option<&str>, cause: Value) -> RpcError {
    RpcError {
        code: fallback.code,
        message: message.map(str::to_string).unwrap_or_else(|| fallback.message.clone()),
        data: Some(json!({ "cause": cause })),
        stack: fallback.stack.clone(),
    }
}

fn original_message(value: &Value) -> Option<&str> {
    value
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
}

fn native_cause(native: &NativeError) -> Value {
    let mut cause = Map::new();
    for (key, value) in &native.fields {
        if !FORBIDDEN_KEYS.contains(&key.as_str()) {
            cause.insert(key.clone(), sanitize_cause(value));
        }
    }
    cause.insert("message".into(), Value::String(native.message.clone()));
    if let Some(stack) = &native.stack {
        cause.insert("stack".into(), Value::String(stack.clone()));
    }
    Value::Object(cause)
}

/// Whether a raw value already has the canonical error shape:
/// integer `code`, non-empty string `message`, optional string `stack`.
pub fn is_valid_error_shape(value: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    let code_ok = object.get("code").is_some_and(|c| c.as_i64().is_some());
    let message_ok = object
        .get("message")
        .and_then(Value::as_str)
        .is_some_and(|m| !m.is_empty());
    let stack_ok = object.get("stack").is_none_or(Value::is_string);
    code_ok && message_ok && stack_ok
}

fn as_error_shape(value: &Value) -> Option<RpcError> {
    if !is_valid_error_shape(value) {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

/// JSON-sanitized copy of a cause value.
///
/// Strips `__proto__` and `constructor` keys at every depth. Applying it to
/// its own output is a no-op.
pub fn sanitize_cause(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .iter()
                .filter(|(key, _)| !FORBIDDEN_KEYS.contains(&key.as_str()))
                .map(|(key, inner)| (key.clone(), sanitize_cause(inner)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_cause).collect()),
        other => other.clone(),
    }
}
