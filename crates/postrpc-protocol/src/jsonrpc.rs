//! JSON-RPC 2.0 base types: calls, responses, and the request/notification
//! classifier.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request ID — either a string or integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    /// Read an id out of raw JSON. Anything but a string or integer is rejected.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => n.as_i64().map(Self::Number),
            _ => None,
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "\"{s}\""),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// A JSON-RPC call: a request when `id` is present, a notification otherwise.
///
/// Calls are values. Nothing hands out `&mut Call` once a call enters an
/// engine; the `with_*` methods build a new call and leave the original
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// Result of classifying a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind<'a> {
    Request(&'a RequestId),
    Notification,
}

impl Call {
    pub fn request(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Validate raw JSON and build a call from it.
    ///
    /// Rejects non-objects, missing / non-string / empty methods and ids that
    /// are neither strings nor integers. A missing `jsonrpc` member is filled
    /// in with `"2.0"`.
    pub fn parse(value: &Value) -> Result<Self, RpcError> {
        let Some(object) = value.as_object() else {
            return Err(RpcError::invalid_request(format!(
                "Requests must be plain objects. Received: {}",
                type_name(value)
            ))
            .with_data(serde_json::json!({ "request": value })));
        };

        let method = match object.get("method") {
            Some(Value::String(m)) if !m.is_empty() => m.clone(),
            other => {
                let received = other.map(type_name).unwrap_or("undefined");
                return Err(RpcError::invalid_request(format!(
                    "Must specify a non-empty string method. Received: {received}"
                ))
                .with_data(serde_json::json!({ "request": value })));
            }
        };

        let id = match object.get("id") {
            None => None,
            Some(raw) => Some(RequestId::from_value(raw).ok_or_else(|| {
                RpcError::invalid_request(format!(
                    "Request id must be a string or an integer. Received: {raw}"
                ))
            })?),
        };

        let jsonrpc = object
            .get("jsonrpc")
            .and_then(Value::as_str)
            .unwrap_or(JSONRPC_VERSION)
            .to_string();

        Ok(Self {
            jsonrpc,
            id,
            method,
            params: object.get("params").cloned(),
        })
    }

    pub fn jsonrpc(&self) -> &str {
        &self.jsonrpc
    }

    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    pub fn kind(&self) -> CallKind<'_> {
        match &self.id {
            Some(id) => CallKind::Request(id),
            None => CallKind::Notification,
        }
    }

    pub fn is_request(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Well-formed JSON-RPC 2.0 call.
    pub fn is_valid(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION && !self.method.is_empty()
    }

    pub fn with_method(&self, method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..self.clone()
        }
    }

    pub fn with_params(&self, params: Option<Value>) -> Self {
        Self {
            params,
            ..self.clone()
        }
    }

    pub fn with_id(&self, id: Option<RequestId>) -> Self {
        Self { id, ..self.clone() }
    }

    pub fn with_jsonrpc(&self, jsonrpc: impl Into<String>) -> Self {
        Self {
            jsonrpc: jsonrpc.into(),
            ..self.clone()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// JSON-RPC 2.0 success response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub result: Value,
}

/// JSON-RPC 2.0 error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub error: RpcError,
}

/// JSON-RPC 2.0 response (success or error), never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Error(ErrorResponse),
    Success(SuccessResponse),
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper constructors
// ─────────────────────────────────────────────────────────────────────────────

impl SuccessResponse {
    pub fn new(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result,
        }
    }
}

impl ErrorResponse {
    pub fn new(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            error,
        }
    }
}

impl Response {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self::Success(SuccessResponse::new(id, result))
    }

    pub fn error(id: Option<RequestId>, error: RpcError) -> Self {
        Self::Error(ErrorResponse::new(id, error))
    }

    /// Build a finalized response from a draft that may carry either field.
    ///
    /// An error wins over a result; a draft with neither is rejected.
    pub fn from_parts(
        id: Option<RequestId>,
        result: Option<Value>,
        error: Option<RpcError>,
    ) -> Option<Self> {
        match (result, error) {
            (_, Some(error)) => Some(Self::error(id, error)),
            (Some(result), None) => Some(Self::success(id, result)),
            (None, None) => None,
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Success(r) => r.id.as_ref(),
            Self::Error(r) => r.id.as_ref(),
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Success(r) => Some(&r.result),
            Self::Error(_) => None,
        }
    }

    pub fn error_object(&self) -> Option<&RpcError> {
        match self {
            Self::Success(_) => None,
            Self::Error(r) => Some(&r.error),
        }
    }

    pub fn into_result(self) -> Result<Value, RpcError> {
        match self {
            Self::Success(r) => Ok(r.result),
            Self::Error(r) => Err(r.error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Human-readable JSON type name, used in validation messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
