//! Canonical JSON-RPC error object and the standard / provider error codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard JSON-RPC 2.0 error codes, the server band, and the provider band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // JSON-RPC 2.0 standard errors
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,

    // Server errors (-32099..=-32000)
    InvalidInput,
    ResourceNotFound,
    ResourceUnavailable,
    TransactionRejected,
    MethodNotSupported,
    LimitExceeded,

    // Provider errors (1000..=4999)
    UserRejectedRequest,
    Unauthorized,
    UnsupportedMethod,
    Disconnected,
    ChainDisconnected,

    // Custom code
    Custom(i64),
}

/// Lowest code of the reserved server-error band.
pub const SERVER_ERROR_MIN: i64 = -32099;
/// Highest code of the reserved server-error band.
pub const SERVER_ERROR_MAX: i64 = -32000;
/// Application-defined provider band.
pub const PROVIDER_ERROR_MIN: i64 = 1000;
pub const PROVIDER_ERROR_MAX: i64 = 4999;

const FALLBACK_MESSAGE: &str = "Unspecified error message. This is a bug, please report it.";
const SERVER_ERROR_MESSAGE: &str = "Unspecified server error.";

impl ErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::InvalidInput => -32000,
            Self::ResourceNotFound => -32001,
            Self::ResourceUnavailable => -32002,
            Self::TransactionRejected => -32003,
            Self::MethodNotSupported => -32004,
            Self::LimitExceeded => -32005,
            Self::UserRejectedRequest => 4001,
            Self::Unauthorized => 4100,
            Self::UnsupportedMethod => 4200,
            Self::Disconnected => 4900,
            Self::ChainDisconnected => 4901,
            Self::Custom(c) => *c,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32000 => Self::InvalidInput,
            -32001 => Self::ResourceNotFound,
            -32002 => Self::ResourceUnavailable,
            -32003 => Self::TransactionRejected,
            -32004 => Self::MethodNotSupported,
            -32005 => Self::LimitExceeded,
            4001 => Self::UserRejectedRequest,
            4100 => Self::Unauthorized,
            4200 => Self::UnsupportedMethod,
            4900 => Self::Disconnected,
            4901 => Self::ChainDisconnected,
            c => Self::Custom(c),
        }
    }

    /// The fixed default message for this code.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::ParseError => {
                "Invalid JSON was received by the server. An error occurred on the server while parsing the JSON text."
            }
            Self::InvalidRequest => "The JSON sent is not a valid Request object.",
            Self::MethodNotFound => "The method does not exist / is not available.",
            Self::InvalidParams => "Invalid method parameter(s).",
            Self::InternalError => "Internal JSON-RPC error.",
            Self::InvalidInput => "Invalid input.",
            Self::ResourceNotFound => "Resource not found.",
            Self::ResourceUnavailable => "Resource unavailable.",
            Self::TransactionRejected => "Transaction rejected.",
            Self::MethodNotSupported => "Method not supported.",
            Self::LimitExceeded => "Request limit exceeded.",
            Self::UserRejectedRequest => "User rejected the request.",
            Self::Unauthorized => {
                "The requested account and/or method has not been authorized by the user."
            }
            Self::UnsupportedMethod => "The requested method is not supported by this provider.",
            Self::Disconnected => "The provider is disconnected from all chains.",
            Self::ChainDisconnected => "The provider is disconnected from the specified chain.",
            Self::Custom(c) if is_server_error(*c) => SERVER_ERROR_MESSAGE,
            Self::Custom(_) => FALLBACK_MESSAGE,
        }
    }

    pub fn is_server_error(&self) -> bool {
        is_server_error(self.code())
    }

    pub fn is_provider_error(&self) -> bool {
        (PROVIDER_ERROR_MIN..=PROVIDER_ERROR_MAX).contains(&self.code())
    }
}

fn is_server_error(code: i64) -> bool {
    (SERVER_ERROR_MIN..=SERVER_ERROR_MAX).contains(&code)
}

/// Default message for an arbitrary integer code.
pub fn message_for_code(code: i64) -> &'static str {
    ErrorCode::from_code(code).default_message()
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
            stack: None,
        }
    }

    /// An error carrying the code's fixed default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("The method \"{method}\" does not exist / is not available."),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn user_rejected() -> Self {
        Self::from_code(ErrorCode::UserRejectedRequest)
    }

    pub fn unauthorized() -> Self {
        Self::from_code(ErrorCode::Unauthorized)
    }

    pub fn disconnected() -> Self {
        Self::from_code(ErrorCode::Disconnected)
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }

    /// The `data.cause` entry, if any.
    pub fn cause(&self) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get("cause"))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error [{}]: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}
