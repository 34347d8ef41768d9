//! postrpc — Protocol Types
//!
//! JSON-RPC 2.0 types shared by the engines and the transport.
//! This crate is the single source of truth for the call / response shapes,
//! the canonical error codes, and the error serializer.

pub mod error;
pub mod fault;
pub mod jsonrpc;
pub mod serialize;

pub use error::{ErrorCode, RpcError, message_for_code};
pub use fault::{Fault, NativeError, SerializeError};
pub use jsonrpc::{
    Call, CallKind, ErrorResponse, JSONRPC_VERSION, RequestId, Response, SuccessResponse,
};
pub use serialize::{
    InvalidFallback, SerializeOptions, is_valid_error_shape, sanitize_cause, serialize,
    serialize_error,
};
