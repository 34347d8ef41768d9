//! Engine error taxonomy.
//!
//! [`ProtocolError`]s are composition bugs (a broken pipeline invariant) and
//! always reach the caller of `handle()`. Application failures raised by
//! middleware business logic travel as [`Fault`]s and are serialized into the
//! canonical shape at response boundaries.

use postrpc_protocol::{Fault, RequestId, RpcError, serialize};

use crate::context::ValueKind;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ContextError {
    #[error("Context key \"{0}\" already exists; delete it before setting a new value")]
    AlreadySet(String),
    #[error("Context key \"{0}\" does not exist")]
    Missing(String),
}

/// Violated pipeline invariants.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("Middleware array cannot be empty")]
    EmptyMiddleware,

    #[error("Incompatible context shapes for key \"{key}\": {first} vs {second}")]
    IncompatibleContext {
        key: String,
        first: ValueKind,
        second: ValueKind,
    },

    #[error("Engine is destroyed")]
    Destroyed,

    #[error("Nothing ended request: {method} (id {id})")]
    NothingEndedRequest { method: String, id: RequestId },

    #[error("Result returned for notification: {method}")]
    ResultForNotification { method: String },

    #[error("Middleware called next() multiple times for: {method}")]
    NextCalledTwice { method: String },

    #[error("Middleware attempted to modify illegal request property \"{field}\"")]
    IllegalModification { field: &'static str },

    #[error("JsonRpcEngine: Nothing ended request: {request}")]
    LegacyNothingEnded { request: String },

    #[error("JsonRpcEngine: Response has no error or result for request: {request}")]
    LegacyNoErrorOrResult { request: String },

    #[error("JsonRpcEngine: Middleware dropped its continuation without calling next or end")]
    ContinuationDropped,

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl ProtocolError {
    /// Canonical error shape, with the protocol error recorded as the cause.
    pub fn to_rpc_error(&self) -> RpcError {
        serialize(&Fault::from_std(self))
    }
}

/// Anything `handle()` can fail with.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("{0}")]
    Application(Fault),
}

impl EngineError {
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// The canonical error a collaborator sees.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Protocol(p) => p.to_rpc_error(),
            Self::Application(fault) => serialize(fault),
        }
    }

    /// Collapse into a fault, for boundaries that only carry faults.
    pub fn into_fault(self) -> Fault {
        match self {
            Self::Protocol(p) => Fault::from(p.to_rpc_error()),
            Self::Application(fault) => fault,
        }
    }
}

impl From<Fault> for EngineError {
    fn from(fault: Fault) -> Self {
        Self::Application(fault)
    }
}

impl From<RpcError> for EngineError {
    fn from(error: RpcError) -> Self {
        Self::Application(error.into())
    }
}

impl From<ContextError> for EngineError {
    fn from(error: ContextError) -> Self {
        Self::Protocol(error.into())
    }
}
