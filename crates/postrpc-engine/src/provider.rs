//! Provider-style calling conventions over a structural engine.

use std::sync::Arc;

use postrpc_protocol::{Call, CallKind, RequestId, Response, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::JsonRpcEngine;
use crate::ids::IdGenerator;

/// Arguments to [`Provider::request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArgs {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestArgs {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Wraps an engine so callers see either a JSON value or a canonical error.
#[derive(Clone)]
pub struct Provider {
    engine: Arc<JsonRpcEngine>,
    ids: Arc<IdGenerator>,
}

impl Provider {
    pub fn new(engine: Arc<JsonRpcEngine>) -> Self {
        Self {
            engine,
            ids: Arc::new(IdGenerator::new()),
        }
    }

    pub fn engine(&self) -> &Arc<JsonRpcEngine> {
        &self.engine
    }

    /// Run `call`; notifications resolve to `None`.
    pub async fn send_async(&self, call: Call) -> Result<Option<Value>, RpcError> {
        self.engine.handle(call).await.map_err(|e| e.to_rpc_error())
    }

    /// Run `call` and wrap the outcome in a response envelope carrying the
    /// caller's id unchanged.
    pub async fn send(&self, call: Call) -> Response {
        let id = match call.kind() {
            CallKind::Request(id) => Some(id.clone()),
            CallKind::Notification => None,
        };
        match self.send_async(call).await {
            Ok(result) => Response::success(id, result.unwrap_or(Value::Null)),
            Err(error) => Response::error(id, error),
        }
    }

    /// Issue a request under a fresh id.
    pub async fn request(&self, args: RequestArgs) -> Result<Value, RpcError> {
        let id = RequestId::Number(self.ids.next_id());
        let call = Call::request(id, args.method, args.params);
        let result = self.send_async(call).await?;
        Ok(result.unwrap_or(Value::Null))
    }
}
