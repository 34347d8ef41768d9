//! Raw-JSON front end for the structural engine.
//!
//! Parses and validates incoming JSON, runs the engine, and turns every
//! outcome into a response envelope. This is the boundary where protocol and
//! application errors are serialized for the peer.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use postrpc_protocol::{Call, CallKind, RequestId, Response, RpcError};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::engine::JsonRpcEngine;
use crate::legacy::LegacyEngine;

/// Something that answers raw JSON-RPC input.
///
/// `None` means there is nothing to send back (a notification, or a batch of
/// only notifications).
pub trait RequestHandler: Send + Sync + 'static {
    fn handle_value(&self, raw: Value) -> impl Future<Output = Option<Value>> + Send;
}

/// Serves a [`JsonRpcEngine`] to raw JSON input.
#[derive(Clone)]
pub struct JsonRpcServer {
    engine: Arc<JsonRpcEngine>,
}

impl JsonRpcServer {
    pub fn new(engine: Arc<JsonRpcEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<JsonRpcEngine> {
        &self.engine
    }

    /// Handle a JSON text, answering unparseable input with a parse error.
    pub async fn handle_text(&self, text: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(text) {
            Ok(raw) => self.handle_raw(raw).await,
            Err(e) => {
                debug!("Unparseable input: {e}");
                Some(Response::error(None, RpcError::parse_error(format!("Parse error: {e}"))).to_value())
            }
        }
    }

    /// Handle a single call or a batch.
    pub async fn handle_raw(&self, raw: Value) -> Option<Value> {
        match raw {
            Value::Array(calls) if calls.is_empty() => Some(
                Response::error(
                    None,
                    RpcError::invalid_request("Request batch must contain plain objects. Received an empty array"),
                )
                .to_value(),
            ),
            Value::Array(calls) => {
                let responses: Vec<Value> = join_all(calls.iter().map(|raw| self.handle_one(raw)))
                    .await
                    .into_iter()
                    .flatten()
                    .map(|r| r.to_value())
                    .collect();
                (!responses.is_empty()).then_some(Value::Array(responses))
            }
            single => self.handle_one(&single).await.map(|r| r.to_value()),
        }
    }

    async fn handle_one(&self, raw: &Value) -> Option<Response> {
        match Call::parse(raw) {
            Ok(call) => self.handle_call(call).await,
            Err(error) => {
                let id = raw.get("id").and_then(RequestId::from_value);
                Some(Response::error(id, error))
            }
        }
    }

    /// Run a parsed call; notifications produce no response.
    pub async fn handle_call(&self, call: Call) -> Option<Response> {
        let method = call.method().to_string();
        let id = match call.kind() {
            CallKind::Request(id) => Some(id.clone()),
            CallKind::Notification => None,
        };

        let outcome = self.engine.handle(call).await;

        match (id, outcome) {
            (Some(id), Ok(result)) => {
                Some(Response::success(Some(id), result.unwrap_or(Value::Null)))
            }
            (Some(id), Err(e)) => {
                if e.is_protocol() {
                    error!("Protocol error handling {method}: {e}");
                }
                Some(Response::error(Some(id), e.to_rpc_error()))
            }
            (None, Ok(_)) => None,
            (None, Err(e)) => {
                warn!("Notification {method} failed: {e}");
                None
            }
        }
    }
}

impl RequestHandler for JsonRpcServer {
    async fn handle_value(&self, raw: Value) -> Option<Value> {
        self.handle_raw(raw).await
    }
}

impl RequestHandler for LegacyEngine {
    async fn handle_value(&self, raw: Value) -> Option<Value> {
        match self.handle_any(raw).await {
            Ok(output) => output,
            Err(fault) => {
                error!("Legacy engine failed: {fault}");
                None
            }
        }
    }
}

impl<T: RequestHandler> RequestHandler for Arc<T> {
    fn handle_value(&self, raw: Value) -> impl Future<Output = Option<Value>> + Send {
        (**self).handle_value(raw)
    }
}
