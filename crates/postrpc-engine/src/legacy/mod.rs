//! Legacy callback-style engine.
//!
//! Middleware receive a shared draft request, a shared draft response, and a
//! [`Flow`] continuation on which they call exactly one of `next` or `end`,
//! either right away or later from another task. Return handlers registered
//! through `next_with` run during unwind in reverse registration order.

mod helpers;

pub use helpers::{AsyncMiddleware, AsyncNext, ScaffoldEntry, from_async, id_remap, scaffold};

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use postrpc_protocol::{Call, Fault, RequestId, Response, RpcError, serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::context::Context;
use crate::error::ProtocolError;
use crate::middleware::BoxFuture;

/// Mutable draft of the call as seen by legacy middleware.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub method: String,
    pub params: Option<Value>,
    /// Call-tree context, shared with structural engines composed in or out.
    pub context: Context,
}

impl PendingRequest {
    pub fn from_call(call: &Call, context: Context) -> Self {
        Self {
            jsonrpc: call.jsonrpc().to_string(),
            id: call.id().cloned(),
            method: call.method().to_string(),
            params: call.params().cloned(),
            context,
        }
    }

    pub fn to_call(&self) -> Call {
        let call = match &self.id {
            Some(id) => Call::request(id.clone(), self.method.clone(), self.params.clone()),
            None => Call::notification(self.method.clone(), self.params.clone()),
        };
        call.with_jsonrpc(self.jsonrpc.clone())
    }
}

/// Draft response filled in by legacy middleware.
#[derive(Debug, Clone, Default)]
pub struct PendingResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

impl PendingResponse {
    pub fn for_request(request: &PendingRequest) -> Self {
        Self {
            jsonrpc: request.jsonrpc.clone(),
            id: request.id.clone(),
            result: None,
            error: None,
        }
    }

    pub fn has_outcome(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}

pub type SharedRequest = Arc<Mutex<PendingRequest>>;
pub type SharedResponse = Arc<Mutex<PendingResponse>>;

/// Deferred unwind step registered through [`Flow::next_with`].
pub type ReturnHandler = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), Fault>> + Send>;

enum Outcome {
    Next(Option<ReturnHandler>),
    End(Option<Fault>),
}

/// Single-use continuation for one legacy middleware activation.
///
/// Consuming `self` guarantees at most one of `next`/`end` per activation.
/// Dropping it without calling either ends the request with an internal
/// error.
pub struct Flow {
    tx: oneshot::Sender<Outcome>,
}

impl Flow {
    /// Pass control to the next middleware.
    pub fn next(self) {
        let _ = self.tx.send(Outcome::Next(None));
    }

    /// Pass control on, running `handler` once the request unwinds back here.
    pub fn next_with<F, Fut>(self, handler: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Fault>> + Send + 'static,
    {
        let handler: ReturnHandler = Box::new(move || Box::pin(handler()));
        let _ = self.tx.send(Outcome::Next(Some(handler)));
    }

    /// End the request successfully (the draft must carry a result).
    pub fn end(self) {
        let _ = self.tx.send(Outcome::End(None));
    }

    /// End the request with an error.
    pub fn end_with(self, fault: impl Into<Fault>) {
        let _ = self.tx.send(Outcome::End(Some(fault.into())));
    }

    /// End with an optional error.
    pub fn finish(self, fault: Option<Fault>) {
        let _ = self.tx.send(Outcome::End(fault));
    }
}

/// Trait for legacy middleware.
///
/// `handle` returns synchronously; an `Err` is treated as `end` with that
/// error unless the flow was already used. Deferred work spawns a task that
/// owns the flow.
pub trait LegacyMiddleware: Send + Sync + 'static {
    fn handle(&self, req: SharedRequest, res: SharedResponse, flow: Flow) -> Result<(), Fault>;
}

impl<F> LegacyMiddleware for F
where
    F: Fn(SharedRequest, SharedResponse, Flow) -> Result<(), Fault> + Send + Sync + 'static,
{
    fn handle(&self, req: SharedRequest, res: SharedResponse, flow: Flow) -> Result<(), Fault> {
        self(req, res, flow)
    }
}

pub type BoxedLegacyMiddleware = Arc<dyn LegacyMiddleware>;

/// Outcome of walking the stack: the error that ended it (if any), whether
/// anything ended it, and the return handlers in unwind order.
pub(crate) struct StackWalk {
    pub error: Option<Fault>,
    pub complete: bool,
    pub handlers: Vec<ReturnHandler>,
}

async fn run_middleware(
    req: &SharedRequest,
    res: &SharedResponse,
    middleware: &BoxedLegacyMiddleware,
    handlers: &mut Vec<ReturnHandler>,
) -> (Option<Fault>, bool) {
    let (tx, mut rx) = oneshot::channel();
    let outcome = match middleware.handle(req.clone(), res.clone(), Flow { tx }) {
        Err(fault) => rx.try_recv().unwrap_or(Outcome::End(Some(fault))),
        Ok(()) => rx
            .await
            .unwrap_or_else(|_| Outcome::End(Some(ProtocolError::ContinuationDropped.to_rpc_error().into()))),
    };

    match outcome {
        Outcome::Next(handler) => {
            let existing = res.lock().error.clone();
            if let Some(error) = existing {
                return end_with(res, Some(error.into()));
            }
            if let Some(handler) = handler {
                handlers.push(handler);
            }
            (None, false)
        }
        Outcome::End(fault) => end_with(res, fault),
    }
}

fn end_with(res: &SharedResponse, fault: Option<Fault>) -> (Option<Fault>, bool) {
    let mut draft = res.lock();
    let parsed = fault.or_else(|| draft.error.clone().map(Fault::from));
    if let Some(fault) = &parsed {
        draft.error = Some(serialize(fault));
    }
    (parsed, true)
}

/// Run middleware in order until one ends the request or the stack is
/// exhausted.
pub(crate) async fn run_all(
    req: &SharedRequest,
    res: &SharedResponse,
    stack: &[BoxedLegacyMiddleware],
) -> StackWalk {
    let mut handlers = Vec::new();
    let mut error = None;
    let mut complete = false;

    for middleware in stack {
        let (fault, ended) = run_middleware(req, res, middleware, &mut handlers).await;
        if ended {
            error = fault;
            complete = true;
            break;
        }
    }

    handlers.reverse();
    StackWalk {
        error,
        complete,
        handlers,
    }
}

/// Run return handlers one at a time; the first failure aborts the rest.
pub(crate) async fn run_return_handlers(handlers: Vec<ReturnHandler>) -> Result<(), Fault> {
    for handler in handlers {
        handler().await?;
    }
    Ok(())
}

fn describe(req: &SharedRequest) -> String {
    let draft = req.lock();
    draft.to_call().to_value().to_string()
}

async fn process_request(
    req: &SharedRequest,
    res: &SharedResponse,
    stack: &[BoxedLegacyMiddleware],
) -> Result<(), Fault> {
    let walk = run_all(req, res, stack).await;

    if !res.lock().has_outcome() {
        let err = ProtocolError::LegacyNoErrorOrResult {
            request: describe(req),
        };
        return Err(RpcError::internal(err.to_string()).into());
    }
    if !walk.complete {
        let err = ProtocolError::LegacyNothingEnded {
            request: describe(req),
        };
        return Err(RpcError::internal(err.to_string()).into());
    }

    run_return_handlers(walk.handlers).await?;

    match walk.error {
        Some(fault) => Err(fault),
        None => Ok(()),
    }
}

/// A legacy stack shared between an engine and the adapters embedding it.
pub(crate) type SharedStack = Arc<RwLock<Vec<BoxedLegacyMiddleware>>>;

/// The legacy engine.
#[derive(Default)]
pub struct LegacyEngine {
    stack: SharedStack,
    notifications: Option<mpsc::UnboundedSender<Call>>,
}

impl LegacyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route notifications into `sink` instead of the middleware stack.
    pub fn with_notification_sink(mut self, sink: mpsc::UnboundedSender<Call>) -> Self {
        self.notifications = Some(sink);
        self
    }

    /// Append a middleware.
    pub fn push<M: LegacyMiddleware>(&self, middleware: M) {
        self.stack.write().push(Arc::new(middleware));
    }

    pub fn push_boxed(&self, middleware: BoxedLegacyMiddleware) {
        self.stack.write().push(middleware);
    }

    pub fn len(&self) -> usize {
        self.stack.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.read().is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<BoxedLegacyMiddleware> {
        self.stack.read().clone()
    }

    pub(crate) fn shared_stack(&self) -> SharedStack {
        self.stack.clone()
    }

    /// Handle a single raw call.
    ///
    /// Malformed input short-circuits to an invalid-request response. `None`
    /// means the call was a notification consumed by the notification sink.
    /// `Err` is reserved for failures that cannot be expressed as a response.
    pub async fn handle(&self, raw: Value) -> Result<Option<Response>, Fault> {
        let call = match Call::parse(&raw) {
            Ok(call) => call,
            Err(error) => {
                debug!("Rejecting malformed call: {error}");
                let id = raw.get("id").and_then(RequestId::from_value);
                return Ok(Some(Response::error(id, error)));
            }
        };
        self.handle_call(call).await
    }

    /// Handle a well-formed call.
    pub async fn handle_call(&self, call: Call) -> Result<Option<Response>, Fault> {
        if call.is_notification() {
            if let Some(sink) = &self.notifications {
                sink.send(call)
                    .map_err(|_| Fault::msg("Notification sink is closed"))?;
                return Ok(None);
            }
        }

        let req = Arc::new(Mutex::new(PendingRequest::from_call(&call, Context::new())));
        let res = Arc::new(Mutex::new(PendingResponse::for_request(&req.lock())));
        let stack = self.snapshot();

        if let Err(fault) = process_request(&req, &res, &stack).await {
            let mut draft = res.lock();
            draft.result = None;
            if draft.error.is_none() {
                draft.error = Some(serialize(&fault));
            }
        }

        let draft = res.lock();
        let response = Response::from_parts(draft.id.clone(), draft.result.clone(), draft.error.clone())
            .unwrap_or_else(|| Response::error(draft.id.clone(), RpcError::internal("Response has no error or result")));
        Ok(Some(response))
    }

    /// Handle a batch; the batch fails as a whole on the first failure that
    /// produced no response.
    pub async fn handle_batch(&self, calls: Vec<Value>) -> Result<Vec<Response>, Fault> {
        self.handle_each(calls).await.into_iter().filter_map(Result::transpose).collect()
    }

    /// Handle a batch element by element; each element fails on its own.
    pub async fn handle_each(&self, calls: Vec<Value>) -> Vec<Result<Option<Response>, Fault>> {
        if calls.is_empty() {
            return vec![Ok(Some(Response::error(
                None,
                RpcError::invalid_request("Request batch must contain plain objects. Received an empty array"),
            )))];
        }
        join_all(calls.into_iter().map(|call| self.handle(call))).await
    }

    /// Handle either a single call or a batch, returning serialized output.
    pub async fn handle_any(&self, raw: Value) -> Result<Option<Value>, Fault> {
        match raw {
            Value::Array(calls) => {
                let responses = self.handle_batch(calls).await?;
                if responses.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Value::Array(responses.iter().map(Response::to_value).collect())))
            }
            single => Ok(self.handle(single).await?.map(|r| r.to_value())),
        }
    }

    /// Embed this engine as one middleware of another legacy engine.
    ///
    /// Middleware pushed later are seen by calls that start after the push.
    pub fn as_middleware(&self) -> BoxedLegacyMiddleware {
        let shared = self.shared_stack();
        Arc::new(move |req: SharedRequest, res: SharedResponse, flow: Flow| -> Result<(), Fault> {
            let stack = shared.read().clone();
            tokio::spawn(async move {
                let walk = run_all(&req, &res, &stack).await;
                if walk.complete {
                    match run_return_handlers(walk.handlers).await {
                        Err(fault) => flow.end_with(fault),
                        Ok(()) => flow.finish(walk.error),
                    }
                    return;
                }
                let handlers = walk.handlers;
                flow.next_with(move || run_return_handlers(handlers));
            });
            Ok(())
        })
    }
}
