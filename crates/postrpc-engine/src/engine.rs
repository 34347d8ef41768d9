//! Structural middleware engine.
//!
//! Runs an immutable call through a fixed middleware stack. Each middleware
//! gets a [`Next`] bound to the rest of the stack; results unwind
//! innermost-first, with `None` preserving the downstream result and
//! `Some(_)` overriding it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use postrpc_protocol::{Call, CallKind};
use serde_json::Value;
use tracing::debug;

use crate::context::{Context, ValueKind};
use crate::error::{EngineError, ProtocolError};
use crate::middleware::{BoxFuture, BoxedMiddleware, Middleware, MiddlewareResult, boxed};

type Stack = Arc<[BoxedMiddleware]>;

/// Result of running the stack: the established result and the call as the
/// innermost reached middleware saw it.
type StackOutcome = Result<(Option<Value>, Arc<Call>), EngineError>;

/// Continuation handed to each middleware activation.
///
/// Cloning shares the single-use guard: across all clones, `run` succeeds at
/// most once.
#[derive(Clone)]
pub struct Next {
    inner: Arc<NextInner>,
}

struct NextInner {
    stack: Stack,
    index: usize,
    call: Arc<Call>,
    context: Context,
    called: AtomicBool,
    downstream: Mutex<Option<(Option<Value>, Arc<Call>)>>,
}

impl Next {
    fn new(stack: Stack, index: usize, call: Arc<Call>, context: Context) -> Self {
        Self {
            inner: Arc::new(NextInner {
                stack,
                index,
                call,
                context,
                called: AtomicBool::new(false),
                downstream: Mutex::new(None),
            }),
        }
    }

    /// Run the rest of the stack with the current call.
    pub async fn run(&self) -> MiddlewareResult {
        self.advance(None).await
    }

    /// Run the rest of the stack with a replacement call.
    ///
    /// The replacement must keep the current `id` and `jsonrpc`.
    pub async fn run_with(&self, call: Call) -> MiddlewareResult {
        self.advance(Some(call)).await
    }

    /// Whether the rest of the stack is empty.
    pub fn is_last(&self) -> bool {
        self.inner.index >= self.inner.stack.len()
    }

    async fn advance(&self, replacement: Option<Call>) -> MiddlewareResult {
        let inner = &self.inner;
        if inner.called.swap(true, Ordering::SeqCst) {
            return Err(ProtocolError::NextCalledTwice {
                method: inner.call.method().to_string(),
            }
            .into());
        }

        let call = match replacement {
            None => inner.call.clone(),
            Some(replacement) => {
                if replacement.id() != inner.call.id() {
                    return Err(ProtocolError::IllegalModification { field: "id" }.into());
                }
                if replacement.jsonrpc() != inner.call.jsonrpc() {
                    return Err(ProtocolError::IllegalModification { field: "jsonrpc" }.into());
                }
                Arc::new(replacement)
            }
        };

        let (result, final_call) =
            run_from(inner.stack.clone(), inner.index, call, inner.context.clone()).await?;
        *inner.downstream.lock() = Some((result.clone(), final_call));
        Ok(result)
    }

    fn take_downstream(&self) -> Option<(Option<Value>, Arc<Call>)> {
        self.inner.downstream.lock().take()
    }
}

fn run_from(stack: Stack, index: usize, call: Arc<Call>, context: Context) -> BoxFuture<'static, StackOutcome> {
    Box::pin(async move {
        let Some(middleware) = stack.get(index).cloned() else {
            return Ok((None, call));
        };

        let next = Next::new(stack, index + 1, call.clone(), context.clone());
        let returned = middleware.handle_dyn(call.clone(), context, next.clone()).await?;

        let (downstream_result, final_call) = match next.take_downstream() {
            Some((result, final_call)) => (result, final_call),
            None => (None, call),
        };

        Ok((returned.or(downstream_result), final_call))
    })
}

/// Options for [`JsonRpcEngine::handle_with`].
#[derive(Debug, Clone, Default)]
pub struct HandleOptions {
    /// Context to share with the call tree. A fresh one is created if unset.
    pub context: Option<Context>,
}

impl HandleOptions {
    pub fn with_context(context: Context) -> Self {
        Self {
            context: Some(context),
        }
    }
}

/// The structural engine.
pub struct JsonRpcEngine {
    stack: Stack,
    destroyed: AtomicBool,
}

impl JsonRpcEngine {
    /// Build an engine from a middleware list.
    ///
    /// Fails on an empty list or when two middleware declare incompatible
    /// shapes for the same context key.
    pub fn create(middleware: Vec<BoxedMiddleware>) -> Result<Self, ProtocolError> {
        if middleware.is_empty() {
            return Err(ProtocolError::EmptyMiddleware);
        }

        let mut declared: HashMap<String, ValueKind> = HashMap::new();
        for mw in &middleware {
            for key in mw.context_keys_dyn() {
                match declared.get(&key.name).copied() {
                    Some(existing) if !existing.compatible_with(key.kind) => {
                        return Err(ProtocolError::IncompatibleContext {
                            key: key.name,
                            first: existing,
                            second: key.kind,
                        });
                    }
                    Some(ValueKind::Any) | None => {
                        declared.insert(key.name, key.kind);
                    }
                    Some(_) => {}
                }
            }
        }

        debug!(
            "Engine created with middleware: {:?}",
            middleware.iter().map(|m| m.name_dyn()).collect::<Vec<_>>()
        );

        Ok(Self {
            stack: middleware.into(),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Handle a call with a fresh context.
    pub async fn handle(&self, call: Call) -> MiddlewareResult {
        self.handle_with(call, HandleOptions::default()).await
    }

    /// Handle a call.
    ///
    /// Requests must end with a result; notifications must end without one.
    pub async fn handle_with(&self, call: Call, options: HandleOptions) -> MiddlewareResult {
        self.assert_not_destroyed()?;
        let context = options.context.unwrap_or_default();
        let call = Arc::new(call);

        let (result, _) = self.run(call.clone(), context).await?;

        match (call.kind(), result) {
            (CallKind::Request(id), None) => Err(ProtocolError::NothingEndedRequest {
                method: call.method().to_string(),
                id: id.clone(),
            }
            .into()),
            (CallKind::Notification, Some(_)) => Err(ProtocolError::ResultForNotification {
                method: call.method().to_string(),
            }
            .into()),
            (_, result) => Ok(result),
        }
    }

    /// Run the stack without the request/notification result checks.
    pub(crate) async fn run(&self, call: Arc<Call>, context: Context) -> StackOutcome {
        self.assert_not_destroyed()?;
        run_from(self.stack.clone(), 0, call, context).await
    }

    /// Embed this engine as one middleware of another engine.
    ///
    /// When this engine produces no result, the outer `next` runs with the
    /// call as this engine's innermost middleware left it.
    pub fn as_middleware(self: &Arc<Self>) -> Result<BoxedMiddleware, ProtocolError> {
        self.assert_not_destroyed()?;
        Ok(boxed(EngineMiddleware {
            engine: self.clone(),
        }))
    }

    /// Destroy every middleware that holds resources, then disable the
    /// engine for good. Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Destroying engine ({} middleware)", self.stack.len());
        for mw in self.stack.iter() {
            mw.destroy_dyn().await;
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn assert_not_destroyed(&self) -> Result<(), ProtocolError> {
        if self.is_destroyed() {
            return Err(ProtocolError::Destroyed);
        }
        Ok(())
    }
}

/// Builder collecting middleware in registration order.
#[derive(Default)]
pub struct EngineBuilder {
    middleware: Vec<BoxedMiddleware>,
}

impl EngineBuilder {
    pub fn with<M: Middleware>(mut self, middleware: M) -> Self {
        self.middleware.push(boxed(middleware));
        self
    }

    pub fn with_boxed(mut self, middleware: BoxedMiddleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn build(self) -> Result<JsonRpcEngine, ProtocolError> {
        JsonRpcEngine::create(self.middleware)
    }
}

/// An engine running as a single middleware of another engine.
struct EngineMiddleware {
    engine: Arc<JsonRpcEngine>,
}

impl Middleware for EngineMiddleware {
    async fn handle(&self, call: Arc<Call>, context: Context, next: Next) -> MiddlewareResult {
        let (result, final_call) = self.engine.run(call.clone(), context).await?;
        match result {
            Some(result) => Ok(Some(result)),
            None if Arc::ptr_eq(&call, &final_call) => next.run().await,
            None => next.run_with((*final_call).clone()).await,
        }
    }

    fn name(&self) -> &str {
        "engine"
    }
}
