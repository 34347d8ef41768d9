//! Middleware for the structural engine.
//!
//! A middleware sees the immutable call, the shared context, and a [`Next`]
//! bound to the rest of the stack. It may produce a result, defer to `next`,
//! or both (post-process what `next` returned).

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use postrpc_protocol::Call;
use serde_json::Value;

use crate::context::{Context, ContextKey};
use crate::engine::Next;
use crate::error::EngineError;

/// What a middleware returns: `Ok(None)` keeps whatever the downstream
/// established, `Ok(Some(_))` overrides it.
pub type MiddlewareResult = Result<Option<Value>, EngineError>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for structural-engine middleware.
pub trait Middleware: Send + Sync + 'static {
    /// Process a call. Takes owned handles so the returned future can outlive
    /// the engine's borrow of the stack.
    fn handle(
        &self,
        call: Arc<Call>,
        context: Context,
        next: Next,
    ) -> impl Future<Output = MiddlewareResult> + Send;

    /// Release resources when the owning engine is destroyed (optional).
    fn destroy(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Context keys this middleware reads or writes, with their shapes.
    fn context_keys(&self) -> Vec<ContextKey> {
        Vec::new()
    }

    /// Middleware name for debugging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Object-safe version of [`Middleware`], implemented for every middleware.
pub trait DynMiddleware: Send + Sync {
    fn handle_dyn<'a>(
        &'a self,
        call: Arc<Call>,
        context: Context,
        next: Next,
    ) -> BoxFuture<'a, MiddlewareResult>;

    fn destroy_dyn(&self) -> BoxFuture<'_, ()>;
    fn context_keys_dyn(&self) -> Vec<ContextKey>;
    fn name_dyn(&self) -> &str;
}

impl<T: Middleware> DynMiddleware for T {
    fn handle_dyn<'a>(
        &'a self,
        call: Arc<Call>,
        context: Context,
        next: Next,
    ) -> BoxFuture<'a, MiddlewareResult> {
        Box::pin(self.handle(call, context, next))
    }

    fn destroy_dyn(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.destroy())
    }

    fn context_keys_dyn(&self) -> Vec<ContextKey> {
        self.context_keys()
    }

    fn name_dyn(&self) -> &str {
        self.name()
    }
}

/// Shared, type-erased middleware as stored in an engine stack.
pub type BoxedMiddleware = Arc<dyn DynMiddleware>;

pub fn boxed<M: Middleware>(middleware: M) -> BoxedMiddleware {
    Arc::new(middleware)
}

/// Middleware built from a closure.
pub struct FnMiddleware<F, Fut> {
    f: F,
    keys: Vec<ContextKey>,
    _future: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as middleware.
pub fn from_fn<F, Fut>(f: F) -> FnMiddleware<F, Fut>
where
    F: Fn(Arc<Call>, Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MiddlewareResult> + Send + 'static,
{
    FnMiddleware {
        f,
        keys: Vec::new(),
        _future: PhantomData,
    }
}

impl<F, Fut> FnMiddleware<F, Fut> {
    /// Declare a context key this closure relies on.
    pub fn with_context_key(mut self, key: ContextKey) -> Self {
        self.keys.push(key);
        self
    }
}

impl<F, Fut> Middleware for FnMiddleware<F, Fut>
where
    F: Fn(Arc<Call>, Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MiddlewareResult> + Send + 'static,
{
    fn handle(
        &self,
        call: Arc<Call>,
        context: Context,
        next: Next,
    ) -> impl Future<Output = MiddlewareResult> + Send {
        (self.f)(call, context, next)
    }

    fn context_keys(&self) -> Vec<ContextKey> {
        self.keys.clone()
    }

    fn name(&self) -> &str {
        "fn"
    }
}
