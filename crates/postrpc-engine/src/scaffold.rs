//! Method-table middleware for the structural engine.

use std::collections::HashMap;
use std::sync::Arc;

use postrpc_protocol::Call;
use serde_json::Value;

use crate::context::Context;
use crate::engine::Next;
use crate::middleware::{BoxedMiddleware, Middleware, MiddlewareResult, boxed};

enum Route {
    Result(Value),
    Middleware(BoxedMiddleware),
}

/// Maps method names to a fixed result or a handler middleware. Methods
/// without an entry fall through to `next`.
#[derive(Default)]
pub struct Scaffold {
    routes: HashMap<String, Route>,
}

impl Scaffold {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method` with `result`.
    pub fn with_result(mut self, method: impl Into<String>, result: Value) -> Self {
        self.routes.insert(method.into(), Route::Result(result));
        self
    }

    /// Hand `method` to `middleware`, which receives the same `next`.
    pub fn with_middleware<M: Middleware>(mut self, method: impl Into<String>, middleware: M) -> Self {
        self.routes
            .insert(method.into(), Route::Middleware(boxed(middleware)));
        self
    }

    pub fn handles(&self, method: &str) -> bool {
        self.routes.contains_key(method)
    }
}

impl Middleware for Scaffold {
    async fn handle(&self, call: Arc<Call>, context: Context, next: Next) -> MiddlewareResult {
        match self.routes.get(call.method()) {
            None => next.run().await,
            Some(Route::Result(value)) => Ok(Some(value.clone())),
            Some(Route::Middleware(middleware)) => middleware.handle_dyn(call, context, next).await,
        }
    }

    async fn destroy(&self) {
        for route in self.routes.values() {
            if let Route::Middleware(middleware) = route {
                middleware.destroy_dyn().await;
            }
        }
    }

    fn name(&self) -> &str {
        "scaffold"
    }
}
