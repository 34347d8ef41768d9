//! Adapters between the legacy and structural engines.

use std::sync::Arc;

use parking_lot::Mutex;
use postrpc_protocol::{Call, Fault};
use tracing::debug;

use crate::context::Context;
use crate::engine::{JsonRpcEngine, Next};
use crate::error::EngineError;
use crate::legacy::{
    BoxedLegacyMiddleware, Flow, LegacyEngine, PendingRequest, PendingResponse, SharedRequest,
    SharedResponse, SharedStack, run_all, run_return_handlers,
};
use crate::middleware::{Middleware, MiddlewareResult};

/// A legacy engine's stack running as one structural middleware.
pub struct LegacyAdapter {
    stack: SharedStack,
}

/// Run `engine`'s legacy stack inside a structural engine.
///
/// The adapter shares the stack, so later pushes apply to later calls.
///
/// Draft edits to `method` and `params` carry over to the structural `next`
/// when the legacy stack falls through; `id` and `jsonrpc` are always taken
/// from the incoming call. Legacy return handlers run after `next` returns
/// and see its result in the draft response.
pub fn legacy_as_v2(engine: &LegacyEngine) -> LegacyAdapter {
    LegacyAdapter {
        stack: engine.shared_stack(),
    }
}

impl Middleware for LegacyAdapter {
    async fn handle(&self, call: Arc<Call>, context: Context, next: Next) -> MiddlewareResult {
        let req: SharedRequest = Arc::new(Mutex::new(PendingRequest::from_call(&call, context)));
        let res: SharedResponse = Arc::new(Mutex::new(PendingResponse::for_request(&req.lock())));

        let stack = self.stack.read().clone();
        let walk = run_all(&req, &res, &stack).await;

        if walk.complete {
            run_return_handlers(walk.handlers).await?;
            if let Some(fault) = walk.error {
                return Err(fault.into());
            }
            return Ok(res.lock().result.clone());
        }

        let forwarded = {
            let draft = req.lock();
            call.with_method(draft.method.clone())
                .with_params(draft.params.clone())
        };
        debug!("Legacy stack fell through for {}", call.method());
        let downstream = next.run_with(forwarded).await?;

        res.lock().result = downstream;
        run_return_handlers(walk.handlers).await?;

        let draft = res.lock();
        match &draft.error {
            Some(error) => Err(EngineError::from(error.clone())),
            None => Ok(draft.result.clone()),
        }
    }

    fn name(&self) -> &str {
        "legacy"
    }
}

impl JsonRpcEngine {
    /// Run this engine as one middleware of a legacy engine.
    ///
    /// A result ends the legacy request; no result writes the final call's
    /// `method` and `params` back into the draft and continues.
    pub fn as_legacy_middleware(self: &Arc<Self>) -> BoxedLegacyMiddleware {
        let engine = self.clone();
        Arc::new(
            move |req: SharedRequest, res: SharedResponse, flow: Flow| -> Result<(), Fault> {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let (call, context) = {
                        let draft = req.lock();
                        (draft.to_call(), draft.context.clone())
                    };
                    match engine.run(Arc::new(call), context).await {
                        Ok((Some(result), _)) => {
                            res.lock().result = Some(result);
                            flow.end();
                        }
                        Ok((None, final_call)) => {
                            {
                                let mut draft = req.lock();
                                draft.method = final_call.method().to_string();
                                draft.params = final_call.params().cloned();
                            }
                            flow.next();
                        }
                        Err(error) => flow.end_with(error.into_fault()),
                    }
                });
                Ok(())
            },
        )
    }
}
