use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use postrpc_protocol::{Fault, RequestId};
use serde_json::Value;
use tokio::sync::oneshot;

use super::{BoxedLegacyMiddleware, Flow, LegacyMiddleware, SharedRequest, SharedResponse};
use crate::ids::unique_id;

// ─── Async middleware ──────────────────────────────────────────────────

struct AsyncState {
    flow: Option<Flow>,
    done: Option<oneshot::Sender<Result<(), Fault>>>,
}

/// Awaitable `next` handed to async legacy middleware.
///
/// `run()` resolves once every middleware below this one has finished and
/// their return handlers have run, so code after it is the return handler.
/// It fails when the unwind is aborted before reaching this middleware.
#[derive(Clone)]
pub struct AsyncNext {
    state: Arc<Mutex<AsyncState>>,
}

impl AsyncNext {
    pub async fn run(&self) -> Result<(), Fault> {
        let (resume_tx, resume_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel();

        let flow = {
            let mut state = self.state.lock();
            let flow = state
                .flow
                .take()
                .ok_or_else(|| Fault::msg("Async middleware called next() more than once"))?;
            state.done = Some(done_tx);
            flow
        };

        flow.next_with(move || async move {
            let _ = resume_tx.send(());
            done_rx.await.unwrap_or(Ok(()))
        });

        // A dropped handler means the unwind never reached this middleware:
        // either nothing ended the request or a deeper handler failed.
        resume_rx
            .await
            .map_err(|_| Fault::msg("Request unwind was aborted before reaching this middleware"))
    }
}

/// Legacy middleware driven by an async closure.
pub struct AsyncMiddleware<F> {
    f: F,
}

/// Wrap an async closure as legacy middleware.
///
/// Returning without calling `next.run()` ends the request; an `Err` ends it
/// with that error, or fails the unwind if `next` already ran.
pub fn from_async<F, Fut>(f: F) -> AsyncMiddleware<F>
where
    F: Fn(SharedRequest, SharedResponse, AsyncNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Fault>> + Send + 'static,
{
    AsyncMiddleware { f }
}

impl<F, Fut> LegacyMiddleware for AsyncMiddleware<F>
where
    F: Fn(SharedRequest, SharedResponse, AsyncNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Fault>> + Send + 'static,
{
    fn handle(&self, req: SharedRequest, res: SharedResponse, flow: Flow) -> Result<(), Fault> {
        let state = Arc::new(Mutex::new(AsyncState {
            flow: Some(flow),
            done: None,
        }));
        let fut = (self.f)(req, res, AsyncNext {
            state: state.clone(),
        });

        tokio::spawn(async move {
            let outcome = fut.await;
            let (flow, done) = {
                let mut state = state.lock();
                (state.flow.take(), state.done.take())
            };
            match (flow, done) {
                (Some(flow), _) => flow.finish(outcome.err()),
                (None, Some(done)) => {
                    let _ = done.send(outcome);
                }
                (None, None) => {}
            }
        });
        Ok(())
    }
}

// ─── Scaffold ──────────────────────────────────────────────────────────

/// What a scaffold does for one method.
pub enum ScaffoldEntry {
    /// End the request with this result.
    Result(Value),
    /// Delegate to a middleware.
    Middleware(BoxedLegacyMiddleware),
}

impl From<Value> for ScaffoldEntry {
    fn from(value: Value) -> Self {
        Self::Result(value)
    }
}

/// Route by method name; methods without an entry fall through to `next`.
pub fn scaffold<K, I>(entries: I) -> impl LegacyMiddleware
where
    K: Into<String>,
    I: IntoIterator<Item = (K, ScaffoldEntry)>,
{
    let table: HashMap<String, ScaffoldEntry> =
        entries.into_iter().map(|(k, v)| (k.into(), v)).collect();

    move |req: SharedRequest, res: SharedResponse, flow: Flow| -> Result<(), Fault> {
        let method = req.lock().method.clone();
        match table.get(&method) {
            None => {
                flow.next();
                Ok(())
            }
            Some(ScaffoldEntry::Middleware(middleware)) => middleware.handle(req, res, flow),
            Some(ScaffoldEntry::Result(value)) => {
                res.lock().result = Some(value.clone());
                flow.end();
                Ok(())
            }
        }
    }
}

// ─── Id remap ──────────────────────────────────────────────────────────

/// Replace the request id with a process-unique one for the rest of the
/// stack, restoring the original on unwind.
pub fn id_remap() -> impl LegacyMiddleware {
    |req: SharedRequest, res: SharedResponse, flow: Flow| -> Result<(), Fault> {
        let fresh = Some(RequestId::Number(unique_id()));
        let original = {
            let mut draft = req.lock();
            std::mem::replace(&mut draft.id, fresh.clone())
        };
        res.lock().id = fresh;

        flow.next_with(move || async move {
            req.lock().id = original.clone();
            res.lock().id = original;
            Ok(())
        });
        Ok(())
    }
}
