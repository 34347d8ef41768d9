//! Engines over substreams.
//!
//! [`serve_engine`] answers calls arriving on a substream. [`StreamMiddleware`]
//! is the other end: a terminal middleware that forwards calls over a
//! substream and resolves them from the responses that come back.

use std::sync::Arc;

use dashmap::DashMap;
use postrpc_engine::{Context, EngineError, IdGenerator, Middleware, MiddlewareResult, Next, RequestHandler};
use postrpc_protocol::{Call, RequestId, Response, RpcError};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::multiplex::{Substream, SubstreamReader, SubstreamWriter};

/// Answer every call read from `substream` with `handler`.
///
/// Calls are handled concurrently; notifications get no reply. The task ends
/// with the substream.
pub fn serve_engine<H: RequestHandler>(handler: Arc<H>, substream: Substream) -> JoinHandle<()> {
    let (writer, mut reader) = substream.split();
    tokio::spawn(async move {
        while let Some(item) = reader.recv().await {
            let raw = match item {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Substream {} failed: {e}", writer.name());
                    break;
                }
            };
            let handler = handler.clone();
            let writer = writer.clone();
            tokio::spawn(async move {
                if let Some(response) = handler.handle_value(raw).await {
                    if let Err(e) = writer.write(response) {
                        warn!("Substream {}: could not send response: {e}", writer.name());
                    }
                }
            });
        }
        debug!("Stopped serving substream {}", writer.name());
    })
}

struct BridgeShared {
    writer: SubstreamWriter,
    pending: DashMap<i64, oneshot::Sender<Response>>,
    ids: IdGenerator,
}

impl BridgeShared {
    fn on_inbound(&self, raw: Value, notifications: &mpsc::UnboundedSender<Call>) {
        if raw.get("method").is_some() {
            match Call::parse(&raw) {
                Ok(call) if call.is_notification() => {
                    let _ = notifications.send(call);
                }
                Ok(call) => warn!("Ignoring inbound request {} on a client substream", call.method()),
                Err(e) => warn!("Dropping malformed inbound call: {e}"),
            }
            return;
        }

        let response: Response = match serde_json::from_value(raw) {
            Ok(response) => response,
            Err(e) => {
                warn!("Dropping malformed response: {e}");
                return;
            }
        };
        let Some(RequestId::Number(wire_id)) = response.id().cloned() else {
            warn!("Dropping response with unknown id");
            return;
        };
        match self.pending.remove(&wire_id) {
            Some((_, tx)) => {
                let _ = tx.send(response);
            }
            None => warn!("Dropping response for unknown request {wire_id}"),
        }
    }

    fn fail_pending(&self) {
        // Dropping the senders resolves every waiter as disconnected.
        self.pending.clear();
    }
}

/// Terminal middleware that forwards calls over a substream.
///
/// Requests travel under a fresh wire id and resolve with the peer's result
/// or error. Notifications are sent and resolve immediately. Notifications
/// from the peer are forwarded to the channel returned by [`StreamMiddleware::new`].
pub struct StreamMiddleware {
    shared: Arc<BridgeShared>,
    reader_task: JoinHandle<()>,
}

impl StreamMiddleware {
    pub fn new(substream: Substream) -> (Self, mpsc::UnboundedReceiver<Call>) {
        let (writer, reader) = substream.split();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(BridgeShared {
            writer,
            pending: DashMap::new(),
            ids: IdGenerator::new(),
        });
        let reader_task = tokio::spawn(read_loop(shared.clone(), reader, notify_tx));
        (
            Self {
                shared,
                reader_task,
            },
            notify_rx,
        )
    }

    /// Requests still waiting for a response.
    pub fn pending(&self) -> usize {
        self.shared.pending.len()
    }
}

async fn read_loop(
    shared: Arc<BridgeShared>,
    mut reader: SubstreamReader,
    notifications: mpsc::UnboundedSender<Call>,
) {
    while let Some(item) = reader.recv().await {
        match item {
            Ok(raw) => shared.on_inbound(raw, &notifications),
            Err(e) => {
                warn!("Substream {} failed: {e}", shared.writer.name());
                break;
            }
        }
    }
    shared.fail_pending();
}

impl Middleware for StreamMiddleware {
    async fn handle(&self, call: Arc<Call>, _context: Context, _next: Next) -> MiddlewareResult {
        if call.is_notification() {
            self.shared
                .writer
                .write(call.to_value())
                .map_err(|e| RpcError::disconnected().with_data(Value::String(e.to_string())))?;
            return Ok(None);
        }

        let wire_id = self.shared.ids.next_id();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(wire_id, tx);

        let outbound = call.with_id(Some(RequestId::Number(wire_id)));
        if let Err(e) = self.shared.writer.write(outbound.to_value()) {
            self.shared.pending.remove(&wire_id);
            return Err(RpcError::disconnected()
                .with_data(Value::String(e.to_string()))
                .into());
        }

        let response = rx.await.map_err(|_| EngineError::from(RpcError::disconnected()))?;
        response.into_result().map(Some).map_err(EngineError::from)
    }

    async fn destroy(&self) {
        self.reader_task.abort();
        self.shared.fail_pending();
    }

    fn name(&self) -> &str {
        "stream"
    }
}
