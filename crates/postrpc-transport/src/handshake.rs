//! Handshake stream — a named duplex channel over a post-message transport.
//!
//! Each side posts `SYN` on construction and buffers writes until the peer's
//! `ACK` arrives. A side that gets `ACK` before it has seen the peer's `SYN`
//! answers with one extra `ACK`, which resolves simultaneous opens. `BRK`
//! from the peer drops an open stream back into the handshake without
//! destroying it.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::hub::{ANY_ORIGIN, Envelope, PeerId, PostMessage};

/// Handshake control tokens and payloads as they travel on the wire.
///
/// Serialized as `"SYN"`, `"ACK"`, `"BRK"` or `{"DATA": …}`, so no payload
/// can be mistaken for a control token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Packet {
    Syn,
    Ack,
    Brk,
    Data(Value),
}

/// A packet addressed to a named stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub target: String,
    pub data: Packet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Handshaking,
    Open,
    Ended,
}

/// Handshake stream configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// This stream's name; inbound messages must target it.
    pub name: String,
    /// The peer stream's name; outbound messages target it.
    pub target: String,
    /// Origin outbound messages are restricted to, and inbound messages must
    /// come from. `"*"` accepts any origin.
    pub target_origin: String,
    /// Only accept messages from this peer, when set.
    pub target_peer: Option<PeerId>,
    /// Log every packet at debug level.
    pub log_traffic: bool,
}

impl StreamConfig {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn with_target_origin(mut self, origin: impl Into<String>) -> Self {
        self.target_origin = origin.into();
        self
    }

    pub fn with_target_peer(mut self, peer: PeerId) -> Self {
        self.target_peer = Some(peer);
        self
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            target: String::new(),
            target_origin: ANY_ORIGIN.into(),
            target_peer: None,
            log_traffic: false,
        }
    }
}

type ReaderItem = Result<Value, StreamError>;

struct Cork {
    peer_syn_seen: bool,
    buffer: VecDeque<Value>,
}

struct Shared {
    config: StreamConfig,
    transport: Arc<dyn PostMessage>,
    state: watch::Sender<StreamState>,
    cork: Mutex<Cork>,
    reader: Mutex<Option<mpsc::UnboundedSender<ReaderItem>>>,
    ended: AtomicBool,
    shutdown: Arc<Notify>,
}

impl Shared {
    fn post(&self, packet: Packet) -> Result<(), StreamError> {
        if self.config.log_traffic {
            debug!("[{} -> {}] {:?}", self.config.name, self.config.target, packet);
        }
        let message = WireMessage {
            target: self.config.target.clone(),
            data: packet,
        };
        let data = serde_json::to_value(&message).map_err(|e| StreamError::Encode(e.to_string()))?;
        self.transport.post(data, &self.config.target_origin)
    }

    fn post_or_log(&self, packet: Packet) {
        if let Err(e) = self.post(packet) {
            warn!("Stream {}: failed to post: {e}", self.config.name);
        }
    }

    fn current(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Peer identity, origin and name checks.
    fn accepts(&self, envelope: &Envelope) -> bool {
        if envelope.source == self.transport.peer_id() {
            return false;
        }
        if !envelope.deliverable_to(self.transport.origin()) {
            return false;
        }
        if self.config.target_origin != ANY_ORIGIN && envelope.origin != self.config.target_origin {
            return false;
        }
        match self.config.target_peer {
            Some(peer) => envelope.source == peer,
            None => true,
        }
    }

    fn on_envelope(&self, envelope: Envelope) {
        if !self.accepts(&envelope) {
            return;
        }
        let Ok(message) = serde_json::from_value::<WireMessage>(envelope.data) else {
            return;
        };
        if message.target != self.config.name {
            return;
        }
        if self.config.log_traffic {
            debug!("[{} <- {}] {:?}", self.config.name, envelope.source, message.data);
        }

        match (self.current(), message.data) {
            (StreamState::Ended, _) => {}
            (StreamState::Open, Packet::Data(value)) => self.deliver(Ok(value)),
            (StreamState::Open, Packet::Brk) => {
                debug!("Stream {}: peer reset, handshaking again", self.config.name);
                self.cork.lock().peer_syn_seen = false;
                self.state.send_replace(StreamState::Handshaking);
            }
            (StreamState::Open, Packet::Syn) => {
                debug!("Stream {}: peer restarted, handshaking again", self.config.name);
                self.cork.lock().peer_syn_seen = true;
                self.state.send_replace(StreamState::Handshaking);
                self.post_or_log(Packet::Ack);
            }
            (StreamState::Open, Packet::Ack) => {}
            (StreamState::Handshaking, Packet::Syn) => {
                self.cork.lock().peer_syn_seen = true;
                self.post_or_log(Packet::Ack);
            }
            (StreamState::Handshaking, Packet::Ack) => self.open(),
            (StreamState::Handshaking, Packet::Brk) => {}
            (StreamState::Handshaking, Packet::Data(_)) => {
                debug!("Stream {}: dropping payload received before open", self.config.name);
            }
        }
    }

    fn open(&self) {
        let mut cork = self.cork.lock();
        if !cork.peer_syn_seen {
            self.post_or_log(Packet::Ack);
        }
        self.state.send_replace(StreamState::Open);
        debug!("Stream {} open, flushing {} buffered", self.config.name, cork.buffer.len());
        while let Some(value) = cork.buffer.pop_front() {
            self.post_or_log(Packet::Data(value));
        }
    }

    fn deliver(&self, item: ReaderItem) {
        let reader = self.reader.lock();
        let Some(tx) = reader.as_ref() else {
            return;
        };
        if tx.send(item).is_err() {
            warn!("Stream {}: reader is gone, dropping payload", self.config.name);
        }
    }

    fn write(&self, value: Value) -> Result<(), StreamError> {
        let mut cork = self.cork.lock();
        match self.current() {
            StreamState::Ended => Err(StreamError::Ended),
            StreamState::Open => self.post(Packet::Data(value)),
            StreamState::Handshaking => {
                cork.buffer.push_back(value);
                Ok(())
            }
        }
    }

    fn finish(&self, error: Option<StreamError>) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.post_or_log(Packet::Brk);
        if let Some(error) = error {
            self.deliver(Err(error));
        }
        {
            let _cork = self.cork.lock();
            self.state.send_replace(StreamState::Ended);
        }
        self.reader.lock().take();
        self.shutdown.notify_one();
        debug!("Stream {} ended", self.config.name);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.finish(None);
    }
}

/// Inbound loop. Holds the stream weakly so dropping the last handle ends it.
async fn drive(shared: Weak<Shared>, shutdown: Arc<Notify>, mut inbox: broadcast::Receiver<Envelope>) {
    loop {
        let received = tokio::select! {
            _ = shutdown.notified() => break,
            received = inbox.recv() => received,
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match received {
            Ok(envelope) => shared.on_envelope(envelope),
            Err(RecvError::Lagged(skipped)) => {
                warn!("Stream {}: transport lagged, {skipped} messages lost", shared.config.name);
            }
            Err(RecvError::Closed) => {
                shared.finish(Some(StreamError::Transport("transport closed".into())));
                break;
            }
        }
    }
}

/// Cloneable control and write handle for a handshake stream.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<Shared>,
}

impl StreamHandle {
    /// Write a payload. Before the stream opens, payloads are buffered and
    /// flushed in order once it does.
    pub fn write(&self, value: Value) -> Result<(), StreamError> {
        self.shared.write(value)
    }

    pub fn state(&self) -> StreamState {
        self.shared.current()
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn is_ended(&self) -> bool {
        self.state() == StreamState::Ended
    }

    /// Wait until the stream is open.
    pub async fn opened(&self) -> Result<(), StreamError> {
        let mut rx = self.shared.state.subscribe();
        let state = rx
            .wait_for(|s| *s != StreamState::Handshaking)
            .await
            .map_err(|_| StreamError::Ended)?;
        match *state {
            StreamState::Open => Ok(()),
            _ => Err(StreamError::Ended),
        }
    }

    /// Break the connection locally and handshake again.
    pub fn reset(&self) {
        if self.is_ended() {
            return;
        }
        self.shared.post_or_log(Packet::Brk);
        {
            let mut cork = self.shared.cork.lock();
            cork.peer_syn_seen = false;
            self.shared.state.send_replace(StreamState::Handshaking);
        }
        self.shared.post_or_log(Packet::Syn);
    }

    /// End the stream, telling the peer with `BRK`. Idempotent.
    pub fn end(&self) {
        self.shared.finish(None);
    }

    /// End the stream with an error delivered to the reader.
    pub fn destroy(&self, error: StreamError) {
        self.shared.finish(Some(error));
    }
}

/// Reading half of a handshake stream.
pub struct StreamReader {
    rx: mpsc::UnboundedReceiver<ReaderItem>,
}

impl StreamReader {
    /// Next inbound payload; `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<ReaderItem> {
        self.rx.recv().await
    }
}

/// A named duplex stream with a SYN/ACK handshake.
///
/// Dropping the stream and every [`StreamHandle`] ends it as [`StreamHandle::end`] does.
pub struct HandshakeStream {
    handle: StreamHandle,
    reader: StreamReader,
}

impl HandshakeStream {
    /// Start a stream on `transport`. Posts `SYN` right away.
    pub fn connect<T: PostMessage>(transport: T, config: StreamConfig) -> Self {
        Self::connect_shared(Arc::new(transport), config)
    }

    pub fn connect_shared(transport: Arc<dyn PostMessage>, config: StreamConfig) -> Self {
        let (reader_tx, reader_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(StreamState::Handshaking);
        let inbox = transport.subscribe();

        let shared = Arc::new(Shared {
            config,
            transport,
            state,
            cork: Mutex::new(Cork {
                peer_syn_seen: false,
                buffer: VecDeque::new(),
            }),
            reader: Mutex::new(Some(reader_tx)),
            ended: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        });

        debug!("Stream {} handshaking with {}", shared.config.name, shared.config.target);
        tokio::spawn(drive(Arc::downgrade(&shared), shared.shutdown.clone(), inbox));
        shared.post_or_log(Packet::Syn);

        Self {
            handle: StreamHandle { shared },
            reader: StreamReader { rx: reader_rx },
        }
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }

    pub fn split(self) -> (StreamHandle, StreamReader) {
        (self.handle, self.reader)
    }

    pub fn write(&self, value: Value) -> Result<(), StreamError> {
        self.handle.write(value)
    }

    pub async fn recv(&mut self) -> Option<ReaderItem> {
        self.reader.recv().await
    }

    pub fn state(&self) -> StreamState {
        self.handle.state()
    }

    pub async fn opened(&self) -> Result<(), StreamError> {
        self.handle.opened().await
    }

    pub fn end(&self) {
        self.handle.end();
    }
}
