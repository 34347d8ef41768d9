//! Named substreams over one handshake stream.
//!
//! Writes on a substream travel as `{name, data}` frames. Inbound frames are
//! routed by name; frames for unset, unknown or closed names are logged and
//! dropped since either side may create its substreams first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{MuxError, StreamError};
use crate::handshake::{HandshakeStream, StreamHandle, StreamReader};

/// One multiplexed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

type Item = Result<Value, StreamError>;

enum Slot {
    Active(mpsc::UnboundedSender<Item>),
    Ignored,
}

struct MuxShared {
    physical: StreamHandle,
    channels: DashMap<String, Slot>,
    ended: AtomicBool,
    end_reason: Mutex<Option<StreamError>>,
}

impl MuxShared {
    fn route(&self, frame: Value) {
        let Some(name) = frame.get("name").and_then(Value::as_str) else {
            warn!("Multiplexer: dropping frame without a substream name");
            return;
        };
        match self.channels.get(name).as_deref() {
            Some(Slot::Ignored) => {}
            Some(Slot::Active(tx)) => {
                let data = frame.get("data").cloned().unwrap_or(Value::Null);
                if tx.send(Ok(data)).is_err() {
                    warn!("Multiplexer: substream \"{name}\" is closed, dropping frame");
                }
            }
            None => warn!("Multiplexer: orphaned data for substream \"{name}\""),
        }
    }

    /// End every substream with the physical stream's outcome.
    fn teardown(&self, error: Option<StreamError>) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.end_reason.lock() = error.clone();

        let names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, Slot::Active(tx))) = self.channels.remove(&name) {
                if let Some(error) = &error {
                    let _ = tx.send(Err(error.clone()));
                }
            }
        }
        debug!("Multiplexer ended ({})", error.map_or_else(|| "clean".to_string(), |e| e.to_string()));
    }

    fn check_open(&self, name: &str) -> Result<(), MuxError> {
        if name.is_empty() {
            return Err(MuxError::EmptyName);
        }
        if self.ended.load(Ordering::SeqCst) || self.physical.is_ended() {
            return Err(MuxError::Ended(name.to_string()));
        }
        Ok(())
    }

    fn register(&self, name: &str, slot: Slot) -> Result<(), MuxError> {
        self.check_open(name)?;
        match self.channels.entry(name.to_string()) {
            Entry::Occupied(_) => Err(MuxError::Duplicate(name.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(())
            }
        }
    }
}

async fn pump(shared: Arc<MuxShared>, mut reader: StreamReader) {
    while let Some(item) = reader.recv().await {
        match item {
            Ok(frame) => shared.route(frame),
            Err(e) => {
                shared.teardown(Some(e));
                return;
            }
        }
    }
    shared.teardown(None);
}

/// Multiplexes named substreams over a handshake stream.
///
/// Dropping the multiplexer ends the physical stream and every substream.
pub struct Multiplexer {
    shared: Arc<MuxShared>,
}

impl Multiplexer {
    pub fn new(stream: HandshakeStream) -> Self {
        let (physical, reader) = stream.split();
        let shared = Arc::new(MuxShared {
            physical,
            channels: DashMap::new(),
            ended: AtomicBool::new(false),
            end_reason: Mutex::new(None),
        });
        tokio::spawn(pump(shared.clone(), reader));
        Self { shared }
    }

    /// Register a substream. Fails on an empty or taken name, or once the
    /// multiplexer has ended.
    pub fn create_stream(&self, name: &str) -> Result<Substream, MuxError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.register(name, Slot::Active(tx))?;
        debug!("Multiplexer: created substream \"{name}\"");
        Ok(Substream {
            writer: SubstreamWriter {
                name: name.to_string(),
                shared: self.shared.clone(),
            },
            reader: SubstreamReader { rx },
        })
    }

    /// Reserve `name` so its traffic is discarded without warnings.
    pub fn ignore_stream(&self, name: &str) -> Result<(), MuxError> {
        self.shared.register(name, Slot::Ignored)
    }

    /// The underlying handshake stream.
    pub fn physical(&self) -> &StreamHandle {
        &self.shared.physical
    }

    pub fn is_ended(&self) -> bool {
        self.shared.ended.load(Ordering::SeqCst)
    }

    /// The error the physical stream ended with, if any.
    pub fn end_reason(&self) -> Option<StreamError> {
        self.shared.end_reason.lock().clone()
    }

    /// End the physical stream and every substream.
    pub fn end(&self) {
        self.shared.physical.end();
        self.shared.teardown(None);
    }

    /// Destroy the physical stream, ending every substream with `error`.
    pub fn destroy(&self, error: StreamError) {
        self.shared.physical.destroy(error.clone());
        self.shared.teardown(Some(error));
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.end();
    }
}

/// Write half of a substream.
#[derive(Clone)]
pub struct SubstreamWriter {
    name: String,
    shared: Arc<MuxShared>,
}

impl SubstreamWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn write(&self, data: Value) -> Result<(), StreamError> {
        if self.shared.ended.load(Ordering::SeqCst) {
            return Err(StreamError::Ended);
        }
        let frame = Frame {
            name: self.name.clone(),
            data,
        };
        let value = serde_json::to_value(&frame).map_err(|e| StreamError::Encode(e.to_string()))?;
        self.shared.physical.write(value)
    }
}

/// Read half of a substream.
pub struct SubstreamReader {
    rx: mpsc::UnboundedReceiver<Item>,
}

impl SubstreamReader {
    /// Next payload; `None` once the substream has ended cleanly.
    pub async fn recv(&mut self) -> Option<Item> {
        self.rx.recv().await
    }
}

/// One logical channel of a [`Multiplexer`].
pub struct Substream {
    writer: SubstreamWriter,
    reader: SubstreamReader,
}

impl Substream {
    pub fn name(&self) -> &str {
        self.writer.name()
    }

    pub fn write(&self, data: Value) -> Result<(), StreamError> {
        self.writer.write(data)
    }

    pub async fn recv(&mut self) -> Option<Item> {
        self.reader.recv().await
    }

    pub fn writer(&self) -> SubstreamWriter {
        self.writer.clone()
    }

    pub fn split(self) -> (SubstreamWriter, SubstreamReader) {
        (self.writer, self.reader)
    }
}
