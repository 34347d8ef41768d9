//! Post-message primitive and an in-memory hub implementing it.
//!
//! A hub behaves like a shared message bus: every endpoint sees every posted
//! message, tagged with the sender's peer id and origin. Endpoints decide for
//! themselves what to accept.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::error::StreamError;

/// Wildcard target origin: deliverable to every origin.
pub const ANY_ORIGIN: &str = "*";

const HUB_CAPACITY: usize = 1024;

/// Identity of one endpoint on a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One message as every endpoint sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub source: PeerId,
    pub origin: String,
    pub target_origin: String,
    pub data: Value,
}

impl Envelope {
    /// Whether an endpoint with `origin` may receive this message.
    pub fn deliverable_to(&self, origin: &str) -> bool {
        self.target_origin == ANY_ORIGIN || self.target_origin == origin
    }
}

/// The raw transport a handshake stream runs on.
pub trait PostMessage: Send + Sync + 'static {
    fn peer_id(&self) -> PeerId;
    fn origin(&self) -> &str;

    /// Post `data` for endpoints whose origin matches `target_origin`.
    fn post(&self, data: Value, target_origin: &str) -> Result<(), StreamError>;

    /// Receive everything posted on the transport from now on.
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;
}

/// In-memory bus connecting any number of endpoints.
#[derive(Clone)]
pub struct MessageHub {
    tx: broadcast::Sender<Envelope>,
}

impl MessageHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    /// A new endpoint with a fresh peer id.
    pub fn endpoint(&self, origin: impl Into<String>) -> Endpoint {
        Endpoint {
            id: PeerId::new(),
            origin: origin.into(),
            tx: self.tx.clone(),
        }
    }

    /// Inject an envelope as if some endpoint had posted it.
    pub fn inject(&self, envelope: Envelope) {
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

impl Default for MessageHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One participant on a [`MessageHub`].
#[derive(Clone)]
pub struct Endpoint {
    id: PeerId,
    origin: String,
    tx: broadcast::Sender<Envelope>,
}

impl PostMessage for Endpoint {
    fn peer_id(&self) -> PeerId {
        self.id
    }

    fn origin(&self) -> &str {
        &self.origin
    }

    fn post(&self, data: Value, target_origin: &str) -> Result<(), StreamError> {
        let envelope = Envelope {
            source: self.id,
            origin: self.origin.clone(),
            target_origin: target_origin.to_string(),
            data,
        };
        // No subscribers only means nobody is listening yet.
        if self.tx.send(envelope).is_err() {
            debug!("Posted with no listeners from {}", self.id);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}
