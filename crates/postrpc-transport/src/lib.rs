//! postrpc transport layer
//!
//! Carries JSON-RPC traffic between peers that only share a post-message
//! style bus:
//! - `hub`: the post-message primitive and an in-memory bus
//! - `handshake`: named duplex streams with a SYN/ACK/BRK handshake
//! - `multiplex`: named substreams over one handshake stream
//! - `bridge`: engines served over, and called through, substreams
//!
//! Transport faults (malformed frames, foreign traffic, orphaned substream
//! data) are logged and dropped, never raised.

pub mod bridge;
pub mod error;
pub mod handshake;
pub mod hub;
pub mod multiplex;

pub use bridge::{StreamMiddleware, serve_engine};
pub use error::{MuxError, StreamError};
pub use handshake::{
    HandshakeStream, Packet, StreamConfig, StreamHandle, StreamReader, StreamState, WireMessage,
};
pub use hub::{ANY_ORIGIN, Endpoint, Envelope, MessageHub, PeerId, PostMessage};
pub use multiplex::{Frame, Multiplexer, Substream, SubstreamReader, SubstreamWriter};
