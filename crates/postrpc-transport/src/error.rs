/// Errors surfaced on a handshake stream or substream reader/writer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Stream has ended")]
    Ended,

    #[error("Stream destroyed: {0}")]
    Destroyed(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

/// Multiplexer registration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MuxError {
    #[error("Invalid substream name: name must be a non-empty string")]
    EmptyName,

    #[error("Substream \"{0}\" already registered")]
    Duplicate(String),

    #[error("Multiplexer has ended; cannot register \"{0}\"")]
    Ended(String),
}
