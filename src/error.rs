//! # Error Types
//!
//! Connection-scoped error taxonomy for the networking layer. A failure on
//! one connection never affects sibling connections or the endpoint itself.

use thiserror::Error;

/// Errors surfaced by the networking layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// The peer closed its side of the stream cleanly. This is the expected
    /// shutdown path, not a fault.
    #[error("end of stream")]
    EndOfStream,

    /// The transport dropped abruptly (reset, abort, broken pipe).
    #[error("transport disconnected: {0}")]
    Disconnected(String),

    /// Malformed or truncated payload. Fatal to a stream connection; on a
    /// datagram connection only the offending packet is discarded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A frame announced a length above [`crate::codec::MAX_MESSAGE_SIZE`].
    /// Rejected before any allocation happens.
    #[error("message too large: {0} bytes (max {1} bytes)")]
    MessageTooLarge(usize, usize),

    /// Any other I/O error (bind, connect, write, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        NetError::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NetError>;
