//! # Message Codec
//!
//! Converts typed messages to and from their wire representation.
//!
//! ## Stream wire protocol
//!
//! Messages on a stream transport are sent with a 4-byte length prefix
//! (big-endian) followed by JSON data:
//! ```text
//! [4 bytes: message length] [N bytes: JSON message data]
//! ```
//!
//! This length-prefixed protocol allows for:
//! - Variable-length messages
//! - Reliable message boundaries over TCP streams
//! - Protection against incomplete reads
//!
//! ## Datagram wire protocol
//!
//! One datagram carries exactly one JSON message body, no prefix. A packet is
//! decoded in isolation, so a malformed packet never corrupts the next one.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{NetError, Result};

/// Maximum allowed stream message size (10MB) to prevent memory exhaustion.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Largest payload that fits in a single UDP datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// Read exactly one logical message from a stream transport.
///
/// Suspends until a whole frame is available or the stream is exhausted.
///
/// # Errors
/// - [`NetError::EndOfStream`]: the peer closed cleanly at a frame boundary
/// - [`NetError::Codec`]: the stream ended inside a frame, or the body is not
///   valid JSON for `T`
/// - [`NetError::Disconnected`]: the transport dropped abruptly mid-read
/// - [`NetError::MessageTooLarge`]: the prefix announced an oversized frame
pub async fn read_stream_message<T, R>(reader: &mut R) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut length_buf = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut length_buf).await {
        return Err(classify_read_error(e, true));
    }

    let length = u32::from_be_bytes(length_buf) as usize;
    if length > MAX_MESSAGE_SIZE {
        return Err(NetError::MessageTooLarge(length, MAX_MESSAGE_SIZE));
    }

    let mut data = vec![0u8; length];
    if let Err(e) = reader.read_exact(&mut data).await {
        return Err(classify_read_error(e, false));
    }

    Ok(serde_json::from_slice(&data)?)
}

/// Write one logical message to a stream transport and flush it.
pub async fn write_stream_message<T, W>(writer: &mut W, message: &T) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let data = serde_json::to_vec(message)?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(NetError::MessageTooLarge(data.len(), MAX_MESSAGE_SIZE));
    }

    let length = data.len() as u32;
    writer.write_all(&length.to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;

    Ok(())
}

/// Encode a message as a complete datagram payload.
pub fn encode_datagram<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let data = serde_json::to_vec(message)?;
    if data.len() > MAX_DATAGRAM_SIZE {
        return Err(NetError::MessageTooLarge(data.len(), MAX_DATAGRAM_SIZE));
    }
    Ok(data)
}

/// Decode a message from a single already-received datagram.
pub fn decode_datagram<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(data)?)
}

/// Split I/O read failures into the three classes the receive loop reacts to.
///
/// EOF exactly at a frame boundary is the peer closing cleanly; EOF inside a
/// frame means the stream was cut mid-message and the framing is unrecoverable.
fn classify_read_error(err: io::Error, at_frame_boundary: bool) -> NetError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof if at_frame_boundary => NetError::EndOfStream,
        io::ErrorKind::UnexpectedEof => {
            NetError::Codec(format!("stream ended inside a frame: {}", err))
        }
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe => NetError::Disconnected(err.to_string()),
        _ => NetError::Io(err),
    }
}
