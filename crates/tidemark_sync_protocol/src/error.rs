//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// The bytes are not a valid message.
    #[error("decode error: {0}")]
    Decode(String),
}
