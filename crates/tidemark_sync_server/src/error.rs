//! Error types for the reference server.

use thiserror::Error;
use tidemark_sync_protocol::status;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors a whole request can fail with.
///
/// Per-operation batch failures are reported as statuses in the batch
/// result instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The collection changed since the pinned pagination anchor.
    #[error("collection changed: anchor {anchor}, current {current}")]
    AnchorMismatch {
        /// Anchor sent by the client.
        anchor: i64,
        /// Current collection timestamp.
        current: i64,
    },

    /// Too many operations in one batch.
    #[error("batch of {size} exceeds the limit of {max}")]
    BatchTooLarge {
        /// Operations sent.
        size: usize,
        /// Configured limit.
        max: usize,
    },
}

impl ServerError {
    /// Status code a transport would answer with.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) | ServerError::BatchTooLarge { .. } => {
                status::BAD_REQUEST
            }
            ServerError::AnchorMismatch { .. } => status::PRECONDITION_FAILED,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }
}
