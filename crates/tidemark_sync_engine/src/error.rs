//! Error types for the sync engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// The remote answered a request with an error status.
    #[error("remote error {status}: {message}")]
    Remote {
        /// Status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// A request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The remote speaks another protocol version.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    ProtocolMismatch {
        /// Local protocol version.
        local: u32,
        /// Remote protocol version.
        remote: u32,
    },

    /// The remote answered with something that does not fit the request.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] tidemark_sync_protocol::ProtocolError),

    /// The remote asked clients to back off.
    #[error("remote asked to back off for {seconds}s")]
    Backoff {
        /// Requested delay.
        seconds: u64,
    },

    /// The remote collection is older than the local watermark.
    #[error("remote collection was flushed: local watermark {local}, remote timestamp {remote}")]
    ServerFlushed {
        /// Local watermark.
        local: i64,
        /// Remote collection timestamp.
        remote: i64,
    },

    /// The remote changed under a paginated pull.
    #[error("pagination aborted: anchor {anchor} is no longer valid")]
    PaginationAborted {
        /// The pinned collection timestamp.
        anchor: i64,
    },

    /// A transformer failed.
    #[error("transform error: {0}")]
    Transform(String),

    /// A hook failed or broke the hook contract.
    #[error("hook error: {0}")]
    Hook(String),

    /// Record store error.
    #[error("store error: {0}")]
    Core(#[from] tidemark_core::CoreError),

    /// Storage adapter error.
    #[error("storage error: {0}")]
    Storage(#[from] tidemark_storage::StorageError),
}

impl SyncError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a transform error.
    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform(message.into())
    }

    /// Creates a hook error.
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }

    /// Returns true for failures of the transport itself: network errors,
    /// error statuses and timeouts. These abort a run.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Remote { .. } | Self::Timeout
        )
    }

    /// Returns true if simply running sync again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.is_transport() || matches!(self, Self::PaginationAborted { .. })
    }

    /// Returns true for errors confined to one record.
    #[must_use]
    pub fn is_record_level(&self) -> bool {
        match self {
            Self::Transform(_) => true,
            Self::Core(e) => e.is_invalid_record() || matches!(e, tidemark_core::CoreError::CorruptedRecord { .. }),
            _ => false,
        }
    }
}
