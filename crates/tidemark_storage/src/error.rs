//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The on-disk snapshot could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The store contents are not in the expected shape.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store lock.
    #[error("store locked: another process has exclusive access to {path:?}")]
    Locked {
        /// Directory of the locked store.
        path: PathBuf,
    },
}

impl StorageError {
    /// Creates a codec error.
    pub fn codec(message: impl std::fmt::Display) -> Self {
        Self::Codec(message.to_string())
    }
}
