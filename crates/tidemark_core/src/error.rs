//! Error types for tidemark core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in record store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage adapter error.
    #[error("storage error: {0}")]
    Storage(#[from] tidemark_storage::StorageError),

    /// The record failed id or shape validation.
    #[error("invalid record {id:?}: {reason}")]
    InvalidRecord {
        /// Id of the offending record, when known.
        id: Option<String>,
        /// What was wrong with it.
        reason: String,
    },

    /// No live record with this id exists.
    #[error("record not found: {id} in collection {collection}")]
    NotFound {
        /// The collection searched.
        collection: String,
        /// The record id that was not found.
        id: String,
    },

    /// The query filters or sorts on a field the collection does not declare.
    #[error("invalid query: field {field:?} is not queryable")]
    InvalidQuery {
        /// The rejected field.
        field: String,
    },

    /// A stored document could not be read back as a record.
    #[error("corrupted record {id:?}: {reason}")]
    CorruptedRecord {
        /// Storage key of the document.
        id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The store configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoreError {
    /// Creates an invalid record error.
    pub fn invalid_record(id: Option<&str>, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            id: id.map(str::to_owned),
            reason: reason.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Returns true if this error is a `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this error is an `InvalidRecord`.
    #[must_use]
    pub fn is_invalid_record(&self) -> bool {
        matches!(self, Self::InvalidRecord { .. })
    }
}
