//! Protocol messages exchanged with a remote collection.

use crate::record::RemoteRecord;
use serde::{Deserialize, Serialize};
use tidemark_core::Document;

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// Response status codes used in batch responses.
pub mod status {
    /// Record replaced.
    pub const OK: u16 = 200;
    /// Record created.
    pub const CREATED: u16 = 201;
    /// Malformed operation.
    pub const BAD_REQUEST: u16 = 400;
    /// Record does not exist.
    pub const NOT_FOUND: u16 = 404;
    /// A precondition did not hold.
    pub const PRECONDITION_FAILED: u16 = 412;
    /// Remote failure.
    pub const SERVER_ERROR: u16 = 500;
}

/// A request for changes of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesRequest {
    /// Only changes strictly newer than this timestamp. `None` asks for a
    /// full listing, which omits tombstones.
    pub since: Option<i64>,
    /// Only changes at or before this timestamp. Pins later pages to the
    /// collection timestamp reported by the first page.
    pub before: Option<i64>,
    /// Opaque cursor returned by the previous page.
    pub cursor: Option<String>,
    /// Maximum number of records per page.
    pub limit: Option<usize>,
    /// Remote timestamp the caller expects to read, for cache busting.
    pub expected: Option<i64>,
}

impl ChangesRequest {
    /// Request for the first page of changes after `since`.
    #[must_use]
    pub fn since(since: Option<i64>) -> Self {
        Self {
            since,
            ..Self::default()
        }
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the expected timestamp.
    #[must_use]
    pub fn with_expected(mut self, expected: Option<i64>) -> Self {
        self.expected = expected;
        self
    }

    /// Request for the page after `cursor`, pinned to `anchor`.
    #[must_use]
    pub fn next_page(&self, cursor: String, anchor: i64) -> Self {
        Self {
            cursor: Some(cursor),
            before: Some(anchor),
            ..self.clone()
        }
    }
}

/// One page of changes, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesPage {
    /// Changed records and tombstones.
    pub data: Vec<RemoteRecord>,
    /// Cursor for the next page, `None` on the last page.
    pub next: Option<String>,
    /// Collection timestamp when the page was served.
    pub timestamp: i64,
}

/// Batch operation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Create or replace.
    Put,
    /// Delete.
    Delete,
}

/// A conditional-write requirement checked by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    /// Unconditional.
    None,
    /// Create-if-absent: fails if a live record exists.
    IfNoneMatch,
    /// Modify-if-unchanged: fails unless the stored timestamp matches.
    IfMatch(i64),
}

impl Precondition {
    /// Precondition for pushing a local record with this baseline.
    ///
    /// A record with no baseline must not exist remotely; otherwise the
    /// remote must still hold the version the local edit started from.
    #[must_use]
    pub fn for_baseline(method: Method, last_modified: Option<i64>) -> Self {
        match (method, last_modified) {
            (_, Some(ts)) => Self::IfMatch(ts),
            (Method::Put, None) => Self::IfNoneMatch,
            (Method::Delete, None) => Self::None,
        }
    }
}

/// One write of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    /// Method.
    pub method: Method,
    /// Record to write; only the id is used for deletes.
    pub record: RemoteRecord,
    /// Condition the remote must check first.
    pub precondition: Precondition,
}

impl BatchOperation {
    /// Builds the operation pushing `record`.
    ///
    /// Tombstones become deletes, everything else a put. The precondition is
    /// derived from the record's baseline timestamp.
    #[must_use]
    pub fn for_record(record: RemoteRecord) -> Self {
        let method = if record.deleted {
            Method::Delete
        } else {
            Method::Put
        };
        Self {
            method,
            precondition: Precondition::for_baseline(method, record.last_modified),
            record,
        }
    }

    /// Returns the same operation with another precondition.
    #[must_use]
    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }
}

/// Body of a batch response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchBody {
    /// The record as stored after a successful write.
    pub data: Option<RemoteRecord>,
    /// The current remote record when a precondition failed. `None` when
    /// the record does not exist remotely.
    pub existing: Option<RemoteRecord>,
    /// Error message.
    pub message: Option<String>,
}

/// Outcome of one batch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Status code, see [`status`].
    pub status: u16,
    /// Response body.
    pub body: BatchBody,
}

impl BatchResponse {
    /// A successful write.
    #[must_use]
    pub fn success(status: u16, data: RemoteRecord) -> Self {
        Self {
            status,
            body: BatchBody {
                data: Some(data),
                ..BatchBody::default()
            },
        }
    }

    /// A failed precondition.
    #[must_use]
    pub fn precondition_failed(existing: Option<RemoteRecord>) -> Self {
        Self {
            status: status::PRECONDITION_FAILED,
            body: BatchBody {
                existing,
                message: Some("precondition failed".into()),
                ..BatchBody::default()
            },
        }
    }

    /// Any other error.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: BatchBody {
                message: Some(message.into()),
                ..BatchBody::default()
            },
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true for a 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status == status::NOT_FOUND
    }

    /// Returns true for a 412.
    #[must_use]
    pub fn is_precondition_failed(&self) -> bool {
        self.status == status::PRECONDITION_FAILED
    }
}

/// Result of a whole batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// One response per operation, in request order.
    pub responses: Vec<BatchResponse>,
    /// Collection timestamp right before the batch was applied.
    pub previous_timestamp: Option<i64>,
}

/// Collection metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Current collection timestamp.
    pub last_modified: i64,
    /// Collection settings.
    #[serde(default)]
    pub settings: Document,
}

/// Remote capabilities, fetched once per endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Protocol version spoken by the remote.
    pub protocol_version: u32,
    /// Maximum operations per batch.
    pub batch_max_requests: usize,
    /// Advertised capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ServerInfo {
    /// Returns true if the remote speaks `version`.
    #[must_use]
    pub fn supports(&self, version: u32) -> bool {
        self.protocol_version == version
    }

    /// Returns true if the capability is advertised.
    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c == name)
    }
}
