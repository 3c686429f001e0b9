//! Conflict model shared by the store and the sync layers.

use crate::record::Record;
use serde::{Deserialize, Serialize};

/// Where a conflict was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    /// While applying pulled remote changes over local pending edits.
    Incoming,
    /// While pushing local edits, via a failed precondition.
    Outgoing,
}

/// A local/remote divergence on one record.
///
/// At most one side is `None`. A `None` remote stands for a remote
/// deletion. A local tombstone is carried as a record with status
/// `deleted` so that a delete-then-recreate stays distinguishable from a
/// record the client never saw.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// Where the conflict was detected.
    pub conflict_type: ConflictType,
    /// The local side.
    pub local: Option<Record>,
    /// The remote side, decoded; `None` when the remote record is deleted.
    pub remote: Option<Record>,
}

impl Conflict {
    /// An incoming conflict.
    #[must_use]
    pub fn incoming(local: Option<Record>, remote: Option<Record>) -> Self {
        Self {
            conflict_type: ConflictType::Incoming,
            local,
            remote,
        }
    }

    /// An outgoing conflict.
    #[must_use]
    pub fn outgoing(local: Option<Record>, remote: Option<Record>) -> Self {
        Self {
            conflict_type: ConflictType::Outgoing,
            local,
            remote,
        }
    }

    /// Id of the conflicting record.
    #[must_use]
    pub fn id(&self) -> &str {
        self.local
            .as_ref()
            .or(self.remote.as_ref())
            .map_or("", |r| r.id.as_str())
    }

    /// Returns true if the remote side is a deletion.
    #[must_use]
    pub fn remote_deleted(&self) -> bool {
        self.remote.is_none()
    }

    /// Returns true if the local side is a tombstone (or absent).
    #[must_use]
    pub fn local_deleted(&self) -> bool {
        self.local.as_ref().map_or(true, Record::is_deleted)
    }
}
