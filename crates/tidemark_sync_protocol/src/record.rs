//! Transmitted form of a record.

use serde::{Deserialize, Serialize};
use tidemark_core::{Document, Record, RecordStatus, RESERVED_FIELDS};

fn is_false(value: &bool) -> bool {
    !*value
}

/// A record as the remote side stores and sends it.
///
/// Carries no `_status`: the remote only knows live records and
/// tombstones. Tombstones carry the id, the deletion timestamp and no
/// fields. User fields travel under `data`, apart from the envelope, so
/// any user field name survives the round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Record id.
    pub id: String,
    /// Remote-assigned timestamp. Absent on records not yet accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    /// True for tombstones.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    /// User fields.
    #[serde(rename = "data", default, skip_serializing_if = "Document::is_empty")]
    pub fields: Document,
}

impl RemoteRecord {
    /// A live remote record.
    pub fn new(id: impl Into<String>, last_modified: Option<i64>, fields: Document) -> Self {
        Self {
            id: id.into(),
            last_modified,
            deleted: false,
            fields,
        }
    }

    /// A tombstone.
    pub fn tombstone(id: impl Into<String>, last_modified: Option<i64>) -> Self {
        Self {
            id: id.into(),
            last_modified,
            deleted: true,
            fields: Document::new(),
        }
    }

    /// Builds the outgoing form of a local record.
    ///
    /// Local-only fields and reserved fields are dropped; a local tombstone
    /// becomes a remote tombstone.
    #[must_use]
    pub fn from_local(record: &Record, local_fields: &[String]) -> Self {
        if record.status == RecordStatus::Deleted {
            return Self::tombstone(record.id.clone(), record.last_modified);
        }
        let fields = record
            .fields
            .iter()
            .filter(|(k, _)| !local_fields.contains(k) && !RESERVED_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self::new(record.id.clone(), record.last_modified, fields)
    }

    /// The local `synced` form of a live remote record.
    ///
    /// Returns `None` for tombstones and for records without a timestamp.
    #[must_use]
    pub fn to_record(&self) -> Option<Record> {
        match (self.deleted, self.last_modified) {
            (false, Some(ts)) => Some(Record::synced(self.id.clone(), ts, self.fields.clone())),
            _ => None,
        }
    }
}
