//! Local record model.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tidemark_storage::Document;

/// Reserved field holding the record id.
pub const ID_FIELD: &str = "id";
/// Reserved field holding the local sync status.
pub const STATUS_FIELD: &str = "_status";
/// Reserved field holding the remote-assigned timestamp.
pub const LAST_MODIFIED_FIELD: &str = "last_modified";
/// All reserved fields. They never appear in [`Record::fields`].
pub const RESERVED_FIELDS: [&str; 3] = [ID_FIELD, STATUS_FIELD, LAST_MODIFIED_FIELD];

/// Local sync status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Authored locally, never pushed.
    Created,
    /// Pushed before, modified locally since.
    Updated,
    /// Deleted locally, tombstone kept until pushed.
    Deleted,
    /// Identical to the remote copy at `last_modified`.
    Synced,
}

impl RecordStatus {
    /// Returns true if the record is waiting to be pushed.
    #[must_use]
    pub fn is_pending(self) -> bool {
        self != Self::Synced
    }

    /// Returns the stored string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Synced => "synced",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            "synced" => Ok(Self::Synced),
            other => Err(CoreError::invalid_record(
                None,
                format!("unknown status {other:?}"),
            )),
        }
    }
}

/// A record of one collection.
///
/// User data lives in `fields`; the reserved fields are kept as typed
/// members and only merged back in by [`Record::to_document`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Unique id within the collection.
    pub id: String,
    /// Local sync status.
    pub status: RecordStatus,
    /// Remote timestamp of the last version this record was synced with.
    pub last_modified: Option<i64>,
    /// User fields.
    pub fields: Document,
}

impl Record {
    /// Creates a locally authored record (`created`, no timestamp).
    pub fn new(id: impl Into<String>, fields: Document) -> Self {
        Self {
            id: id.into(),
            status: RecordStatus::Created,
            last_modified: None,
            fields: strip_reserved(fields),
        }
    }

    /// Creates a record mirroring a remote version.
    pub fn synced(id: impl Into<String>, last_modified: i64, fields: Document) -> Self {
        Self {
            id: id.into(),
            status: RecordStatus::Synced,
            last_modified: Some(last_modified),
            fields: strip_reserved(fields),
        }
    }

    /// Returns the record with another status.
    #[must_use]
    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns the record with another timestamp.
    #[must_use]
    pub fn with_last_modified(mut self, last_modified: Option<i64>) -> Self {
        self.last_modified = last_modified;
        self
    }

    /// Returns true for local tombstones.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status == RecordStatus::Deleted
    }

    /// Returns true if the record is waiting to be pushed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    /// Reads a user field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Compares user content, ignoring the reserved fields and `ignored`.
    #[must_use]
    pub fn content_eq(&self, other: &Record, ignored: &[String]) -> bool {
        fields_eq(&self.fields, &other.fields, ignored)
    }

    /// Flattens the record into its stored form.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = self.fields.clone();
        doc.insert(ID_FIELD.into(), Value::String(self.id.clone()));
        doc.insert(STATUS_FIELD.into(), Value::String(self.status.as_str().into()));
        doc.insert(
            LAST_MODIFIED_FIELD.into(),
            self.last_modified.map_or(Value::Null, Value::from),
        );
        doc
    }

    /// Reads a record back from its stored form.
    ///
    /// # Errors
    ///
    /// Returns `CorruptedRecord` if a reserved field is missing or mistyped.
    pub fn from_document(mut doc: Document) -> CoreResult<Self> {
        let id = match doc.remove(ID_FIELD) {
            Some(Value::String(id)) => id,
            other => {
                return Err(CoreError::CorruptedRecord {
                    id: other.map(|v| v.to_string()).unwrap_or_default(),
                    reason: "missing or non-string id".into(),
                })
            }
        };
        let status = match doc.remove(STATUS_FIELD) {
            Some(Value::String(s)) => s.parse().map_err(|_| CoreError::CorruptedRecord {
                id: id.clone(),
                reason: format!("unknown status {s:?}"),
            })?,
            _ => {
                return Err(CoreError::CorruptedRecord {
                    id,
                    reason: "missing status".into(),
                })
            }
        };
        let last_modified = match doc.remove(LAST_MODIFIED_FIELD) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_i64().ok_or_else(|| CoreError::CorruptedRecord {
                id: id.clone(),
                reason: "non-integer last_modified".into(),
            })?),
        };
        Ok(Self {
            id,
            status,
            last_modified,
            fields: doc,
        })
    }
}

/// Removes the reserved keys from a document.
pub(crate) fn strip_reserved(mut doc: Document) -> Document {
    for key in RESERVED_FIELDS {
        doc.remove(key);
    }
    doc
}

pub(crate) fn fields_eq(a: &Document, b: &Document, ignored: &[String]) -> bool {
    let visible = |doc: &Document| {
        doc.iter()
            .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str()) && !ignored.contains(k))
            .count()
    };
    visible(a) == visible(b)
        && a.iter()
            .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str()) && !ignored.contains(k))
            .all(|(k, v)| b.get(k) == Some(v))
}
