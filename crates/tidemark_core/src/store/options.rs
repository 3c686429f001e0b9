//! Per-operation options for the record store.

use crate::record::Record;
use serde::{Deserialize, Serialize};

/// Options for [`super::RecordStore::create`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Store the record as already synced. Requires a `last_modified`.
    pub synced: bool,
}

/// Options for [`super::RecordStore::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Merge the given fields into the existing record instead of replacing
    /// its user fields.
    pub patch: bool,
    /// Create the record when it does not exist.
    pub upsert: bool,
}

impl UpdateOptions {
    /// Merge semantics.
    #[must_use]
    pub fn patch() -> Self {
        Self {
            patch: true,
            upsert: false,
        }
    }

    /// Replace-or-create semantics.
    #[must_use]
    pub fn upsert() -> Self {
        Self {
            patch: false,
            upsert: true,
        }
    }
}

/// Options for [`super::RecordStore::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Keep a tombstone for records known remotely. `false` removes the
    /// record outright, which the next sync will not propagate.
    pub virtual_delete: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            virtual_delete: true,
        }
    }
}

/// Options for [`super::RecordStore::get`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Return tombstones instead of failing with `NotFound`.
    pub include_deleted: bool,
}

/// Options for [`super::RecordStore::list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Include tombstones in the listing.
    pub include_deleted: bool,
}

/// Result of an update: the previous and the new version.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// The record before the update; `None` for an upsert that created it.
    pub old: Option<Record>,
    /// The record as stored.
    pub new: Record,
}

/// The collection metadata document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    /// Collection name.
    pub name: String,
    /// Watermark of the last sync; `None` means never synced.
    pub last_modified: Option<i64>,
}
