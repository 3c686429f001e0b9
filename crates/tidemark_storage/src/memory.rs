//! In-memory storage adapter for testing.

use crate::adapter::{Changeset, Document, PendingWrite, StorageAdapter};
use crate::error::StorageResult;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Committed contents of one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionData {
    /// Records keyed by id.
    pub records: BTreeMap<String, Document>,
    /// Collection metadata document.
    pub metadata: Option<Document>,
}

impl CollectionData {
    /// Applies a changeset to this collection.
    pub fn apply(&mut self, changes: &Changeset) {
        if changes.cleared {
            self.records.clear();
            self.metadata = None;
        }
        for (id, write) in &changes.writes {
            match write {
                PendingWrite::Put(doc) => {
                    self.records.insert(id.clone(), doc.clone());
                }
                PendingWrite::Delete => {
                    self.records.remove(id);
                }
            }
        }
        if let Some(metadata) = &changes.metadata {
            self.metadata = metadata.clone();
        }
    }

    /// Returns true if the collection holds neither records nor metadata.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.metadata.is_none()
    }
}

pub(crate) fn list_matching(
    data: Option<&CollectionData>,
    filter: &dyn Fn(&Document) -> bool,
) -> Vec<(String, Document)> {
    data.map(|data| {
        data.records
            .iter()
            .filter(|(_, doc)| filter(doc))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect()
    })
    .unwrap_or_default()
}

/// An in-memory storage adapter.
///
/// This adapter keeps everything in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// # Example
///
/// ```rust
/// use tidemark_storage::{InMemoryAdapter, StorageAdapter, StorageError};
///
/// let adapter = InMemoryAdapter::new();
/// adapter
///     .transaction("notes", |txn| {
///         txn.put("a", Default::default());
///         Ok::<_, StorageError>(())
///     })
///     .unwrap();
/// assert_eq!(adapter.record_count("notes"), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryAdapter {
    collections: RwLock<HashMap<String, CollectionData>>,
    writer: Mutex<()>,
}

impl InMemoryAdapter {
    /// Creates a new empty in-memory adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an adapter with pre-existing collections.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(collections: HashMap<String, CollectionData>) -> Self {
        Self {
            collections: RwLock::new(collections),
            writer: Mutex::new(()),
        }
    }

    /// Returns a copy of one collection's committed contents.
    #[must_use]
    pub fn snapshot(&self, collection: &str) -> CollectionData {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of committed records in a collection.
    #[must_use]
    pub fn record_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, |data| data.records.len())
    }
}

impl StorageAdapter for InMemoryAdapter {
    fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|data| data.records.get(id).cloned()))
    }

    fn list(
        &self,
        collection: &str,
        filter: &dyn Fn(&Document) -> bool,
    ) -> StorageResult<Vec<(String, Document)>> {
        Ok(list_matching(self.collections.read().get(collection), filter))
    }

    fn get_metadata(&self, collection: &str) -> StorageResult<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|data| data.metadata.clone()))
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock()
    }

    fn apply(&self, changes: Changeset) -> StorageResult<()> {
        let mut collections = self.collections.write();
        let data = collections.entry(changes.collection.clone()).or_default();
        data.apply(&changes);
        if data.is_empty() {
            collections.remove(&changes.collection);
        }
        Ok(())
    }
}
