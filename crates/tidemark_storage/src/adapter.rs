//! Storage adapter trait and scoped write transactions.

use crate::error::{StorageError, StorageResult};
use parking_lot::MutexGuard;
use std::collections::BTreeMap;

/// A stored document: a JSON object.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Represents a pending write in a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    /// Insert or replace a document.
    Put(Document),
    /// Delete a document.
    Delete,
}

/// Everything a transaction wants to change in one collection.
///
/// Adapters receive a changeset from [`StorageAdapter::transaction`] and must
/// apply it atomically: either every write lands or none does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    /// Target collection.
    pub collection: String,
    /// Drop every record and the metadata before applying `writes`.
    pub cleared: bool,
    /// Record writes keyed by record id.
    pub writes: BTreeMap<String, PendingWrite>,
    /// Metadata write. `Some(None)` removes the metadata document.
    pub metadata: Option<Option<Document>>,
}

impl Changeset {
    /// Creates an empty changeset for a collection.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    /// Returns true if applying this changeset would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.cleared && self.writes.is_empty() && self.metadata.is_none()
    }
}

/// A document/key-value backend for tidemark.
///
/// Records live in a keyspace addressed by `(collection, id)`; each
/// collection also owns one metadata document.
///
/// # Invariants
///
/// - Read methods only observe committed state
/// - `apply` is atomic per changeset
/// - At most one [`Transaction`] is open per adapter at a time
///
/// # Implementors
///
/// - [`super::InMemoryAdapter`] - For testing
/// - [`super::FileAdapter`] - For persistent storage
pub trait StorageAdapter: Send + Sync {
    /// Reads one committed record.
    fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Document>>;

    /// Lists committed records of a collection that satisfy `filter`.
    ///
    /// The filter runs while iterating so rejected documents are never
    /// cloned. Results are ordered by record id.
    fn list(
        &self,
        collection: &str,
        filter: &dyn Fn(&Document) -> bool,
    ) -> StorageResult<Vec<(String, Document)>>;

    /// Reads the committed metadata document of a collection.
    fn get_metadata(&self, collection: &str) -> StorageResult<Option<Document>>;

    /// Acquires the adapter-wide writer lock.
    ///
    /// The lock is not reentrant: opening a transaction from inside a
    /// transaction closure deadlocks.
    fn write_lock(&self) -> MutexGuard<'_, ()>;

    /// Applies a changeset atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the changes could not be made durable. In that
    /// case the committed state must be left as it was.
    fn apply(&self, changes: Changeset) -> StorageResult<()>;

    /// Runs `f` inside a scoped write transaction on `collection`.
    ///
    /// Buffered writes are applied when `f` returns `Ok`; if `f` returns
    /// `Err` nothing is written.
    fn transaction<T, E, F>(&self, collection: &str, f: F) -> Result<T, E>
    where
        Self: Sized,
        E: From<StorageError>,
        F: FnOnce(&mut Transaction<'_, Self>) -> Result<T, E>,
    {
        let _guard = self.write_lock();
        let mut txn = Transaction::new(self, collection);
        let value = f(&mut txn)?;
        let changes = txn.into_changeset();
        if !changes.is_empty() {
            tracing::trace!(
                collection = %changes.collection,
                writes = changes.writes.len(),
                cleared = changes.cleared,
                "committing transaction"
            );
            self.apply(changes)?;
        }
        Ok(value)
    }
}

/// An open write transaction.
///
/// Reads through a transaction see its own pending writes layered over the
/// committed state.
#[derive(Debug)]
pub struct Transaction<'a, S> {
    store: &'a S,
    changes: Changeset,
}

impl<'a, S: StorageAdapter> Transaction<'a, S> {
    pub(crate) fn new(store: &'a S, collection: &str) -> Self {
        Self {
            store,
            changes: Changeset::new(collection),
        }
    }

    /// Returns the collection this transaction writes to.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.changes.collection
    }

    /// Reads a record, observing pending writes.
    pub fn get(&self, id: &str) -> StorageResult<Option<Document>> {
        match self.changes.writes.get(id) {
            Some(PendingWrite::Put(doc)) => Ok(Some(doc.clone())),
            Some(PendingWrite::Delete) => Ok(None),
            None if self.changes.cleared => Ok(None),
            None => self.store.get(&self.changes.collection, id),
        }
    }

    /// Lists records matching `filter`, observing pending writes.
    pub fn list(&self, filter: &dyn Fn(&Document) -> bool) -> StorageResult<Vec<(String, Document)>> {
        let mut merged: BTreeMap<String, Document> = BTreeMap::new();
        if !self.changes.cleared {
            for (id, doc) in self.store.list(&self.changes.collection, filter)? {
                if !self.changes.writes.contains_key(&id) {
                    merged.insert(id, doc);
                }
            }
        }
        for (id, write) in &self.changes.writes {
            if let PendingWrite::Put(doc) = write {
                if filter(doc) {
                    merged.insert(id.clone(), doc.clone());
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Records a put.
    pub fn put(&mut self, id: impl Into<String>, doc: Document) {
        self.changes.writes.insert(id.into(), PendingWrite::Put(doc));
    }

    /// Records a delete.
    pub fn delete(&mut self, id: impl Into<String>) {
        self.changes.writes.insert(id.into(), PendingWrite::Delete);
    }

    /// Reads the metadata document, observing a pending metadata write.
    pub fn metadata(&self) -> StorageResult<Option<Document>> {
        match &self.changes.metadata {
            Some(pending) => Ok(pending.clone()),
            None if self.changes.cleared => Ok(None),
            None => self.store.get_metadata(&self.changes.collection),
        }
    }

    /// Records a metadata write.
    pub fn set_metadata(&mut self, doc: Document) {
        self.changes.metadata = Some(Some(doc));
    }

    /// Drops every record and the metadata of the collection.
    ///
    /// Writes recorded before the clear are discarded; writes recorded after
    /// it are applied on top of the empty collection.
    pub fn clear(&mut self) {
        self.changes.cleared = true;
        self.changes.writes.clear();
        self.changes.metadata = Some(None);
    }

    /// Number of buffered record writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.changes.writes.len()
    }

    pub(crate) fn into_changeset(self) -> Changeset {
        self.changes
    }
}
