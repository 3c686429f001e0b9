//! The record store: transactional CRUD over one named collection.

mod options;
mod txn;

pub use options::{
    CollectionMetadata, CreateOptions, DeleteOptions, GetOptions, ListOptions, UpdateOptions,
    UpdateOutcome,
};
pub use txn::RecordTransaction;

use crate::config::StoreConfig;
use crate::conflict::Conflict;
use crate::error::{CoreError, CoreResult};
use crate::query::Query;
use crate::record::Record;
use std::sync::Arc;
use tidemark_storage::{Document, StorageAdapter, StorageError};

/// Local copy of one collection.
///
/// Every mutating method runs in its own storage transaction; use
/// [`RecordStore::transaction`] to group several operations atomically.
/// Writers are serialized by the storage adapter, readers only observe
/// committed state.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use tidemark_core::{CreateOptions, Query, RecordStore, RecordStatus, StoreConfig};
/// use tidemark_storage::InMemoryAdapter;
///
/// let store = RecordStore::new(Arc::new(InMemoryAdapter::new()), StoreConfig::new("tasks")).unwrap();
/// let doc = json!({"title": "write docs"}).as_object().cloned().unwrap();
/// let record = store.create(doc, CreateOptions::default()).unwrap();
///
/// assert_eq!(record.status, RecordStatus::Created);
/// assert_eq!(store.list(&Query::new(), Default::default()).unwrap().len(), 1);
/// ```
pub struct RecordStore<S> {
    storage: Arc<S>,
    config: StoreConfig,
}

impl<S> Clone for RecordStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            config: self.config.clone(),
        }
    }
}

impl<S> std::fmt::Debug for RecordStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("name", &self.config.name)
            .finish_non_exhaustive()
    }
}

impl<S: StorageAdapter> RecordStore<S> {
    /// Opens a collection on a storage adapter.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(storage: Arc<S>, config: StoreConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self { storage, config })
    }

    /// Collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Collection configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The underlying storage adapter.
    #[must_use]
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Runs `f` inside one atomic unit of work.
    ///
    /// All writes made through the [`RecordTransaction`] commit together when
    /// `f` returns `Ok`; none do when it returns `Err`.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StorageError>,
        F: FnOnce(&mut RecordTransaction<'_, '_, S>) -> Result<T, E>,
    {
        self.storage.transaction(&self.config.name, |txn| {
            let mut records = RecordTransaction::new(txn, &self.config);
            f(&mut records)
        })
    }

    /// Creates a record with status `created`.
    ///
    /// The id is generated by the collection's id schema when the document
    /// has none.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` if the id fails validation or is already
    /// taken (tombstones included), or if reserved fields are supplied
    /// without `synced`.
    pub fn create(&self, doc: Document, options: CreateOptions) -> CoreResult<Record> {
        let record = self.transaction(|txn| txn.create(doc, options))?;
        tracing::trace!(collection = %self.config.name, id = %record.id, "record created");
        Ok(record)
    }

    /// Updates an existing record.
    ///
    /// A `synced` record becomes `updated`; `created` and `updated` records
    /// keep their status. Changes limited to local-only fields do not change
    /// the status at all.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no live record has this id and `upsert` is not
    /// set, `InvalidRecord` if the id is missing or invalid.
    pub fn update(&self, doc: Document, options: UpdateOptions) -> CoreResult<UpdateOutcome> {
        self.transaction(|txn| txn.update(doc, options))
    }

    /// Deletes a record.
    ///
    /// A record never pushed is removed outright. Otherwise a `deleted`
    /// tombstone is kept until the deletion is pushed, unless
    /// `virtual_delete` is false.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no live record has this id.
    pub fn delete(&self, id: &str, options: DeleteOptions) -> CoreResult<Record> {
        self.transaction(|txn| txn.delete(id, options))
    }

    /// Deletes several records in one transaction, skipping unknown ids.
    pub fn delete_all(&self, ids: &[String]) -> CoreResult<Vec<Record>> {
        self.transaction(|txn| txn.delete_all(ids))
    }

    /// Reads a live record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the record is absent, or a tombstone and
    /// `include_deleted` is not set.
    pub fn get(&self, id: &str, options: GetOptions) -> CoreResult<Record> {
        self.get_any(id)?
            .filter(|r| options.include_deleted || !r.is_deleted())
            .ok_or_else(|| CoreError::not_found(&self.config.name, id))
    }

    /// Reads a record, tombstones included, without failing when absent.
    pub fn get_any(&self, id: &str) -> CoreResult<Option<Record>> {
        self.storage
            .get(&self.config.name, id)?
            .map(Record::from_document)
            .transpose()
    }

    /// Lists records matching `query`, sorted by its keys then by id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if the query reads a field the collection does
    /// not declare as queryable.
    pub fn list(&self, query: &Query, options: ListOptions) -> CoreResult<Vec<Record>> {
        if let Some(field) = query.fields().find(|f| !self.config.is_queryable(f)) {
            return Err(CoreError::InvalidQuery {
                field: field.to_string(),
            });
        }
        let mut docs: Vec<Document> = self
            .storage
            .list(&self.config.name, &|doc| {
                (options.include_deleted || !txn::is_deleted_doc(doc)) && query.matches(doc)
            })?
            .into_iter()
            .map(|(_, doc)| doc)
            .collect();
        if !query.order.is_empty() {
            docs.sort_by(|a, b| query.compare(a, b));
        }
        docs.into_iter().map(Record::from_document).collect()
    }

    /// Lists every record waiting to be pushed, tombstones included.
    pub fn pending(&self) -> CoreResult<Vec<Record>> {
        self.storage
            .list(&self.config.name, &txn::is_pending_doc)?
            .into_iter()
            .map(|(_, doc)| Record::from_document(doc))
            .collect()
    }

    /// Removes every record and the metadata of this collection.
    pub fn clear(&self) -> CoreResult<()> {
        self.transaction(|txn| {
            txn.clear();
            Ok::<_, CoreError>(())
        })?;
        tracing::debug!(collection = %self.config.name, "collection cleared");
        Ok(())
    }

    /// Marks everything as needing a push and forgets the watermark.
    ///
    /// `synced` records become `updated`, and every record loses its
    /// `last_modified` baseline so the next push recreates it remotely. Used
    /// to recover after the remote collection was flushed. Returns the
    /// number of records touched.
    pub fn reset_sync_status(&self) -> CoreResult<usize> {
        let touched = self.transaction(|txn| txn.reset_sync_status())?;
        tracing::info!(collection = %self.config.name, touched, "sync status reset");
        Ok(touched)
    }

    /// Reads the collection metadata.
    pub fn metadata(&self) -> CoreResult<CollectionMetadata> {
        Ok(CollectionMetadata {
            name: self.config.name.clone(),
            last_modified: self.last_modified()?,
        })
    }

    /// Reads the collection watermark; `None` if never synced.
    pub fn last_modified(&self) -> CoreResult<Option<i64>> {
        Ok(self
            .storage
            .get_metadata(&self.config.name)?
            .and_then(|doc| doc.get("last_modified").and_then(serde_json::Value::as_i64)))
    }

    /// Overwrites the collection watermark.
    pub fn save_metadata(&self, last_modified: Option<i64>) -> CoreResult<()> {
        self.transaction(|txn| {
            txn.set_last_modified(last_modified);
            Ok::<_, CoreError>(())
        })
    }

    /// Bulk-loads remote records as `synced`.
    ///
    /// Only absent records and older `synced` ones are replaced; pending
    /// local edits are left alone. The watermark advances to the newest
    /// imported timestamp.
    pub fn import_synced(&self, records: Vec<Record>) -> CoreResult<Vec<Record>> {
        self.transaction(|txn| txn.import_synced(records))
    }

    /// Stores the chosen resolution of a conflict.
    ///
    /// The record takes the remote version's `last_modified` as its baseline.
    /// It is `synced` when the resolution equals the remote content and
    /// `updated` otherwise, so the next sync pushes it over the remote
    /// version. When the remote side is a deletion the record is stored as
    /// `created`. Local-only fields of the existing record are kept.
    pub fn resolve(&self, conflict: &Conflict, resolution: Document) -> CoreResult<Record> {
        self.transaction(|txn| txn.resolve(conflict, resolution))
    }
}
