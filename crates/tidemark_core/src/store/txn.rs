//! Record-level view over a storage transaction.

use super::options::{
    CollectionMetadata, CreateOptions, DeleteOptions, UpdateOptions, UpdateOutcome,
};
use crate::config::StoreConfig;
use crate::conflict::Conflict;
use crate::error::{CoreError, CoreResult};
use crate::record::{
    fields_eq, strip_reserved, Record, RecordStatus, ID_FIELD, LAST_MODIFIED_FIELD, STATUS_FIELD,
};
use serde_json::Value;
use tidemark_storage::{Document, StorageAdapter, Transaction};

/// An open write transaction on one record collection.
///
/// Every operation of [`super::RecordStore`] is available here too, so
/// several of them can be committed together. Nothing is written until the
/// closure passed to [`super::RecordStore::transaction`] returns `Ok`.
pub struct RecordTransaction<'t, 'a, S> {
    txn: &'t mut Transaction<'a, S>,
    config: &'t StoreConfig,
}

impl<'t, 'a, S: StorageAdapter> RecordTransaction<'t, 'a, S> {
    pub(super) fn new(txn: &'t mut Transaction<'a, S>, config: &'t StoreConfig) -> Self {
        Self { txn, config }
    }

    /// The collection configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        self.config
    }

    /// Reads a record, tombstones included.
    pub fn get(&self, id: &str) -> CoreResult<Option<Record>> {
        self.txn.get(id)?.map(Record::from_document).transpose()
    }

    /// Writes a record as given.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` for a `synced` record without a timestamp.
    pub fn put(&mut self, record: &Record) -> CoreResult<()> {
        if record.status == RecordStatus::Synced && record.last_modified.is_none() {
            return Err(CoreError::invalid_record(
                Some(&record.id),
                "synced record without last_modified",
            ));
        }
        self.txn.put(record.id.clone(), record.to_document());
        Ok(())
    }

    /// Removes a record without leaving a tombstone.
    pub fn remove(&mut self, id: &str) {
        self.txn.delete(id);
    }

    /// Lists records whose stored document satisfies `filter`.
    pub fn list(&self, filter: &dyn Fn(&Document) -> bool) -> CoreResult<Vec<Record>> {
        self.txn
            .list(filter)?
            .into_iter()
            .map(|(_, doc)| Record::from_document(doc))
            .collect()
    }

    /// Lists every record waiting to be pushed, tombstones included.
    pub fn pending(&self) -> CoreResult<Vec<Record>> {
        self.list(&is_pending_doc)
    }

    /// Reads the collection watermark.
    pub fn last_modified(&self) -> CoreResult<Option<i64>> {
        Ok(self
            .txn
            .metadata()?
            .and_then(|doc| doc.get(LAST_MODIFIED_FIELD).and_then(Value::as_i64)))
    }

    /// Overwrites the collection watermark.
    pub fn set_last_modified(&mut self, last_modified: Option<i64>) {
        let mut doc = Document::new();
        doc.insert("name".into(), Value::String(self.config.name.clone()));
        doc.insert(
            LAST_MODIFIED_FIELD.into(),
            last_modified.map_or(Value::Null, Value::from),
        );
        self.txn.set_metadata(doc);
    }

    /// Raises the watermark to `timestamp` if it is newer and returns the
    /// resulting watermark.
    pub fn advance_last_modified(&mut self, timestamp: i64) -> CoreResult<i64> {
        match self.last_modified()? {
            Some(current) if current >= timestamp => Ok(current),
            _ => {
                self.set_last_modified(Some(timestamp));
                Ok(timestamp)
            }
        }
    }

    /// Reads the collection metadata.
    pub fn metadata(&self) -> CoreResult<CollectionMetadata> {
        Ok(CollectionMetadata {
            name: self.config.name.clone(),
            last_modified: self.last_modified()?,
        })
    }

    /// Removes every record and the metadata of this collection.
    pub fn clear(&mut self) {
        self.txn.clear();
    }

    /// See [`super::RecordStore::create`].
    pub fn create(&mut self, mut doc: Document, options: CreateOptions) -> CoreResult<Record> {
        let supplied_id = doc.remove(ID_FIELD);
        let status = doc.remove(STATUS_FIELD);
        let last_modified = doc.remove(LAST_MODIFIED_FIELD);

        let id = match supplied_id {
            Some(Value::String(id)) => id,
            Some(other) => {
                return Err(CoreError::invalid_record(
                    None,
                    format!("id must be a string, got {other}"),
                ))
            }
            None => self.config.id_schema.generate(&doc),
        };
        if !self.config.id_schema.validate(&id) {
            return Err(CoreError::invalid_record(Some(&id), "id rejected by id schema"));
        }

        let record = if options.synced {
            if status.as_ref().is_some_and(|s| *s != "synced") {
                return Err(CoreError::invalid_record(
                    Some(&id),
                    "synced import with a non-synced status",
                ));
            }
            let ts = last_modified.as_ref().and_then(Value::as_i64).ok_or_else(|| {
                CoreError::invalid_record(Some(&id), "synced record requires an integer last_modified")
            })?;
            Record::synced(id, ts, doc)
        } else {
            if status.is_some() || last_modified.is_some_and(|v| !v.is_null()) {
                return Err(CoreError::invalid_record(
                    Some(&id),
                    "_status and last_modified are managed by the store",
                ));
            }
            Record::new(id, doc)
        };

        if self.txn.get(&record.id)?.is_some() {
            return Err(CoreError::invalid_record(Some(&record.id), "id already exists"));
        }
        self.put(&record)?;
        Ok(record)
    }

    /// See [`super::RecordStore::update`].
    pub fn update(&mut self, doc: Document, options: UpdateOptions) -> CoreResult<UpdateOutcome> {
        let id = match doc.get(ID_FIELD) {
            Some(Value::String(id)) => id.clone(),
            _ => return Err(CoreError::invalid_record(None, "update requires a string id")),
        };
        if !self.config.id_schema.validate(&id) {
            return Err(CoreError::invalid_record(Some(&id), "id rejected by id schema"));
        }
        let incoming = strip_reserved(doc);

        match self.get(&id)? {
            Some(old) if !old.is_deleted() => {
                let fields = if options.patch {
                    let mut merged = old.fields.clone();
                    merged.extend(incoming);
                    merged
                } else {
                    incoming
                };
                // a change confined to local-only fields leaves the status alone
                let status = if fields_eq(&fields, &old.fields, &self.config.local_fields) {
                    old.status
                } else if old.status == RecordStatus::Synced {
                    RecordStatus::Updated
                } else {
                    old.status
                };
                let new = Record {
                    id,
                    status,
                    last_modified: old.last_modified,
                    fields,
                };
                self.put(&new)?;
                Ok(UpdateOutcome {
                    old: Some(old),
                    new,
                })
            }
            tombstone if options.upsert => {
                let new = match tombstone {
                    // recreating over a pushed record keeps its baseline
                    Some(t) => Record {
                        id,
                        status: RecordStatus::Updated,
                        last_modified: t.last_modified,
                        fields: incoming,
                    },
                    None => Record::new(id, incoming),
                };
                self.put(&new)?;
                Ok(UpdateOutcome { old: None, new })
            }
            _ => Err(CoreError::not_found(&self.config.name, id)),
        }
    }

    /// See [`super::RecordStore::delete`].
    pub fn delete(&mut self, id: &str, options: DeleteOptions) -> CoreResult<Record> {
        let existing = self
            .get(id)?
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| CoreError::not_found(&self.config.name, id))?;

        if !options.virtual_delete || existing.status == RecordStatus::Created {
            self.remove(id);
        } else {
            self.put(&existing.clone().with_status(RecordStatus::Deleted))?;
        }
        Ok(existing.with_status(RecordStatus::Deleted))
    }

    /// See [`super::RecordStore::delete_all`].
    pub fn delete_all(&mut self, ids: &[String]) -> CoreResult<Vec<Record>> {
        let mut deleted = Vec::with_capacity(ids.len());
        for id in ids {
            match self.delete(id, DeleteOptions::default()) {
                Ok(record) => deleted.push(record),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }

    /// See [`super::RecordStore::reset_sync_status`].
    pub fn reset_sync_status(&mut self) -> CoreResult<usize> {
        let mut touched = 0;
        for record in self.list(&|_| true)? {
            let mut reset = record.clone();
            if reset.status == RecordStatus::Synced {
                reset.status = RecordStatus::Updated;
            }
            reset.last_modified = None;
            if reset != record {
                self.put(&reset)?;
                touched += 1;
            }
        }
        self.set_last_modified(None);
        Ok(touched)
    }

    /// See [`super::RecordStore::import_synced`].
    pub fn import_synced(&mut self, records: Vec<Record>) -> CoreResult<Vec<Record>> {
        let mut imported = Vec::new();
        let mut newest: Option<i64> = None;

        for remote in records {
            if remote.is_deleted() {
                continue;
            }
            let ts = remote.last_modified.ok_or_else(|| {
                CoreError::invalid_record(Some(&remote.id), "imported record without last_modified")
            })?;
            if !self.config.id_schema.validate(&remote.id) {
                return Err(CoreError::invalid_record(Some(&remote.id), "id rejected by id schema"));
            }
            newest = newest.max(Some(ts));

            let replace = match self.get(&remote.id)? {
                None => true,
                Some(local) => {
                    local.status == RecordStatus::Synced
                        && local.last_modified.map_or(true, |local_ts| local_ts < ts)
                }
            };
            if replace {
                let record = Record::synced(remote.id, ts, remote.fields);
                self.put(&record)?;
                imported.push(record);
            }
        }

        if let Some(ts) = newest {
            self.advance_last_modified(ts)?;
        }
        Ok(imported)
    }

    /// See [`super::RecordStore::resolve`].
    pub fn resolve(&mut self, conflict: &Conflict, resolution: Document) -> CoreResult<Record> {
        let id = conflict.id().to_string();
        if id.is_empty() {
            return Err(CoreError::invalid_record(None, "conflict without a record"));
        }
        let mut fields = strip_reserved(resolution);
        if let Some(existing) = self.get(&id)? {
            for name in &self.config.local_fields {
                if fields.contains_key(name) {
                    continue;
                }
                if let Some(value) = existing.fields.get(name) {
                    fields.insert(name.clone(), value.clone());
                }
            }
        }

        let record = match &conflict.remote {
            Some(remote) => {
                let matches_remote = remote.last_modified.is_some()
                    && fields_eq(&fields, &remote.fields, &self.config.local_fields);
                Record {
                    id,
                    status: if matches_remote {
                        RecordStatus::Synced
                    } else {
                        RecordStatus::Updated
                    },
                    last_modified: remote.last_modified,
                    fields,
                }
            }
            None => Record::new(id, fields),
        };
        self.put(&record)?;
        Ok(record)
    }
}

pub(super) fn is_pending_doc(doc: &Document) -> bool {
    doc.get(STATUS_FIELD).and_then(Value::as_str) != Some(RecordStatus::Synced.as_str())
}

pub(super) fn is_deleted_doc(doc: &Document) -> bool {
    doc.get(STATUS_FIELD).and_then(Value::as_str) == Some(RecordStatus::Deleted.as_str())
}
