//! The reference server.

use crate::collection::Collection;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tidemark_core::Document;
use tidemark_sync_protocol::{
    BatchOperation, BatchResult, ChangesPage, ChangesRequest, CollectionInfo, RemoteRecord,
    ServerInfo,
};
use tracing::{debug, info};

/// In-process remote holding any number of named collections.
///
/// Every request runs under the server lock, so a batch is never
/// interleaved with another request.
#[derive(Debug, Default)]
pub struct SyncServer {
    config: ServerConfig,
    collections: RwLock<HashMap<String, Collection>>,
    backoff: RwLock<Option<Duration>>,
}

impl SyncServer {
    /// Creates a new empty server.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            collections: RwLock::new(HashMap::new()),
            backoff: RwLock::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Server capabilities.
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: self.config.protocol_version,
            batch_max_requests: self.config.batch_max_requests,
            capabilities: self.config.capabilities.clone(),
        }
    }

    /// Lists changes of a collection. Unknown collections are empty.
    pub fn changes(&self, collection: &str, request: &ChangesRequest) -> ServerResult<ChangesPage> {
        let collections = self.collections.read();
        let page = match collections.get(collection) {
            Some(c) => c.changes(request, self.config.page_size)?,
            None => Collection::new().changes(request, self.config.page_size)?,
        };
        debug!(
            collection,
            since = ?request.since,
            records = page.data.len(),
            "served changes"
        );
        Ok(page)
    }

    /// Applies a batch of conditional writes.
    ///
    /// Operations are applied in order; each one gets its own status and a
    /// failed precondition does not undo the others.
    pub fn batch(&self, collection: &str, operations: Vec<BatchOperation>) -> ServerResult<BatchResult> {
        if operations.len() > self.config.batch_max_requests {
            return Err(ServerError::BatchTooLarge {
                size: operations.len(),
                max: self.config.batch_max_requests,
            });
        }
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        let previous_timestamp = Some(target.timestamp());
        let responses: Vec<_> = operations
            .into_iter()
            .map(|op| target.apply(op))
            .collect();
        debug!(
            collection,
            operations = responses.len(),
            timestamp = target.timestamp(),
            "applied batch"
        );
        Ok(BatchResult {
            responses,
            previous_timestamp,
        })
    }

    /// Collection metadata.
    pub fn collection_info(&self, collection: &str) -> CollectionInfo {
        CollectionInfo {
            last_modified: self.timestamp(collection),
            settings: Document::new(),
        }
    }

    /// Current collection timestamp, 0 for unknown collections.
    pub fn timestamp(&self, collection: &str) -> i64 {
        self.collections
            .read()
            .get(collection)
            .map_or(0, Collection::timestamp)
    }

    /// Writes a record directly, as another client would.
    pub fn put_record(&self, collection: &str, id: &str, fields: Document) -> RemoteRecord {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .put(id, fields)
    }

    /// Deletes a record directly, as another client would.
    pub fn delete_record(&self, collection: &str, id: &str) -> Option<RemoteRecord> {
        self.collections.write().get_mut(collection)?.delete(id)
    }

    /// Stored record or tombstone.
    pub fn get_record(&self, collection: &str, id: &str) -> Option<RemoteRecord> {
        self.collections.read().get(collection)?.get(id).cloned()
    }

    /// Number of live records in a collection.
    pub fn live_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, Collection::live_count)
    }

    /// Drops every collection, timestamps included.
    pub fn flush(&self) {
        self.collections.write().clear();
        info!("server flushed");
    }

    /// Asks clients to back off.
    pub fn set_backoff(&self, backoff: Option<Duration>) {
        *self.backoff.write() = backoff;
    }

    /// Requested backoff.
    pub fn backoff(&self) -> Option<Duration> {
        *self.backoff.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidemark_sync_protocol::{status, PROTOCOL_VERSION};

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn server_info_reflects_config() {
        let server = SyncServer::new(ServerConfig::new().with_batch_max_requests(5));
        let info = server.server_info();
        assert!(info.supports(PROTOCOL_VERSION));
        assert_eq!(info.batch_max_requests, 5);
        assert!(info.has_capability("tombstones"));
    }

    #[test]
    fn unknown_collection_is_empty() {
        let server = SyncServer::default();
        let page = server
            .changes("notes", &ChangesRequest::since(None))
            .unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.timestamp, 0);
        assert_eq!(server.collection_info("notes").last_modified, 0);
    }

    #[test]
    fn batch_reports_previous_timestamp() {
        let server = SyncServer::new(ServerConfig::default());
        server.put_record("notes", "a", doc(json!({"n": 1})));

        let result = server
            .batch(
                "notes",
                vec![
                    BatchOperation::for_record(RemoteRecord::new("b", None, Document::new())),
                    BatchOperation::for_record(RemoteRecord::new("a", None, Document::new())),
                ],
            )
            .unwrap();
        assert_eq!(result.previous_timestamp, Some(1));
        assert_eq!(result.responses[0].status, status::CREATED);
        assert!(result.responses[1].is_precondition_failed());
        assert_eq!(server.timestamp("notes"), 2);
        assert_eq!(server.live_count("notes"), 2);
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let server = SyncServer::new(ServerConfig::new().with_batch_max_requests(1));
        let ops = vec![
            BatchOperation::for_record(RemoteRecord::new("a", None, Document::new())),
            BatchOperation::for_record(RemoteRecord::new("b", None, Document::new())),
        ];
        let err = server.batch("notes", ops).unwrap_err();
        assert_eq!(err.status(), status::BAD_REQUEST);
        assert_eq!(server.live_count("notes"), 0);
    }

    #[test]
    fn collections_are_independent() {
        let server = SyncServer::default();
        server.put_record("notes", "a", Document::new());
        server.put_record("tags", "a", Document::new());
        server.put_record("tags", "b", Document::new());
        assert_eq!(server.timestamp("notes"), 1);
        assert_eq!(server.timestamp("tags"), 2);
    }

    #[test]
    fn flush_resets_everything() {
        let server = SyncServer::default();
        server.put_record("notes", "a", Document::new());
        server.delete_record("notes", "a");
        assert!(server.get_record("notes", "a").unwrap().deleted);

        server.flush();
        assert_eq!(server.timestamp("notes"), 0);
        assert!(server.get_record("notes", "a").is_none());
    }

    #[test]
    fn backoff_is_settable() {
        let server = SyncServer::default();
        assert!(server.backoff().is_none());
        server.set_backoff(Some(Duration::from_secs(5)));
        assert_eq!(server.backoff(), Some(Duration::from_secs(5)));
    }
}
