//! An in-process remote backed by the reference server.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidemark_core::{RecordStore, StoreConfig};
use tidemark_storage::InMemoryAdapter;
use tidemark_sync_engine::{
    EngineResult, RemoteApi, RequestOptions, SyncConfig, SyncEngine, SyncError,
};
use tidemark_sync_protocol::{
    from_cbor, to_cbor, BatchOperation, BatchResult, ChangesPage, ChangesRequest, CollectionInfo,
    ServerInfo,
};
use tidemark_sync_server::{ServerConfig, ServerError, SyncServer};
use tidemark_testkit::notes_config;

type Interleaved = Box<dyn FnOnce(&SyncServer) + Send>;

/// A remote that talks to a [`SyncServer`] in the same process.
///
/// Every request and response goes through the CBOR codec so the tests
/// exercise the wire shapes.
pub struct InMemoryRemote {
    server: Arc<SyncServer>,
    collection: String,
    endpoint: String,
    after_first_page: Mutex<Option<Interleaved>>,
    before_batch: Mutex<Option<Interleaved>>,
    server_info_calls: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new(server: Arc<SyncServer>, collection: &str) -> Self {
        Self {
            server,
            collection: collection.to_string(),
            endpoint: "memory://reference".to_string(),
            after_first_page: Mutex::new(None),
            before_batch: Mutex::new(None),
            server_info_calls: AtomicUsize::new(0),
        }
    }

    /// Runs `write` on the server right after a page with a next cursor was
    /// served.
    pub fn after_first_page(&self, write: impl FnOnce(&SyncServer) + Send + 'static) {
        *self.after_first_page.lock() = Some(Box::new(write));
    }

    /// Runs `write` on the server right before the next batch is applied.
    pub fn before_batch(&self, write: impl FnOnce(&SyncServer) + Send + 'static) {
        *self.before_batch.lock() = Some(Box::new(write));
    }

    pub fn server_info_calls(&self) -> usize {
        self.server_info_calls.load(Ordering::SeqCst)
    }
}

fn remote_error(error: ServerError) -> SyncError {
    SyncError::Remote {
        status: error.status(),
        message: error.to_string(),
    }
}

fn wire<T: Serialize + DeserializeOwned>(message: &T) -> EngineResult<T> {
    Ok(from_cbor(&to_cbor(message)?)?)
}

impl RemoteApi for InMemoryRemote {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn fetch_server_info(&self, _options: &RequestOptions) -> EngineResult<ServerInfo> {
        self.server_info_calls.fetch_add(1, Ordering::SeqCst);
        wire(&self.server.server_info())
    }

    async fn fetch_changes(
        &self,
        request: &ChangesRequest,
        _options: &RequestOptions,
    ) -> EngineResult<ChangesPage> {
        let request = wire(request)?;
        let page = self
            .server
            .changes(&self.collection, &request)
            .map_err(remote_error)?;
        if page.next.is_some() {
            let write = self.after_first_page.lock().take();
            if let Some(write) = write {
                write(&self.server);
            }
        }
        wire(&page)
    }

    async fn batch(
        &self,
        operations: Vec<BatchOperation>,
        _options: &RequestOptions,
    ) -> EngineResult<BatchResult> {
        let operations = wire(&operations)?;
        let write = self.before_batch.lock().take();
        if let Some(write) = write {
            write(&self.server);
        }
        let result = self
            .server
            .batch(&self.collection, operations)
            .map_err(remote_error)?;
        wire(&result)
    }

    async fn fetch_collection_info(&self, _options: &RequestOptions) -> EngineResult<CollectionInfo> {
        wire(&self.server.collection_info(&self.collection))
    }

    fn backoff(&self) -> Option<Duration> {
        self.server.backoff()
    }
}

pub type Client = SyncEngine<InMemoryAdapter, InMemoryRemote>;

pub fn server() -> Arc<SyncServer> {
    tidemark_testkit::init_tracing();
    Arc::new(SyncServer::new(ServerConfig::default()))
}

pub fn paged_server(page_size: usize) -> Arc<SyncServer> {
    tidemark_testkit::init_tracing();
    Arc::new(SyncServer::new(ServerConfig::default().with_page_size(page_size)))
}

pub fn client_with(server: &Arc<SyncServer>, config: StoreConfig) -> Client {
    let store = RecordStore::new(Arc::new(InMemoryAdapter::new()), config).unwrap();
    let remote = InMemoryRemote::new(Arc::clone(server), &store.config().name);
    SyncEngine::new(store, Arc::new(remote), SyncConfig::default())
}

pub fn client(server: &Arc<SyncServer>) -> Client {
    client_with(server, notes_config())
}
