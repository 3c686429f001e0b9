//! The seam between the engine and the remote collection.

use crate::error::{EngineResult, SyncError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tidemark_sync_protocol::{
    BatchOperation, BatchResult, ChangesPage, ChangesRequest, CollectionInfo, ServerInfo,
    PROTOCOL_VERSION,
};

/// Per-request options forwarded to the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Extra headers.
    pub headers: BTreeMap<String, String>,
    /// Endpoint override.
    pub remote: Option<String>,
}

/// Access to one remote collection.
///
/// This trait abstracts the transport, allowing for different
/// implementations (HTTP, an in-process server, a scripted mock for
/// testing). Implementations report network failures as
/// [`SyncError::Transport`] and error statuses as [`SyncError::Remote`].
pub trait RemoteApi: Send + Sync {
    /// Address of the remote, used to key the server info cache.
    fn endpoint(&self) -> String;

    /// Fetches the remote capabilities.
    fn fetch_server_info(
        &self,
        options: &RequestOptions,
    ) -> impl Future<Output = EngineResult<ServerInfo>> + Send;

    /// Fetches one page of changes.
    fn fetch_changes(
        &self,
        request: &ChangesRequest,
        options: &RequestOptions,
    ) -> impl Future<Output = EngineResult<ChangesPage>> + Send;

    /// Sends a batch of writes.
    fn batch(
        &self,
        operations: Vec<BatchOperation>,
        options: &RequestOptions,
    ) -> impl Future<Output = EngineResult<BatchResult>> + Send;

    /// Fetches the collection metadata.
    fn fetch_collection_info(
        &self,
        options: &RequestOptions,
    ) -> impl Future<Output = EngineResult<CollectionInfo>> + Send;

    /// Delay the remote asked clients to observe, if any.
    fn backoff(&self) -> Option<Duration>;
}

/// A scripted remote for testing.
///
/// Pages and batch results are served in the order they were queued. An
/// exhausted page queue serves an empty last page.
#[derive(Debug, Default)]
pub struct MockRemote {
    endpoint: String,
    server_info: Mutex<Option<ServerInfo>>,
    pages: Mutex<VecDeque<EngineResult<ChangesPage>>>,
    batches: Mutex<VecDeque<EngineResult<BatchResult>>>,
    collection_info: Mutex<CollectionInfo>,
    backoff: Mutex<Option<Duration>>,
    delay: Mutex<Option<Duration>>,
    changes_requests: Mutex<Vec<ChangesRequest>>,
    batch_requests: Mutex<Vec<Vec<BatchOperation>>>,
    server_info_calls: AtomicUsize,
}

impl MockRemote {
    /// Creates a mock remote speaking the current protocol.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            server_info: Mutex::new(Some(ServerInfo {
                protocol_version: PROTOCOL_VERSION,
                batch_max_requests: 25,
                capabilities: Vec::new(),
            })),
            ..Self::default()
        }
    }

    /// Sets the server info; `None` makes the fetch fail.
    pub fn set_server_info(&self, info: Option<ServerInfo>) {
        *self.server_info.lock() = info;
    }

    /// Queues a page of changes.
    pub fn push_page(&self, page: ChangesPage) {
        self.pages.lock().push_back(Ok(page));
    }

    /// Queues a failing change request.
    pub fn push_page_error(&self, error: SyncError) {
        self.pages.lock().push_back(Err(error));
    }

    /// Queues a batch result.
    pub fn push_batch_result(&self, result: BatchResult) {
        self.batches.lock().push_back(Ok(result));
    }

    /// Queues a failing batch.
    pub fn push_batch_error(&self, error: SyncError) {
        self.batches.lock().push_back(Err(error));
    }

    /// Sets the collection metadata.
    pub fn set_collection_info(&self, info: CollectionInfo) {
        *self.collection_info.lock() = info;
    }

    /// Sets the backoff delay.
    pub fn set_backoff(&self, backoff: Option<Duration>) {
        *self.backoff.lock() = backoff;
    }

    /// Delays every response.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Change requests received so far.
    pub fn changes_requests(&self) -> Vec<ChangesRequest> {
        self.changes_requests.lock().clone()
    }

    /// Batches received so far.
    pub fn batch_requests(&self) -> Vec<Vec<BatchOperation>> {
        self.batch_requests.lock().clone()
    }

    /// Number of server info fetches.
    pub fn server_info_calls(&self) -> usize {
        self.server_info_calls.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl RemoteApi for MockRemote {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn fetch_server_info(&self, _options: &RequestOptions) -> EngineResult<ServerInfo> {
        self.server_info_calls.fetch_add(1, Ordering::SeqCst);
        self.wait().await;
        let info = self.server_info.lock().clone();
        info.ok_or_else(|| SyncError::transport("no server info"))
    }

    async fn fetch_changes(
        &self,
        request: &ChangesRequest,
        _options: &RequestOptions,
    ) -> EngineResult<ChangesPage> {
        self.changes_requests.lock().push(request.clone());
        self.wait().await;
        let next = self.pages.lock().pop_front();
        next.unwrap_or_else(|| {
            Ok(ChangesPage {
                data: Vec::new(),
                next: None,
                timestamp: request.since.unwrap_or(0),
            })
        })
    }

    async fn batch(
        &self,
        operations: Vec<BatchOperation>,
        _options: &RequestOptions,
    ) -> EngineResult<BatchResult> {
        self.batch_requests.lock().push(operations);
        self.wait().await;
        let next = self.batches.lock().pop_front();
        next.unwrap_or_else(|| Err(SyncError::transport("no scripted batch result")))
    }

    async fn fetch_collection_info(&self, _options: &RequestOptions) -> EngineResult<CollectionInfo> {
        self.wait().await;
        Ok(self.collection_info.lock().clone())
    }

    fn backoff(&self) -> Option<Duration> {
        *self.backoff.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_serves_pages_in_order() {
        let remote = MockRemote::new("mock://remote");
        remote.push_page(ChangesPage {
            data: Vec::new(),
            next: Some("1".into()),
            timestamp: 7,
        });

        let options = RequestOptions::default();
        let first = remote
            .fetch_changes(&ChangesRequest::since(None), &options)
            .await
            .unwrap();
        assert_eq!(first.timestamp, 7);

        let exhausted = remote
            .fetch_changes(&ChangesRequest::since(Some(3)), &options)
            .await
            .unwrap();
        assert_eq!(exhausted.timestamp, 3);
        assert!(exhausted.next.is_none());
        assert_eq!(remote.changes_requests().len(), 2);
    }

    #[tokio::test]
    async fn mock_batch_without_script_fails() {
        let remote = MockRemote::new("mock://remote");
        let result = remote.batch(Vec::new(), &RequestOptions::default()).await;
        assert!(matches!(result, Err(SyncError::Transport { .. })));
        assert_eq!(remote.batch_requests().len(), 1);
    }

    #[tokio::test]
    async fn mock_server_info() {
        let remote = MockRemote::new("mock://remote");
        let info = remote
            .fetch_server_info(&RequestOptions::default())
            .await
            .unwrap();
        assert!(info.supports(PROTOCOL_VERSION));
        assert_eq!(remote.server_info_calls(), 1);

        remote.set_server_info(None);
        assert!(remote
            .fetch_server_info(&RequestOptions::default())
            .await
            .is_err());
    }
}
