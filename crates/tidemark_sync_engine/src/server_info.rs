//! Cache of remote capabilities, keyed by endpoint.

use crate::error::EngineResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use tidemark_sync_protocol::ServerInfo;

/// Server info fetched once per endpoint.
///
/// Share one cache between engines talking to the same remote by cloning
/// the `Arc` it is handed out in.
#[derive(Debug, Default)]
pub struct ServerInfoCache {
    entries: RwLock<HashMap<String, ServerInfo>>,
}

impl ServerInfoCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached info for `endpoint`.
    #[must_use]
    pub fn get(&self, endpoint: &str) -> Option<ServerInfo> {
        self.entries.read().get(endpoint).cloned()
    }

    /// Stores info for `endpoint`.
    pub fn insert(&self, endpoint: impl Into<String>, info: ServerInfo) {
        self.entries.write().insert(endpoint.into(), info);
    }

    /// Forgets `endpoint`.
    pub fn invalidate(&self, endpoint: &str) {
        self.entries.write().remove(endpoint);
    }

    /// Forgets every endpoint.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Returns the cached info, fetching it on a miss.
    ///
    /// Concurrent misses may fetch more than once; the last fetch wins.
    pub async fn get_or_fetch<F, Fut>(&self, endpoint: &str, fetch: F) -> EngineResult<ServerInfo>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<ServerInfo>>,
    {
        if let Some(info) = self.get(endpoint) {
            return Ok(info);
        }
        let info = fetch().await?;
        self.insert(endpoint, info.clone());
        Ok(info)
    }
}
