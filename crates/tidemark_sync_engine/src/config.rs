//! Configuration for the sync engine.

use std::collections::BTreeMap;
use std::time::Duration;
use tidemark_sync_protocol::{Strategy, PROTOCOL_VERSION};

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Protocol version the engine speaks.
    pub protocol_version: u32,
    /// Page size hint sent with change requests. `None` lets the remote
    /// choose.
    pub page_size: Option<usize>,
    /// Timeout applied to every remote request.
    pub request_timeout: Option<Duration>,
    /// Run whole sync calls one at a time per engine.
    pub serialize_runs: bool,
}

impl SyncConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            page_size: None,
            request_timeout: Some(Duration::from_secs(30)),
            serialize_runs: true,
        }
    }

    /// Sets the page size hint.
    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the protocol version.
    #[must_use]
    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    /// Enables or disables run serialization.
    #[must_use]
    pub fn with_serialize_runs(mut self, serialize: bool) -> Self {
        self.serialize_runs = serialize;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Options of one sync call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Conflict resolution strategy.
    pub strategy: Strategy,
    /// Extra headers passed to every remote request.
    pub headers: BTreeMap<String, String>,
    /// Endpoint override.
    pub remote: Option<String>,
    /// Remote timestamp the caller expects, forwarded with change requests.
    pub expected_timestamp: Option<i64>,
    /// Sync even if the remote asked clients to back off.
    pub ignore_backoff: bool,
}

impl SyncOptions {
    /// Default options: manual strategy, no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Overrides the endpoint.
    #[must_use]
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    /// Sets the expected timestamp.
    #[must_use]
    pub fn with_expected_timestamp(mut self, timestamp: i64) -> Self {
        self.expected_timestamp = Some(timestamp);
        self
    }

    /// Ignores a remote backoff request.
    #[must_use]
    pub fn ignoring_backoff(mut self) -> Self {
        self.ignore_backoff = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.protocol_version, PROTOCOL_VERSION);
        assert!(config.serialize_runs);
        assert_eq!(config.page_size, None);
    }

    #[test]
    fn options_builder() {
        let options = SyncOptions::new()
            .with_strategy(Strategy::ServerWins)
            .with_header("Authorization", "Bearer t")
            .with_remote("https://other.example/v1")
            .with_expected_timestamp(42)
            .ignoring_backoff();
        assert_eq!(options.strategy, Strategy::ServerWins);
        assert_eq!(options.headers["Authorization"], "Bearer t");
        assert_eq!(options.remote.as_deref(), Some("https://other.example/v1"));
        assert_eq!(options.expected_timestamp, Some(42));
        assert!(options.ignore_backoff);
    }
}
