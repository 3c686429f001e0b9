//! Server configuration.

use tidemark_sync_protocol::PROTOCOL_VERSION;

/// Configuration for the reference server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum records per page of changes.
    pub page_size: usize,
    /// Maximum operations per batch.
    pub batch_max_requests: usize,
    /// Protocol version announced in server info.
    pub protocol_version: u32,
    /// Capabilities announced in server info.
    pub capabilities: Vec<String>,
}

impl ServerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            page_size: 100,
            batch_max_requests: 25,
            protocol_version: PROTOCOL_VERSION,
            capabilities: vec!["tombstones".into(), "pagination-anchor".into()],
        }
    }

    /// Sets the maximum page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Sets the maximum batch size.
    pub fn with_batch_max_requests(mut self, max: usize) -> Self {
        self.batch_max_requests = max.max(1);
        self
    }

    /// Sets the announced protocol version.
    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    /// Adds a capability.
    pub fn with_capability(mut self, name: impl Into<String>) -> Self {
        self.capabilities.push(name.into());
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.batch_max_requests, 25);
        assert_eq!(config.protocol_version, PROTOCOL_VERSION);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_page_size(0)
            .with_batch_max_requests(3)
            .with_protocol_version(7)
            .with_capability("attachments");

        assert_eq!(config.page_size, 1);
        assert_eq!(config.batch_max_requests, 3);
        assert_eq!(config.protocol_version, 7);
        assert!(config.capabilities.iter().any(|c| c == "attachments"));
    }
}
