//! Store configuration.

use crate::crypto::{AesGcmProvider, EncryptionProvider};
use std::fmt;
use std::sync::Arc;

/// Default number of records committed per batch chunk.
pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 100;

/// Default upper bound for related-record traversal depth.
pub const DEFAULT_MAX_GRAPH_DEPTH: usize = 8;

/// Configuration for opening a storage manager.
#[derive(Clone)]
pub struct Config {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the commit log on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Records per chunk for batch operations that don't set their own.
    pub batch_chunk_size: usize,

    /// Hard cap on the depth accepted by related-record traversal.
    pub max_graph_depth: usize,

    /// AEAD implementation used by `Full` and `Selective` strategies.
    pub provider: Arc<dyn EncryptionProvider>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            batch_chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
            max_graph_depth: DEFAULT_MAX_GRAPH_DEPTH,
            provider: Arc::new(AesGcmProvider),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("create_if_missing", &self.create_if_missing)
            .field("sync_on_commit", &self.sync_on_commit)
            .field("batch_chunk_size", &self.batch_chunk_size)
            .field("max_graph_depth", &self.max_graph_depth)
            .field("provider", &self.provider.name())
            .finish()
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store directory if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the commit log on every commit.
    #[must_use]
    pub fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the default batch chunk size.
    #[must_use]
    pub fn batch_chunk_size(mut self, size: usize) -> Self {
        self.batch_chunk_size = size;
        self
    }

    /// Sets the maximum related-record traversal depth.
    #[must_use]
    pub fn max_graph_depth(mut self, depth: usize) -> Self {
        self.max_graph_depth = depth;
        self
    }

    /// Sets the encryption provider.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn EncryptionProvider>) -> Self {
        self.provider = provider;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert_eq!(config.batch_chunk_size, 100);
        assert_eq!(config.provider.name(), "aes-256-gcm");
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .batch_chunk_size(16)
            .max_graph_depth(2);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.batch_chunk_size, 16);
        assert_eq!(config.max_graph_depth, 2);
    }

    #[test]
    fn debug_names_provider() {
        let debug = format!("{:?}", Config::default());
        assert!(debug.contains("aes-256-gcm"));
    }
}
