//! Configuration structures for Interlock.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default per-tree node cache budget in bytes (256 KiB).
pub const NODE_CACHE_BYTES: usize = 1 << 18;

/// Storage configuration shared by every B+ tree the engine opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the `BPT_*` files.
    pub data_dir: PathBuf,
    /// Node cache budget per tree, in bytes. Zero disables caching.
    pub node_cache_bytes: usize,
    /// Reuse existing files on open. When false, files are truncated.
    pub retrieve: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./bin"),
            node_cache_bytes: NODE_CACHE_BYTES,
            retrieve: true,
        }
    }
}

impl StorageConfig {
    /// Configuration rooted at a specific directory.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Same configuration with caching disabled.
    pub fn uncached(mut self) -> Self {
        self.node_cache_bytes = 0;
        self
    }
}

/// Engine configuration for the command-loop binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Storage settings for all tables.
    pub storage: StorageConfig,
}

impl EngineConfig {
    /// Configuration rooted at a specific data directory.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::at(data_dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./bin"));
        assert_eq!(config.node_cache_bytes, NODE_CACHE_BYTES);
        assert_eq!(config.node_cache_bytes, 262_144);
        assert!(config.retrieve);
    }

    #[test]
    fn test_storage_config_at() {
        let config = StorageConfig::at("/tmp/interlock");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/interlock"));
        assert_eq!(config.node_cache_bytes, NODE_CACHE_BYTES);
    }

    #[test]
    fn test_storage_config_uncached() {
        let config = StorageConfig::default().uncached();
        assert_eq!(config.node_cache_bytes, 0);
    }

    #[test]
    fn test_storage_config_serde_roundtrip() {
        let original = StorageConfig::default();
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: StorageConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(original.data_dir, deserialized.data_dir);
        assert_eq!(original.node_cache_bytes, deserialized.node_cache_bytes);
        assert_eq!(original.retrieve, deserialized.retrieve);
    }

    #[test]
    fn test_engine_config_at() {
        let config = EngineConfig::at("./data");
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
    }
}
