//! Configuration structures for KestrelDB.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the index subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the data file.
    pub data_dir: PathBuf,
    /// Buffer pool size in number of frames.
    pub buffer_pool_frames: usize,
    /// Access-history depth of the LRU-K replacement policy.
    pub lru_k: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            buffer_pool_frames: 1024,
            lru_k: 2,
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_frames * crate::page::PAGE_SIZE
    }
}

/// Per-index configuration.
///
/// Node capacities are in slots, not bytes. When unset, capacities are
/// derived from the page size and the key width at index creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Maximum entries per leaf page.
    pub leaf_max_size: Option<usize>,
    /// Maximum entries per internal page.
    pub internal_max_size: Option<usize>,
}

impl IndexConfig {
    /// Config with explicit node capacities, mainly for tests that need
    /// small fan-outs.
    pub fn with_max_sizes(leaf: usize, internal: usize) -> Self {
        Self {
            leaf_max_size: Some(leaf),
            internal_max_size: Some(internal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PAGE_SIZE;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.buffer_pool_frames, 1024);
        assert_eq!(config.lru_k, 2);
        assert!(config.fsync_enabled);
    }

    #[test]
    fn test_buffer_pool_size_bytes() {
        let config = StorageConfig::default();
        assert_eq!(config.buffer_pool_size_bytes(), 1024 * PAGE_SIZE);
    }

    #[test]
    fn test_storage_config_custom() {
        let config = StorageConfig {
            data_dir: PathBuf::from("/var/lib/kestrel"),
            buffer_pool_frames: 64,
            lru_k: 3,
            fsync_enabled: false,
        };
        assert_eq!(config.buffer_pool_size_bytes(), 64 * PAGE_SIZE);
        assert!(!config.fsync_enabled);
    }

    #[test]
    fn test_storage_config_serde_roundtrip() {
        let original = StorageConfig::default();
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: StorageConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(original.data_dir, deserialized.data_dir);
        assert_eq!(original.buffer_pool_frames, deserialized.buffer_pool_frames);
        assert_eq!(original.lru_k, deserialized.lru_k);
        assert_eq!(original.fsync_enabled, deserialized.fsync_enabled);
    }

    #[test]
    fn test_index_config_defaults() {
        let config = IndexConfig::default();
        assert!(config.leaf_max_size.is_none());
        assert!(config.internal_max_size.is_none());
    }

    #[test]
    fn test_index_config_with_max_sizes() {
        let config = IndexConfig::with_max_sizes(4, 5);
        assert_eq!(config.leaf_max_size, Some(4));
        assert_eq!(config.internal_max_size, Some(5));
    }

    #[test]
    fn test_index_config_serde_roundtrip() {
        let original = IndexConfig::with_max_sizes(8, 16);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: IndexConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original.leaf_max_size, deserialized.leaf_max_size);
        assert_eq!(original.internal_max_size, deserialized.internal_max_size);
    }
}
