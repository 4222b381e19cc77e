//! Buffer pool management for KestrelDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - LRU-K eviction policy for cache management
//! - Pin counting for concurrent access
//! - Dirty page tracking with write-back to the disk manager
//! - Per-page reader-writer latches exposed through the frames

mod disk;
mod frame;
mod pool;
mod replacer;

pub use disk::{DiskManager, DiskManagerConfig};
pub use frame::{BufferFrame, FrameId, PageReadGuard, PageWriteGuard};
pub use pool::{BufferPoolConfig, BufferPoolManager};
pub use replacer::{LruKReplacer, Replacer};
