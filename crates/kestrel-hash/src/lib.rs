//! Concurrent extendible hash table for KestrelDB.
//!
//! This crate provides the general-purpose associative container used by
//! the buffer pool (page table) and by auxiliary bookkeeping structures.

mod table;

pub use table::ExtendibleHashTable;
