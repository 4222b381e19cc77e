//! B+Tree index for KestrelDB.
//!
//! This crate provides:
//! - Leaf and internal page layouts over buffer pool pages
//! - The header page mapping index names to root page ids
//! - A concurrent B+Tree with latch-crabbing descent
//! - A pinned, read-latched range iterator over the leaf chain

mod btree;

pub use btree::header::{HeaderPage, HeaderPageMut};
pub use btree::internal::{InternalPage, InternalPageMut};
pub use btree::iterator::TreeIter;
pub use btree::leaf::{LeafPage, LeafPageMut};
pub use btree::page::{PageType, LEAF_HEADER_SIZE, NODE_HEADER_SIZE};
pub use btree::tree::BPlusTree;
