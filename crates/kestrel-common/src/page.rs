//! Page identifiers and size constants for KestrelDB storage.

use serde::{Deserialize, Serialize};

/// Size of a page in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Unique identifier for a page within the data file.
///
/// Page ids are allocated monotonically by the buffer pool. Id 0 is
/// reserved for the header page; -1 marks the absence of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub i32);

impl PageId {
    /// Sentinel for "no page".
    pub const INVALID: PageId = PageId(-1);

    /// The header page holding index name to root id records.
    pub const HEADER: PageId = PageId(0);

    /// Returns true if this id refers to an actual page.
    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }

    /// Byte offset of this page within the data file.
    pub fn offset(&self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constant() {
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_page_id_validity() {
        assert!(PageId(0).is_valid());
        assert!(PageId(17).is_valid());
        assert!(!PageId::INVALID.is_valid());
        assert!(!PageId(-5).is_valid());
    }

    #[test]
    fn test_header_page_id() {
        assert_eq!(PageId::HEADER, PageId(0));
        assert!(PageId::HEADER.is_valid());
    }

    #[test]
    fn test_page_id_offset() {
        assert_eq!(PageId(0).offset(), 0);
        assert_eq!(PageId(1).offset(), 4096);
        assert_eq!(PageId(100).offset(), 100 * 4096);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId(42).to_string(), "page:42");
        assert_eq!(PageId::INVALID.to_string(), "page:-1");
    }

    #[test]
    fn test_page_id_ordering() {
        assert!(PageId(1) < PageId(2));
        assert!(PageId::INVALID < PageId::HEADER);
    }

    #[test]
    fn test_page_id_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PageId(1));
        set.insert(PageId(2));
        set.insert(PageId(1));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_page_id_serde_roundtrip() {
        let original = PageId(500);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
