//! Error types for KestrelDB.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using KestrelError.
pub type Result<T> = std::result::Result<T, KestrelError>;

/// Errors that can occur in KestrelDB operations.
#[derive(Debug, Error)]
pub enum KestrelError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: PageId },

    #[error("Page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: PageId, reason: String },

    // Index errors
    #[error("Key not found")]
    KeyNotFound,

    #[error("Duplicate key")]
    DuplicateKey,

    #[error("Invalid page type on {page_id}: expected {expected}, found {found}")]
    InvalidPageType {
        page_id: PageId,
        expected: &'static str,
        found: i32,
    },

    #[error("Index record table full on header page")]
    HeaderPageFull,

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Internal errors (invariant violations)
    #[error("Internal error: {0}")]
    Internal(String),
}
