//! Error types for page store operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A page write would grow the page past the addressable size.
    #[error("page {page} write out of range: offset {offset}, len {len}")]
    OutOfRange {
        /// The page being written.
        page: u64,
        /// The requested write offset.
        offset: usize,
        /// The requested write length.
        len: usize,
    },

    /// The store's snapshot file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}
