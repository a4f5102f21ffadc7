//! Error types for the journal core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in journal and recovery operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Page store error.
    #[error("storage error: {0}")]
    Storage(#[from] quire_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Caller passed a value outside the accepted range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the bad argument.
        message: String,
    },

    /// Journal file is corrupted or has an invalid header.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A record carried a type tag no loggable kind is registered for.
    #[error("unknown log type {tag:#04x} at offset {offset}")]
    UnknownLogType {
        /// The offending tag byte.
        tag: u8,
        /// Offset of the record within its file.
        offset: u64,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record.
        actual: u32,
    },

    /// The journal directory is locked by another process.
    #[error("journal directory locked: {}", path.display())]
    JournalLocked {
        /// The lock file that could not be acquired.
        path: PathBuf,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The journal has been shut down.
    #[error("journal is shut down")]
    JournalClosed,

    /// A write or sync failed earlier; the file may hold a partial record,
    /// so the journal takes no further records until it is reopened.
    #[error("journal failed after an earlier I/O error")]
    JournalFailed,

    /// Recovery could not complete.
    #[error("recovery failed: {message}")]
    RecoveryFailed {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a recovery failed error.
    pub fn recovery_failed(message: impl Into<String>) -> Self {
        Self::RecoveryFailed {
            message: message.into(),
        }
    }

    /// Returns true if this error means the journal content cannot be trusted.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::JournalCorruption { .. } | Self::UnknownLogType { .. } | Self::ChecksumMismatch { .. }
        )
    }
}
