//! # Quire Core
//!
//! Journal (write-ahead log) and crash recovery for Quire.
//!
//! This crate provides:
//! - Log sequence numbers ([`Lsn`]) and journal file numbering
//! - The [`Journal`] writer with buffering, rotation and checkpoints
//! - The [`JournalReader`] for scanning journal files
//! - Redo/undo [`recovery`] against a [`PageStore`](quire_storage::PageStore)
//! - A [`TransactionManager`] and [`Database`] facade that follow the
//!   write-ahead rule

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod dir;
mod error;
pub mod journal;
mod lsn;
pub mod recovery;
mod transaction;
mod types;

pub use config::JournalConfig;
pub use database::{Database, PAGE_FILE_NAME};
pub use dir::JournalDir;
pub use error::{CoreError, CoreResult};
pub use journal::{Journal, JournalEntry, JournalReader, LogType, Loggable};
pub use lsn::{FileNumber, Lsn};
pub use recovery::{recover, RecoveryReport};
pub use transaction::{Transaction, TransactionManager, TransactionState};
pub use types::{PageNum, TransactionId};

/// Version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
