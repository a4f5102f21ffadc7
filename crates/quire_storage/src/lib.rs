//! # Quire Storage
//!
//! Page store trait and implementations for the Quire journal.
//!
//! This crate is the storage collaborator that journal records are redone
//! and undone against. A page store is a map from [`PageNum`] to a
//! variable-length byte page. It knows nothing about the journal format;
//! the journal owns all record interpretation.
//!
//! ## Design Principles
//!
//! - Page writes are idempotent: writing the same bytes twice converges
//! - Writing past the end of a page extends it with zeroes
//! - Writing to a missing page creates it
//! - `sync` makes every previous mutation durable
//!
//! ## Available Stores
//!
//! - [`InMemoryPageStore`] - For testing and ephemeral storage
//! - [`FilePageStore`] - Snapshot file replaced atomically on `sync`
//!
//! ## Example
//!
//! ```rust
//! use quire_storage::{InMemoryPageStore, PageNum, PageStore};
//!
//! let mut store = InMemoryPageStore::new();
//! store.write_at(PageNum::new(7), 2, b"hi").unwrap();
//! assert_eq!(store.read_page(PageNum::new(7)).unwrap(), Some(b"\0\0hi".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FilePageStore;
pub use memory::InMemoryPageStore;
pub use store::{PageNum, PageStore, MAX_PAGE_LEN};
