//! # Quire Testkit
//!
//! Test utilities for the Quire journal.
//!
//! This crate provides:
//! - Temporary databases and journals, and helpers to damage journal files
//! - Property-based test generators using proptest
//! - Partial-order assertions over journal contents
//! - A crash recovery harness with a model-based checker
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quire_testkit::prelude::*;
//!
//! #[test]
//! fn commit_is_journaled() {
//!     let db = TestDatabase::new();
//!     let mut txn = db.begin().unwrap();
//!     let id = txn.id();
//!     db.commit(&mut txn).unwrap();
//!     assert_partial_ordered(
//!         &[Expected::Start(id), Expected::Commit(id)],
//!         &db.latest_journal_entries(),
//!     );
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod partial_order;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::partial_order::*;
}

pub use fixtures::*;
pub use generators::*;
pub use partial_order::*;
