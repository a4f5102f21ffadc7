//! Journal (write-ahead log) for durability and crash recovery.
//!
//! Every page mutation is appended to the journal before it is applied, and
//! a transaction counts as committed only once its commit record has been
//! flushed. On restart, [`crate::recovery`] replays the journal.
//!
//! ## Files
//!
//! The journal is a sequence of numbered files (`0000000000.log` ...
//! `0000007fff.log`, then wrapping to zero). Exactly one file is written at
//! a time; rotation closes it and starts the next.
//!
//! ## Record Format
//!
//! ```text
//! | tag (1) | txn (8) | data_len (4) | data (N) | back_link (4) | crc32 (4) |
//! ```
//!
//! A record's LSN is `(file number, offset of its tag byte)`.
//!
//! ## Invariants
//!
//! - Files are **append-only**; records are never modified after write
//! - The commit record is **flushed before commit is acknowledged**
//! - A truncated final record is a clean end of the journal
//! - Checksum failures and unknown tags are **fatal**

pub mod files;
mod loggable;
mod reader;
mod record;
mod writer;

pub use loggable::{LogType, Loggable};
pub use reader::{JournalEntry, JournalReader};
pub use record::{
    compute_crc32, decode_record, encode_record, RecordHeader, MAX_PAYLOAD_LEN,
    RECORD_HEADER_LEN, RECORD_TRAILER_LEN,
};
pub use writer::Journal;
