//! Property-based test generators using proptest.
//!
//! Provides strategies for journal values and for scripts of page
//! operations that a model can replay.

use proptest::prelude::*;
use quire_core::{FileNumber, Loggable, Lsn, PageNum, TransactionId};
use std::collections::BTreeMap;

/// Strategy for valid (non-reserved) transaction IDs.
pub fn txn_id_strategy() -> impl Strategy<Value = TransactionId> {
    (1u64..=u64::MAX).prop_map(TransactionId::new)
}

/// Strategy for page numbers drawn from a small range, so generated
/// operations collide on the same pages.
pub fn page_num_strategy() -> impl Strategy<Value = PageNum> {
    (0u64..8).prop_map(PageNum::new)
}

/// Strategy for page contents.
pub fn page_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for journal file numbers, including both ends of the range.
pub fn file_number_strategy() -> impl Strategy<Value = FileNumber> {
    prop_oneof![
        1 => Just(FileNumber::ZERO),
        1 => Just(FileNumber::MAX),
        8 => (0i64..=i64::from(FileNumber::MAX.get())).prop_map(|n| {
            FileNumber::new(n).expect("in range")
        }),
    ]
}

/// Strategy for LSNs.
pub fn lsn_strategy() -> impl Strategy<Value = Lsn> {
    (file_number_strategy(), 6u64..1 << 32).prop_map(|(file, offset)| Lsn::new(file, offset))
}

/// Strategy for any loggable.
pub fn loggable_strategy() -> impl Strategy<Value = Loggable> {
    let txn = txn_id_strategy;
    prop_oneof![
        txn().prop_map(|txn| Loggable::TxnStart { txn }),
        txn().prop_map(|txn| Loggable::TxnCommit { txn }),
        txn().prop_map(|txn| Loggable::TxnAbort { txn }),
        any::<u64>().prop_map(|t| Loggable::Checkpoint {
            txn: TransactionId::new(t)
        }),
        (txn(), page_num_strategy(), page_data_strategy())
            .prop_map(|(txn, page, data)| Loggable::CreatePage { txn, page, data }),
        (
            txn(),
            page_num_strategy(),
            0u32..512,
            page_data_strategy(),
            page_data_strategy()
        )
            .prop_map(|(txn, page, offset, before, after)| Loggable::UpdatePage {
                txn,
                page,
                offset,
                before,
                after,
            }),
        (txn(), page_num_strategy(), page_data_strategy())
            .prop_map(|(txn, page, before)| Loggable::FreePage { txn, page, before }),
    ]
}

/// A page operation inside a generated transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOperation {
    /// Create a page.
    Create {
        /// Page number.
        page: PageNum,
        /// Initial contents.
        data: Vec<u8>,
    },
    /// Overwrite bytes of a page.
    Update {
        /// Page number.
        page: PageNum,
        /// Byte offset.
        offset: u32,
        /// New bytes.
        bytes: Vec<u8>,
    },
    /// Remove a page.
    Free {
        /// Page number.
        page: PageNum,
    },
}

impl PageOperation {
    /// Applies the operation to a model of the page store.
    ///
    /// Returns false, leaving the model untouched, when the database would
    /// reject the operation: creating an existing page, or updating or
    /// freeing a missing one, or updating past the end of a page.
    pub fn apply(&self, pages: &mut BTreeMap<PageNum, Vec<u8>>) -> bool {
        match self {
            Self::Create { page, data } => {
                if pages.contains_key(page) {
                    return false;
                }
                pages.insert(*page, data.clone());
                true
            }
            Self::Update {
                page,
                offset,
                bytes,
            } => {
                let Some(contents) = pages.get_mut(page) else {
                    return false;
                };
                let start = *offset as usize;
                if start > contents.len() {
                    return false;
                }
                let end = start + bytes.len();
                if contents.len() < end {
                    contents.resize(end, 0);
                }
                contents[start..end].copy_from_slice(bytes);
                true
            }
            Self::Free { page } => pages.remove(page).is_some(),
        }
    }
}

/// Strategy for page operations.
pub fn page_operation_strategy() -> impl Strategy<Value = PageOperation> {
    prop_oneof![
        3 => (page_num_strategy(), page_data_strategy())
            .prop_map(|(page, data)| PageOperation::Create { page, data }),
        4 => (page_num_strategy(), 0u32..64, prop::collection::vec(any::<u8>(), 0..64))
            .prop_map(|(page, offset, bytes)| PageOperation::Update { page, offset, bytes }),
        1 => page_num_strategy().prop_map(|page| PageOperation::Free { page }),
    ]
}

/// How a generated transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnEnd {
    /// Commit the transaction.
    Commit,
    /// Abort the transaction.
    Abort,
    /// Leave it running; a crash will cut it off.
    LeaveOpen,
}

/// A generated transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnScript {
    /// Operations in order.
    pub operations: Vec<PageOperation>,
    /// How the transaction ends.
    pub end: TxnEnd,
}

/// Strategy for one transaction script.
pub fn txn_script_strategy() -> impl Strategy<Value = TxnScript> {
    (
        prop::collection::vec(page_operation_strategy(), 1..8),
        prop_oneof![
            4 => Just(TxnEnd::Commit),
            1 => Just(TxnEnd::Abort),
            1 => Just(TxnEnd::LeaveOpen),
        ],
    )
        .prop_map(|(operations, end)| TxnScript { operations, end })
}

/// Strategy for a sequence of transaction scripts.
pub fn txn_script_sequence_strategy(
    min_txns: usize,
    max_txns: usize,
) -> impl Strategy<Value = Vec<TxnScript>> {
    prop::collection::vec(txn_script_strategy(), min_txns..max_txns)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for tests that touch the filesystem.
    #[must_use]
    pub fn io_bound() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 50,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
