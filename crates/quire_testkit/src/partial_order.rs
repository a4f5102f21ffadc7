//! Partial-order assertions over journal contents.
//!
//! Concurrent activity (checkpoints, other transactions) interleaves freely
//! with the records a test cares about. Rather than matching the journal
//! exactly, a test lists the records it expects, in order, and the checker
//! finds them as a subsequence of what was actually written.
//!
//! One extra rule keeps that loose matching honest: once a transaction's
//! expected `Start` has been matched, a commit or abort of that transaction
//! that the test did not list is an error.

use quire_core::{LogType, Loggable, TransactionId};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// An expected journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// `TxnStart` of the transaction.
    Start(TransactionId),
    /// `TxnCommit` of the transaction.
    Commit(TransactionId),
    /// `TxnAbort` of the transaction.
    Abort(TransactionId),
    /// Any checkpoint.
    Checkpoint,
    /// A record of the given kind belonging to the transaction.
    Record(LogType, TransactionId),
}

impl Expected {
    /// Returns true if `loggable` satisfies this expectation.
    #[must_use]
    pub fn matches(&self, loggable: &Loggable) -> bool {
        let txn = loggable.transaction_id();
        match *self {
            Self::Start(t) => loggable.log_type() == LogType::TxnStart && txn == t,
            Self::Commit(t) => loggable.log_type() == LogType::TxnCommit && txn == t,
            Self::Abort(t) => loggable.log_type() == LogType::TxnAbort && txn == t,
            Self::Checkpoint => loggable.log_type() == LogType::Checkpoint,
            Self::Record(log_type, t) => loggable.log_type() == log_type && txn == t,
        }
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start(t) => write!(f, "START {t}"),
            Self::Commit(t) => write!(f, "COMMIT {t}"),
            Self::Abort(t) => write!(f, "ABORT {t}"),
            Self::Checkpoint => f.write_str("CHECKPOINT"),
            Self::Record(log_type, t) => write!(f, "{log_type} {t}"),
        }
    }
}

/// Why a journal did not conform to the expected partial order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartialOrderError {
    /// An expected record was not found after the ones already matched.
    #[error("expected {expected} (#{index}) not found in journal entries")]
    Missing {
        /// The record that was not found.
        expected: Expected,
        /// Its position in the expected list.
        index: usize,
    },

    /// A commit that was not listed for a transaction whose start was.
    #[error("COMMIT {0} was not expected; list it explicitly")]
    UnexpectedCommit(TransactionId),

    /// An abort that was not listed for a transaction whose start was.
    #[error("ABORT {0} was not expected; list it explicitly")]
    UnexpectedAbort(TransactionId),
}

/// Checks that `expected` occurs in `actual` as an ordered subsequence.
///
/// Matching stops once every expected record has been found. An empty
/// expectation always conforms.
///
/// # Errors
///
/// Returns the first violation found.
pub fn check_partial_order(
    expected: &[Expected],
    actual: &[Loggable],
) -> Result<(), PartialOrderError> {
    let mut index = 0;
    let mut started = Vec::new();
    let mut unexpected_commits = BTreeSet::new();
    let mut unexpected_aborts = BTreeSet::new();

    for loggable in actual {
        let Some(next) = expected.get(index) else {
            break;
        };

        if next.matches(loggable) {
            if let Expected::Start(txn) = next {
                started.push(*txn);
            }
            index += 1;
        } else {
            match loggable.log_type() {
                LogType::TxnCommit => {
                    unexpected_commits.insert(loggable.transaction_id());
                }
                LogType::TxnAbort => {
                    unexpected_aborts.insert(loggable.transaction_id());
                }
                _ => {}
            }
        }
    }

    if let Some(missing) = expected.get(index) {
        return Err(PartialOrderError::Missing {
            expected: *missing,
            index,
        });
    }

    for txn in started {
        if unexpected_aborts.contains(&txn) {
            return Err(PartialOrderError::UnexpectedAbort(txn));
        }
        if unexpected_commits.contains(&txn) {
            return Err(PartialOrderError::UnexpectedCommit(txn));
        }
    }
    Ok(())
}

/// Panics with a readable message unless `actual` conforms to `expected`.
///
/// # Panics
///
/// Panics if [`check_partial_order`] reports a violation.
#[track_caller]
pub fn assert_partial_ordered(expected: &[Expected], actual: &[Loggable]) {
    if let Err(e) = check_partial_order(expected, actual) {
        let listing: Vec<String> = actual.iter().map(ToString::to_string).collect();
        panic!("{e}\njournal entries:\n  {}", listing.join("\n  "));
    }
}
