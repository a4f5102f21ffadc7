//! Crash recovery.
//!
//! Recovery reads every journal file in order and works on the records after
//! the last checkpoint:
//!
//! 1. **Analysis**: note which transactions started, committed or aborted.
//! 2. **Redo**: replay every page mutation in LSN order. Aborted
//!    transactions logged compensating records before their abort marker,
//!    so replaying them leaves their pages restored.
//! 3. **Undo**: reverse, newest first, the mutations of transactions that
//!    neither committed nor aborted.
//!
//! Both passes are idempotent, so a crash during recovery is recovered by
//! running it again.
//!
//! Recovery works on pages, not on transaction histories. If a committed
//! transaction touches a page after an uncommitted one did, undoing the
//! uncommitted change can leave the page matching no serial order of the
//! transactions.

use crate::error::CoreResult;
use crate::journal::files::{list_journal_files, parse_file_number, replay_order};
use crate::journal::{Journal, JournalEntry, JournalReader, LogType};
use crate::lsn::{FileNumber, Lsn};
use crate::types::TransactionId;
use quire_storage::PageStore;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{error, info, warn};

/// Final state of a transaction seen during analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutcome {
    /// Started but neither committed nor aborted.
    Running,
    /// Commit record found.
    Committed,
    /// Abort record found.
    Aborted,
}

/// All complete records of a journal directory, in replay order.
#[derive(Debug, Default)]
pub struct JournalScan {
    /// Files read, in replay order.
    pub files: Vec<FileNumber>,
    /// Records read.
    pub entries: Vec<JournalEntry>,
    /// Files whose data ended in an incomplete record.
    pub truncated: Vec<FileNumber>,
}

impl JournalScan {
    /// Index of the first record after the last checkpoint.
    #[must_use]
    pub fn replay_start(&self) -> usize {
        self.entries
            .iter()
            .rposition(|e| e.loggable.log_type() == LogType::Checkpoint)
            .map_or(0, |i| i + 1)
    }

    /// Returns true if the journal is empty or ends with a checkpoint.
    #[must_use]
    pub fn ends_with_checkpoint(&self) -> bool {
        self.entries
            .last()
            .map_or(true, |e| e.loggable.log_type() == LogType::Checkpoint)
    }
}

/// Reads every journal file in `dir`.
///
/// # Errors
///
/// Returns the first corruption or I/O error encountered.
pub fn scan_journal(dir: &Path) -> CoreResult<JournalScan> {
    let numbers = list_journal_files(dir)?
        .iter()
        .map(|path| parse_file_number(path))
        .collect::<CoreResult<Vec<_>>>()?;

    let mut scan = JournalScan {
        files: replay_order(numbers),
        ..JournalScan::default()
    };

    for &number in &scan.files {
        let mut reader = JournalReader::open(dir, number)?;
        while let Some(entry) = reader.next_entry()? {
            scan.entries.push(entry);
        }
        if reader.has_trailing_bytes() {
            scan.truncated.push(number);
        }
    }
    Ok(scan)
}

/// What recovery found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Journal files read, in replay order.
    pub files: Vec<FileNumber>,
    /// Records read across all files.
    pub entries_read: usize,
    /// Mutations replayed.
    pub redone: usize,
    /// Mutations reversed.
    pub undone: usize,
    /// Transactions committed after the last checkpoint.
    pub committed: Vec<TransactionId>,
    /// Transactions aborted after the last checkpoint.
    pub aborted: Vec<TransactionId>,
    /// Transactions rolled back by recovery.
    pub losers: Vec<TransactionId>,
    /// LSN of the last record read.
    pub last_lsn: Option<Lsn>,
    /// Highest transaction id anywhere in the journal.
    pub max_txn: Option<TransactionId>,
    /// True if the journal was empty or ended with a checkpoint.
    pub clean: bool,
}

impl RecoveryReport {
    /// The last journal file in replay order.
    #[must_use]
    pub fn last_file(&self) -> Option<FileNumber> {
        self.files.last().copied()
    }

    /// Returns true if recovery changed the page store.
    #[must_use]
    pub fn changed_pages(&self) -> bool {
        self.redone > 0 || self.undone > 0
    }
}

/// Recovers `store` from the journal.
///
/// The journal is put into recovery mode for the duration, so nothing can be
/// appended while records are replayed.
///
/// # Errors
///
/// Returns the corruption error that stopped the scan, or a store error.
pub fn recover(journal: &Journal, store: &mut dyn PageStore) -> CoreResult<RecoveryReport> {
    journal.set_in_recovery(true);
    let result = run(journal.dir(), store);
    journal.set_in_recovery(false);

    if let Err(e) = &result {
        error!(dir = %journal.dir().display(), error = %e, "recovery failed");
    }
    result
}

fn run(dir: &Path, store: &mut dyn PageStore) -> CoreResult<RecoveryReport> {
    let scan = scan_journal(dir)?;
    for number in &scan.truncated {
        warn!(file_number = %number, "journal file ends in an incomplete record");
    }

    let mut report = RecoveryReport {
        entries_read: scan.entries.len(),
        last_lsn: scan.entries.last().map(|e| e.lsn),
        max_txn: scan
            .entries
            .iter()
            .map(|e| e.loggable.transaction_id())
            .max(),
        clean: scan.ends_with_checkpoint(),
        ..RecoveryReport::default()
    };

    let replay = &scan.entries[scan.replay_start()..];
    if replay.is_empty() {
        report.files = scan.files;
        info!(entries = report.entries_read, "journal clean; nothing to recover");
        return Ok(report);
    }

    let outcomes = analyze(replay);

    for entry in replay.iter().filter(|e| !e.loggable.is_boundary()) {
        entry.loggable.redo(store)?;
        report.redone += 1;
    }

    let losers: BTreeSet<TransactionId> = outcomes
        .iter()
        .filter(|(_, outcome)| **outcome == TxnOutcome::Running)
        .map(|(txn, _)| *txn)
        .collect();

    for entry in replay.iter().rev() {
        let loggable = &entry.loggable;
        if !loggable.is_boundary() && losers.contains(&loggable.transaction_id()) {
            loggable.undo(store)?;
            report.undone += 1;
        }
    }

    store.sync()?;

    for (txn, outcome) in outcomes {
        match outcome {
            TxnOutcome::Committed => report.committed.push(txn),
            TxnOutcome::Aborted => report.aborted.push(txn),
            TxnOutcome::Running => report.losers.push(txn),
        }
    }
    report.files = scan.files;

    info!(
        files = report.files.len(),
        entries = report.entries_read,
        redone = report.redone,
        undone = report.undone,
        losers = report.losers.len(),
        "recovery complete"
    );
    Ok(report)
}

/// Determines the outcome of every transaction in `entries`.
#[must_use]
pub fn analyze(entries: &[JournalEntry]) -> BTreeMap<TransactionId, TxnOutcome> {
    let mut outcomes = BTreeMap::new();
    for entry in entries {
        let txn = entry.loggable.transaction_id();
        match entry.loggable.log_type() {
            LogType::Checkpoint => {}
            LogType::TxnCommit => {
                outcomes.insert(txn, TxnOutcome::Committed);
            }
            LogType::TxnAbort => {
                outcomes.insert(txn, TxnOutcome::Aborted);
            }
            _ => {
                outcomes.entry(txn).or_insert(TxnOutcome::Running);
            }
        }
    }
    outcomes
}
