//! Crash recovery testing for Quire.
//!
//! This module simulates crashes at various points of a transaction's life
//! and verifies that reopening the database recovers the right pages.
//!
//! ## Test Strategy
//!
//! 1. **Crash after commit** - Committed pages survive
//! 2. **Crash before commit** - In-flight pages are rolled back
//! 3. **Crash after abort** - Compensated pages stay rolled back
//! 4. **Torn tail record** - A half-written final record is ignored
//! 5. **Crash during recovery** - Running recovery twice converges
//!
//! [`run_scripts`] drives the same checks from generated transactions,
//! comparing the recovered store against a model.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quire_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! harness.run_all_tests();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use crate::fixtures::{chop_tail, latest_journal_file, small_config};
use crate::generators::{PageOperation, TxnEnd, TxnScript};
use quire_core::{
    recover, CoreResult, Database, Journal, JournalConfig, PageNum, Transaction, PAGE_FILE_NAME,
};
use quire_storage::{FilePageStore, PageStore};
use std::collections::BTreeMap;
use tempfile::TempDir;

/// A model of the page store: page number to contents.
pub type PageModel = BTreeMap<PageNum, Vec<u8>>;

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash with a transaction still running.
    BeforeCommit,
    /// Crash right after a commit, before any checkpoint.
    AfterCommit,
    /// Crash right after an abort.
    AfterAbort,
    /// Crash part way through writing the last record.
    DuringRecordWrite,
    /// Crash right after a checkpoint.
    AfterCheckpoint,
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Expected pages after recovery.
    pub expected_pages: usize,
    /// Actual pages after recovery.
    pub actual_pages: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, pages: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_pages: pages,
            actual_pages: pages,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_pages: expected,
            actual_pages: actual,
            error: Some(error.to_string()),
        }
    }

    fn compare(description: &str, expected: &PageModel, actual: &PageModel) -> Self {
        if expected == actual {
            Self::pass(description, expected.len())
        } else {
            Self::fail(
                description,
                expected.len(),
                actual.len(),
                &format!("expected {expected:?}, recovered {actual:?}"),
            )
        }
    }
}

/// Reads every page of `db` into a model.
pub fn snapshot(db: &Database) -> CoreResult<PageModel> {
    let mut pages = PageModel::new();
    for page in db.page_numbers()? {
        if let Some(data) = db.read_page(page)? {
            pages.insert(page, data);
        }
    }
    Ok(pages)
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    temp_dir: TempDir,
    config: JournalConfig,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a harness over a fresh temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = small_config(&temp_dir.path().join("db"));
        Self {
            temp_dir,
            config,
            results: Vec::new(),
        }
    }

    /// Opens a fresh database for testing.
    fn open_fresh_db(&self) -> CoreResult<Database> {
        let data_dir = self.temp_dir.path().join("db");
        if data_dir.exists() {
            std::fs::remove_dir_all(&data_dir)?;
        }
        Database::open_path(self.config.clone())
    }

    /// Reopens the database, running recovery.
    fn reopen_db(&self) -> CoreResult<Database> {
        Database::open_path(self.config.clone())
    }

    /// Commits one page per transaction, then crashes at `point` while a
    /// final transaction on page 100 is in the state `point` describes.
    ///
    /// Returns the model of what must survive.
    fn prepare(&self, point: CrashPoint) -> CoreResult<PageModel> {
        let db = self.open_fresh_db()?;
        let mut expected = PageModel::new();

        for i in 0..10u8 {
            let page = PageNum::new(u64::from(i));
            db.transaction(|db, txn| db.create_page(txn, page, vec![i; 100]))?;
            expected.insert(page, vec![i; 100]);
        }
        db.transaction(|db, txn| db.update_page(txn, PageNum::new(3), 98, b"grown"))?;
        let mut grown = vec![3u8; 98];
        grown.extend_from_slice(b"grown");
        expected.insert(PageNum::new(3), grown);

        let last = PageNum::new(100);
        match point {
            CrashPoint::BeforeCommit => {
                let mut txn = db.begin()?;
                db.create_page(&mut txn, last, b"lost".to_vec())?;
                db.update_page(&mut txn, PageNum::new(1), 0, b"lost")?;
                db.free_page(&mut txn, PageNum::new(2))?;
                db.journal().flush(true, false)?;
                db.simulate_crash();
            }
            CrashPoint::AfterCommit => {
                db.transaction(|db, txn| db.create_page(txn, last, b"kept".to_vec()))?;
                expected.insert(last, b"kept".to_vec());
                db.simulate_crash();
            }
            CrashPoint::AfterAbort => {
                let mut txn = db.begin()?;
                db.create_page(&mut txn, last, b"lost".to_vec())?;
                db.free_page(&mut txn, PageNum::new(4))?;
                db.abort(&mut txn)?;
                db.journal().flush(true, false)?;
                db.simulate_crash();
            }
            CrashPoint::DuringRecordWrite => {
                db.transaction(|db, txn| db.create_page(txn, last, vec![0xAB; 64]))?;
                let path = db.journal().current_file_path();
                db.simulate_crash();
                // Tear the commit record; the transaction becomes a loser.
                if let Some(path) = path {
                    chop_tail(&path, 3);
                }
            }
            CrashPoint::AfterCheckpoint => {
                db.transaction(|db, txn| db.create_page(txn, last, b"kept".to_vec()))?;
                db.checkpoint()?;
                expected.insert(last, b"kept".to_vec());
                db.simulate_crash();
            }
        }

        Ok(expected)
    }

    /// Reopens the database and reads back every page.
    fn recover_pages(&self) -> CoreResult<PageModel> {
        let db = self.reopen_db()?;
        let pages = snapshot(&db)?;
        db.close()?;
        Ok(pages)
    }

    fn crash_at(&self, point: CrashPoint) -> CoreResult<(PageModel, PageModel)> {
        let expected = self.prepare(point)?;
        let actual = self.recover_pages()?;
        Ok((expected, actual))
    }

    fn record(&mut self, description: &str, outcome: CoreResult<(PageModel, PageModel)>) -> CrashRecoveryResult {
        let result = match outcome {
            Ok((expected, actual)) => CrashRecoveryResult::compare(description, &expected, &actual),
            Err(e) => CrashRecoveryResult::fail(description, 0, 0, &e.to_string()),
        };
        self.results.push(result.clone());
        result
    }

    /// Tests that committed pages survive a crash.
    pub fn test_committed_data_survives(&mut self) -> CrashRecoveryResult {
        let outcome = self.crash_at(CrashPoint::AfterCommit);
        self.record("Committed pages survive crash", outcome)
    }

    /// Tests that a running transaction is rolled back.
    pub fn test_uncommitted_data_discarded(&mut self) -> CrashRecoveryResult {
        let outcome = self.crash_at(CrashPoint::BeforeCommit);
        self.record("Running transaction rolled back", outcome)
    }

    /// Tests that an aborted transaction stays rolled back.
    pub fn test_aborted_data_discarded(&mut self) -> CrashRecoveryResult {
        let outcome = self.crash_at(CrashPoint::AfterAbort);
        self.record("Aborted transaction stays rolled back", outcome)
    }

    /// Tests that a torn final record is ignored.
    pub fn test_torn_tail_record(&mut self) -> CrashRecoveryResult {
        let outcome = self.crash_at(CrashPoint::DuringRecordWrite);
        self.record("Torn commit record rolls the transaction back", outcome)
    }

    /// Tests a crash right after a checkpoint.
    pub fn test_crash_after_checkpoint(&mut self) -> CrashRecoveryResult {
        let outcome = self.crash_at(CrashPoint::AfterCheckpoint);
        self.record("Checkpointed pages survive crash", outcome)
    }

    /// Tests that a crash during recovery is itself recoverable.
    ///
    /// A first recovery writes its pages to disk and dies before the
    /// checkpoint that would mark the journal clean. Recovering again over
    /// the already recovered store must arrive at the same pages.
    pub fn test_repeated_recovery(&mut self) -> CrashRecoveryResult {
        let outcome = (|| {
            let expected = self.prepare(CrashPoint::BeforeCommit)?;
            {
                let journal = Journal::open(self.config.clone())?;
                let mut store =
                    FilePageStore::open(&self.config.data_dir.join(PAGE_FILE_NAME))?;
                recover(&journal, &mut store)?;
                store.sync()?;
            }
            let actual = self.recover_pages()?;
            Ok((expected, actual))
        })();
        self.record("Recovery is repeatable", outcome)
    }

    /// Runs all crash recovery tests.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        vec![
            self.test_committed_data_survives(),
            self.test_uncommitted_data_discarded(),
            self.test_aborted_data_discarded(),
            self.test_torn_tail_record(),
            self.test_crash_after_checkpoint(),
            self.test_repeated_recovery(),
        ]
    }

    /// Returns a summary of test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut summary = format!(
            "Crash Recovery Tests: {passed}/{} passed\n",
            self.results.len()
        );
        for result in &self.results {
            let status = if result.passed { "PASS" } else { "FAIL" };
            summary.push_str(&format!("  [{status}] {}", result.description));
            if let Some(error) = &result.error {
                summary.push_str(&format!(" - {error}"));
            }
            summary.push('\n');
        }
        summary
    }

    /// Returns true if all tests passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `scripts` against a fresh database in `config.data_dir`, crashes,
/// reopens it, and returns the model of committed pages alongside the
/// recovered pages.
///
/// Operations the database would reject are skipped. Execution stops at
/// the first script left open, which is still running when the crash
/// happens. Every third committed script is followed by a checkpoint.
pub fn run_scripts(config: &JournalConfig, scripts: &[TxnScript]) -> CoreResult<(PageModel, PageModel)> {
    let db = Database::open_path(config.clone())?;
    let mut committed = PageModel::new();
    let mut commits = 0usize;

    for script in scripts {
        let mut txn = db.begin()?;
        let mut working = committed.clone();
        for op in &script.operations {
            if op.apply(&mut working) {
                execute(&db, &mut txn, op)?;
            }
        }

        match script.end {
            TxnEnd::Commit => {
                db.commit(&mut txn)?;
                committed = working;
                commits += 1;
                if commits % 3 == 0 {
                    db.checkpoint()?;
                }
            }
            TxnEnd::Abort => db.abort(&mut txn)?,
            TxnEnd::LeaveOpen => {
                db.journal().flush(true, false)?;
                break;
            }
        }
    }

    db.simulate_crash();
    let db = Database::open_path(config.clone())?;
    let recovered = snapshot(&db)?;
    db.close()?;
    Ok((committed, recovered))
}

fn execute(db: &Database, txn: &mut Transaction, op: &PageOperation) -> CoreResult<()> {
    match op {
        PageOperation::Create { page, data } => db.create_page(txn, *page, data.clone())?,
        PageOperation::Update {
            page,
            offset,
            bytes,
        } => db.update_page(txn, *page, *offset, bytes)?,
        PageOperation::Free { page } => db.free_page(txn, *page)?,
    };
    Ok(())
}

/// Returns the newest journal file of `config`, if any.
pub fn newest_journal_file(config: &JournalConfig) -> Option<std::path::PathBuf> {
    latest_journal_file(&config.resolved_journal_dir())
}
