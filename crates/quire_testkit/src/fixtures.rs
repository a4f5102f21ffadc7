//! Test fixtures and database helpers.
//!
//! Provides temporary databases and journals that clean up after
//! themselves, plus helpers for reading journal files back and damaging
//! them the way a crash or a bad disk would.

use quire_core::journal::files::{find_last_file_number, list_journal_files, resolve_file};
use quire_core::{
    CoreResult, Database, FileNumber, Journal, JournalConfig, JournalEntry, JournalReader,
    Loggable,
};
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A small journal configuration that rotates often.
///
/// Files switch once they pass 4 KiB and are forced to switch at 64 KiB.
#[must_use]
pub fn small_config(data_dir: &Path) -> JournalConfig {
    JournalConfig::new(data_dir)
        .min_size(4 * 1024)
        .max_size(64 * 1024)
        .buffer_size(1024)
}

/// A test database in a temporary directory.
///
/// The directory outlives the database, so a test can crash or close the
/// database and open it again over the same files.
pub struct TestDatabase {
    db: Option<Database>,
    config: JournalConfig,
    temp_dir: TempDir,
}

impl TestDatabase {
    /// Opens a fresh database with [`small_config`].
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = small_config(temp_dir.path());
        Self::with_config(temp_dir, config)
    }

    /// Opens a fresh database with `config`.
    ///
    /// `config.data_dir` should live inside `temp_dir`.
    pub fn with_config(temp_dir: TempDir, config: JournalConfig) -> Self {
        let db = Database::open_path(config.clone()).expect("Failed to open database");
        Self {
            db: Some(db),
            config,
            temp_dir,
        }
    }

    /// Returns the data directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Returns the journal directory.
    pub fn journal_dir(&self) -> PathBuf {
        self.config.resolved_journal_dir()
    }

    /// Returns the configuration the database was opened with.
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Closes the database cleanly and opens it again.
    pub fn reopen(&mut self) -> &Database {
        if let Some(db) = self.db.take() {
            db.close().expect("Failed to close database");
        }
        self.open_again()
    }

    /// Drops the database without flushing or checkpointing and opens it
    /// again, running recovery.
    pub fn crash_and_reopen(&mut self) -> &Database {
        self.crash();
        self.open_again()
    }

    /// Drops the database as a crash would, leaving the files behind.
    pub fn crash(&mut self) {
        if let Some(db) = self.db.take() {
            db.simulate_crash();
        }
    }

    /// Opens the database after [`crash`](Self::crash) or after the
    /// journal files were tampered with.
    pub fn try_open(&mut self) -> CoreResult<&Database> {
        self.crash();
        let db = Database::open_path(self.config.clone())?;
        Ok(self.db.insert(db))
    }

    /// Reads every entry of the newest journal file.
    pub fn latest_journal_entries(&self) -> Vec<Loggable> {
        read_latest_journal_entries(&self.journal_dir()).expect("Failed to read journal")
    }

    fn open_again(&mut self) -> &Database {
        let db = Database::open_path(self.config.clone()).expect("Failed to reopen database");
        self.db.insert(db)
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        self.db.as_ref().expect("database is not open")
    }
}

/// A bare journal in a temporary directory.
pub struct TestJournal {
    /// The journal.
    pub journal: Journal,
    temp_dir: TempDir,
}

impl TestJournal {
    /// Opens a journal with [`small_config`].
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = small_config(temp_dir.path());
        Self::with_config(temp_dir, config)
    }

    /// Opens a journal with `config` and starts its first file.
    pub fn with_config(temp_dir: TempDir, config: JournalConfig) -> Self {
        let journal = Journal::open(config).expect("Failed to open journal");
        journal.switch_files().expect("Failed to start journal file");
        Self { journal, temp_dir }
    }

    /// Returns the journal directory.
    pub fn dir(&self) -> &Path {
        self.journal.dir()
    }

    /// Returns the temporary directory holding the journal.
    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Appends every loggable and flushes with fsync.
    pub fn write_all(&self, loggables: &[Loggable]) {
        for loggable in loggables {
            self.journal.append(loggable).expect("Failed to append");
        }
        self.journal.flush(true, true).expect("Failed to flush");
    }
}

impl Default for TestJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestJournal {
    type Target = Journal;

    fn deref(&self) -> &Self::Target {
        &self.journal
    }
}

/// Runs a test with a temporary database.
///
/// # Example
///
/// ```rust,ignore
/// use quire_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         let mut txn = db.begin().unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::new();
    f(&test_db)
}

/// Runs a test with a temporary journal.
pub fn with_temp_journal<F, R>(f: F) -> R
where
    F: FnOnce(&Journal) -> R,
{
    let test_journal = TestJournal::new();
    f(&test_journal)
}

/// Reads every entry of the newest journal file in `dir`.
///
/// A truncated record at the end of the file ends the list. A record that
/// is corrupt (unknown tag, checksum or back link mismatch) makes the whole
/// call fail, even when valid entries precede it.
pub fn read_latest_journal_entries(dir: &Path) -> CoreResult<Vec<Loggable>> {
    let files = list_journal_files(dir)?;
    let Some(last) = find_last_file_number(&files)? else {
        return Ok(Vec::new());
    };
    read_journal_file(dir, last)
}

/// Reads every entry of one journal file.
pub fn read_journal_file(dir: &Path, number: FileNumber) -> CoreResult<Vec<Loggable>> {
    JournalReader::open(dir, number)?
        .map(|entry| entry.map(|JournalEntry { loggable, .. }| loggable))
        .collect()
}

/// Returns the newest journal file in `dir`.
pub fn latest_journal_file(dir: &Path) -> Option<PathBuf> {
    let files = list_journal_files(dir).ok()?;
    let last = find_last_file_number(&files).ok()??;
    Some(resolve_file(dir, last))
}

/// Truncates `path` to `len` bytes.
pub fn truncate_file(path: &Path, len: u64) {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .expect("Failed to open file for truncation");
    file.set_len(len).expect("Failed to truncate file");
    file.sync_all().expect("Failed to sync file");
}

/// Removes the last `count` bytes of `path`.
pub fn chop_tail(path: &Path, count: u64) {
    let len = fs::metadata(path).expect("Failed to stat file").len();
    truncate_file(path, len.saturating_sub(count));
}

/// Flips every bit of the byte at `offset` in `path`.
pub fn flip_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .expect("Failed to open file for corruption");
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).expect("Failed to seek");
    file.read_exact(&mut byte).expect("Failed to read byte");
    byte[0] = !byte[0];
    file.seek(SeekFrom::Start(offset)).expect("Failed to seek");
    file.write_all(&byte).expect("Failed to write byte");
    file.sync_all().expect("Failed to sync file");
}

/// Appends raw bytes to `path`.
pub fn append_garbage(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .expect("Failed to open file for append");
    file.write_all(bytes).expect("Failed to append bytes");
    file.sync_all().expect("Failed to sync file");
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::journal::files::HEADER_LEN;
    use quire_core::{LogType, PageNum, TransactionId};

    #[test]
    fn test_database_reopen_keeps_pages() {
        let mut db = TestDatabase::new();
        db.transaction(|db, txn| db.create_page(txn, PageNum::new(1), b"kept".to_vec()))
            .unwrap();

        let db = db.reopen();
        assert_eq!(db.read_page(PageNum::new(1)).unwrap(), Some(b"kept".to_vec()));
        assert!(db.recovery_report().clean);
    }

    #[test]
    fn crash_and_reopen_runs_recovery() {
        let mut db = TestDatabase::new();
        db.transaction(|db, txn| db.create_page(txn, PageNum::new(1), b"kept".to_vec()))
            .unwrap();

        let db = db.crash_and_reopen();
        assert_eq!(db.read_page(PageNum::new(1)).unwrap(), Some(b"kept".to_vec()));
        assert!(!db.recovery_report().clean);
    }

    #[test]
    fn latest_entries_follow_rotation() {
        let journal = TestJournal::new();
        let txn = TransactionId::new(1);
        journal.write_all(&[Loggable::TxnStart { txn }]);
        journal.switch_files().unwrap();
        journal.write_all(&[Loggable::TxnCommit { txn }]);

        let entries = read_latest_journal_entries(journal.dir()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].log_type(), LogType::TxnCommit);
    }

    #[test]
    fn latest_entries_of_empty_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(read_latest_journal_entries(temp_dir.path())
            .unwrap()
            .is_empty());
        assert!(latest_journal_file(temp_dir.path()).is_none());
    }

    #[test]
    fn latest_entries_fail_on_corrupt_record() {
        let journal = TestJournal::new();
        let txn = TransactionId::new(1);
        journal.write_all(&[Loggable::TxnStart { txn }, Loggable::TxnCommit { txn }]);
        let path = latest_journal_file(journal.dir()).unwrap();

        // Last byte of the second record's checksum.
        let len = fs::metadata(&path).unwrap().len();
        flip_byte(&path, len - 1);
        assert!(matches!(
            read_latest_journal_entries(journal.dir()),
            Err(e) if e.is_corruption()
        ));
    }

    #[test]
    fn damage_helpers() {
        let journal = TestJournal::new();
        let txn = TransactionId::new(1);
        journal.write_all(&[Loggable::TxnStart { txn }, Loggable::TxnCommit { txn }]);
        let path = latest_journal_file(journal.dir()).unwrap();
        let full = fs::metadata(&path).unwrap().len();

        chop_tail(&path, 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), full - 1);
        let entries = read_journal_file(journal.dir(), journal.current_file_number().unwrap());
        assert_eq!(entries.unwrap().len(), 1);

        truncate_file(&path, HEADER_LEN);
        append_garbage(&path, &[0xEE; 4]);
        assert!(read_latest_journal_entries(journal.dir()).is_err());

        truncate_file(&path, HEADER_LEN);
        append_garbage(&path, &[0u8; 32]);
        assert!(read_latest_journal_entries(journal.dir())
            .unwrap()
            .is_empty());

        flip_byte(&path, 0);
        assert!(read_latest_journal_entries(journal.dir()).is_err());
    }
}
