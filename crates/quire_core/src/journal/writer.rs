//! Buffered journal writer with file rotation.

use crate::config::JournalConfig;
use crate::dir::JournalDir;
use crate::error::{CoreError, CoreResult};
use crate::journal::files::{self, backup_path, resolve_file, write_header, HEADER_LEN};
use crate::journal::loggable::Loggable;
use crate::journal::record::encode_record;
use crate::lsn::{FileNumber, Lsn};
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Destination of journal bytes. Implemented by [`File`]; tests substitute
/// writers that fail on demand.
trait JournalFile: Write + Send + std::fmt::Debug {
    fn sync_data(&self) -> io::Result<()>;
    fn sync_all(&self) -> io::Result<()>;
}

impl JournalFile for File {
    fn sync_data(&self) -> io::Result<()> {
        File::sync_data(self)
    }

    fn sync_all(&self) -> io::Result<()> {
        File::sync_all(self)
    }
}

/// The journal file currently being appended to.
#[derive(Debug)]
struct ActiveFile {
    number: FileNumber,
    file: Box<dyn JournalFile>,
    path: PathBuf,
    /// Bytes written to the file so far, header included.
    position: u64,
}

/// Everything the journal lock protects.
#[derive(Debug)]
struct JournalState {
    /// Held until shutdown.
    dir_lock: Option<JournalDir>,
    /// `None` until the first rotation or an explicit resume point.
    file_number: Option<FileNumber>,
    active: Option<ActiveFile>,
    buffer: Vec<u8>,
    buffer_capacity: usize,
    current_lsn: Option<Lsn>,
    last_written_lsn: Option<Lsn>,
    last_sync_lsn: Option<Lsn>,
    in_recovery: bool,
    closed: bool,
    /// Set when a write or sync fails. Bytes of a partial record may sit in
    /// the file or the buffer, so nothing more may be appended behind them.
    failed: bool,
}

impl JournalState {
    fn check_open(&self) -> CoreResult<()> {
        if self.closed {
            return Err(CoreError::JournalClosed);
        }
        if self.failed {
            return Err(CoreError::JournalFailed);
        }
        Ok(())
    }

    /// Marks the journal failed if `result` is an error.
    fn poison_on_error<T>(&mut self, result: io::Result<T>) -> CoreResult<T> {
        result.map_err(|err| {
            self.failed = true;
            warn!(error = %err, "journal write failed; refusing further records");
            CoreError::Io(err)
        })
    }

    fn append(&mut self, loggable: &Loggable) -> CoreResult<Lsn> {
        self.check_open()?;
        if self.in_recovery {
            return Err(CoreError::invalid_operation(
                "journal does not accept records during recovery",
            ));
        }
        let record = encode_record(loggable)?;

        let active = self.active.as_ref().ok_or_else(|| {
            CoreError::invalid_operation("journal has no current file; switch files first")
        })?;
        let lsn = Lsn::new(active.number, active.position + self.buffer.len() as u64);

        let mut rest = record.as_slice();
        while !rest.is_empty() {
            let room = self.buffer_capacity - self.buffer.len();
            if room == 0 {
                self.write_buffer()?;
                continue;
            }
            let take = room.min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }

        self.current_lsn = Some(lsn);
        Ok(lsn)
    }

    /// Hands buffered bytes to the OS.
    fn write_buffer(&mut self) -> CoreResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let active = self.active.as_mut().ok_or_else(|| {
            CoreError::invalid_operation("journal buffer holds data but no file is open")
        })?;
        let result = active.file.write_all(&self.buffer);
        self.poison_on_error(result)?;
        if let Some(active) = self.active.as_mut() {
            active.position += self.buffer.len() as u64;
        }
        self.buffer.clear();
        Ok(())
    }

    fn flush(&mut self, fsync: bool) -> CoreResult<()> {
        self.check_open()?;
        self.write_buffer()?;
        self.last_written_lsn = self.current_lsn;

        if fsync && self.current_lsn > self.last_sync_lsn {
            if let Some(active) = &self.active {
                let result = active.file.sync_data();
                self.poison_on_error(result)?;
            }
            self.last_sync_lsn = self.current_lsn;
        }
        Ok(())
    }

    fn position(&self) -> u64 {
        self.active
            .as_ref()
            .map_or(0, |a| a.position + self.buffer.len() as u64)
    }
}

/// Append-only, buffered, rotating journal.
///
/// The journal starts without a current file; [`Journal::switch_files`]
/// (normally called once recovery has finished) creates the first one.
/// Appends, flushes and rotation all serialize on one lock, so records from
/// concurrent threads form a single total order.
///
/// # Example
///
/// ```rust,no_run
/// use quire_core::{Journal, JournalConfig, Loggable, TransactionId};
///
/// let journal = Journal::open(JournalConfig::new("data"))?;
/// journal.switch_files()?;
/// let txn = TransactionId::new(1);
/// journal.append(&Loggable::TxnStart { txn })?;
/// journal.append(&Loggable::TxnCommit { txn })?;
/// journal.flush(true, true)?;
/// # Ok::<(), quire_core::CoreError>(())
/// ```
#[derive(Debug)]
pub struct Journal {
    dir: PathBuf,
    config: JournalConfig,
    state: Mutex<JournalState>,
}

impl Journal {
    /// Opens the journal directory described by `config` and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is unusable, the directory
    /// cannot be created, or another process holds the lock.
    pub fn open(config: JournalConfig) -> CoreResult<Self> {
        if config.buffer_size == 0 {
            return Err(CoreError::invalid_argument(
                "journal buffer size must be greater than zero",
            ));
        }
        if config.min_size > config.max_size {
            return Err(CoreError::invalid_argument(format!(
                "journal min_size {} exceeds max_size {}",
                config.min_size, config.max_size
            )));
        }

        let dir = config.resolved_journal_dir();
        let dir_lock = JournalDir::open(&dir)?;
        info!(dir = %dir.display(), "journal opened");

        Ok(Self {
            state: Mutex::new(JournalState {
                dir_lock: Some(dir_lock),
                file_number: None,
                active: None,
                buffer: Vec::with_capacity(config.buffer_size),
                buffer_capacity: config.buffer_size,
                current_lsn: None,
                last_written_lsn: None,
                last_sync_lsn: None,
                in_recovery: false,
                closed: false,
                failed: false,
            }),
            dir,
            config,
        })
    }

    /// Returns the journal directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the configuration the journal was opened with.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Appends a record and returns its LSN.
    ///
    /// The record is buffered; it reaches the file on the next flush, or
    /// earlier when the buffer fills up.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal is shut down, in recovery, has no
    /// current file, or a write fails.
    pub fn append(&self, loggable: &Loggable) -> CoreResult<Lsn> {
        self.state.lock().append(loggable)
    }

    /// Writes buffered records to the file.
    ///
    /// With `fsync`, the file is also synced unless nothing was appended
    /// since the last sync. With `switch_files_if_needed`, a file that has
    /// reached `max_size` is rotated (only once it is larger than
    /// `min_size`). Does nothing during recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal is shut down or I/O fails.
    pub fn flush(&self, fsync: bool, switch_files_if_needed: bool) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.check_open()?;
        if state.in_recovery {
            return Ok(());
        }
        state.flush(fsync)?;

        let size = state.position();
        if switch_files_if_needed
            && state.active.is_some()
            && size >= self.config.max_size
            && size > self.config.min_size
        {
            debug!(size, max_size = self.config.max_size, "journal file full");
            self.switch_locked(&mut state)?;
        }
        Ok(())
    }

    /// Closes the current file and continues in the next one.
    ///
    /// The next number is one past the current (wrapping after 32767), or
    /// `0` if the journal has no number yet. A file already sitting at the
    /// target is renamed to `<name>.bak` first.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal is shut down or I/O fails.
    pub fn switch_files(&self) -> CoreResult<FileNumber> {
        let mut state = self.state.lock();
        state.check_open()?;
        self.switch_locked(&mut state)
    }

    fn switch_locked(&self, state: &mut JournalState) -> CoreResult<FileNumber> {
        state.flush(false)?;

        let next = state.file_number.map_or(FileNumber::ZERO, FileNumber::next);
        let path = resolve_file(&self.dir, next);

        if path.exists() {
            let backup = backup_path(&path);
            fs::rename(&path, &backup)?;
            warn!(
                file = %path.display(),
                backup = %backup.display(),
                "journal file already existed; moved aside"
            );
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        write_header(&mut file)?;
        file.sync_all()?;
        files::sync_directory(&self.dir)?;

        if let Some(previous) = state.active.take() {
            let result = previous.file.sync_all();
            state.poison_on_error(result)?;
            debug!(file = %previous.path.display(), "closed journal file");
        }
        state.last_sync_lsn = state.current_lsn;
        state.active = Some(ActiveFile {
            number: next,
            file: Box::new(file),
            path,
            position: HEADER_LEN,
        });
        state.file_number = Some(next);

        debug!(file_number = %next, "switched to new journal file");
        Ok(next)
    }

    /// Sets the number the next rotation continues from.
    ///
    /// Recovery calls this with the last file found on disk so numbering
    /// resumes after it.
    pub fn set_current_file_number(&self, number: FileNumber) {
        self.state.lock().file_number = Some(number);
    }

    /// Returns the current file number, if the journal has one.
    #[must_use]
    pub fn current_file_number(&self) -> Option<FileNumber> {
        self.state.lock().file_number
    }

    /// Returns the path of the file being appended to.
    #[must_use]
    pub fn current_file_path(&self) -> Option<PathBuf> {
        self.state.lock().active.as_ref().map(|a| a.path.clone())
    }

    /// Returns the logical size of the current file, buffered bytes included.
    #[must_use]
    pub fn current_file_size(&self) -> u64 {
        self.state.lock().position()
    }

    /// LSN of the most recently appended record.
    #[must_use]
    pub fn current_lsn(&self) -> Option<Lsn> {
        self.state.lock().current_lsn
    }

    /// LSN of the most recent record handed to the OS by a flush.
    #[must_use]
    pub fn last_written_lsn(&self) -> Option<Lsn> {
        self.state.lock().last_written_lsn
    }

    /// Writes a checkpoint record.
    ///
    /// With `switch_files`, and once the current file is larger than
    /// `min_size`, the journal rotates and deletes every older journal file.
    /// Otherwise the checkpoint is flushed and synced in place.
    ///
    /// The journal does not track transactions. A rotating checkpoint is
    /// only safe once the page store is synced and no transaction is
    /// running; otherwise the deleted files may hold records recovery needs
    /// to undo. [`TransactionManager::checkpoint`] enforces both.
    ///
    /// [`TransactionManager::checkpoint`]: crate::TransactionManager::checkpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the append, rotation or cleanup fails.
    pub fn checkpoint(&self, txn: TransactionId, switch_files: bool) -> CoreResult<Lsn> {
        let mut state = self.state.lock();
        self.checkpoint_locked(&mut state, txn, switch_files)
    }

    fn checkpoint_locked(
        &self,
        state: &mut JournalState,
        txn: TransactionId,
        switch_files: bool,
    ) -> CoreResult<Lsn> {
        let lsn = state.append(&Loggable::Checkpoint { txn })?;
        state.flush(false)?;

        if switch_files && state.position() > self.config.min_size {
            let current = self.switch_locked(state)?;
            let removed = self.remove_files_except(current)?;
            info!(%lsn, removed, "checkpoint; rotated journal");
        } else {
            state.flush(true)?;
            info!(%lsn, "checkpoint");
        }
        Ok(lsn)
    }

    fn remove_files_except(&self, keep: FileNumber) -> CoreResult<usize> {
        let mut removed = 0;
        for path in files::list_journal_files(&self.dir)? {
            if files::parse_file_number(&path)? != keep {
                fs::remove_file(&path)?;
                debug!(file = %path.display(), "removed journal file");
                removed += 1;
            }
        }
        if removed > 0 {
            files::sync_directory(&self.dir)?;
        }
        Ok(removed)
    }

    /// Shuts the journal down.
    ///
    /// Writes a final checkpoint if requested and a file is open, syncs,
    /// closes the file and releases the directory lock. Later appends fail
    /// with [`CoreError::JournalClosed`]. Calling this twice is harmless.
    ///
    /// A journal that failed earlier is closed without writing anything and
    /// the call returns [`CoreError::JournalFailed`]; the lock is released
    /// either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the final checkpoint or sync fails.
    pub fn shutdown(&self, txn: TransactionId, checkpoint: bool) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.in_recovery = false;

        if state.failed {
            state.active = None;
            state.dir_lock = None;
            state.closed = true;
            warn!(
                dir = %self.dir.display(),
                discarded = state.buffer.len(),
                "journal shut down after a failed write"
            );
            return Err(CoreError::JournalFailed);
        }

        if checkpoint && state.active.is_some() {
            self.checkpoint_locked(&mut state, txn, false)?;
        } else {
            state.flush(true)?;
        }

        state.active = None;
        state.dir_lock = None;
        state.closed = true;
        info!(dir = %self.dir.display(), "journal shut down");
        Ok(())
    }

    /// Returns true once the journal is shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Enters or leaves recovery mode. While in recovery, appends are
    /// rejected and flushes do nothing.
    pub fn set_in_recovery(&self, value: bool) {
        self.state.lock().in_recovery = value;
    }

    /// Returns true while in recovery mode.
    #[must_use]
    pub fn is_in_recovery(&self) -> bool {
        self.state.lock().in_recovery
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        // Unflushed records are lost, exactly as in a crash.
        let state = self.state.get_mut();
        if !state.closed && !state.buffer.is_empty() {
            warn!(
                bytes = state.buffer.len(),
                "journal dropped with unflushed records"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::files::list_journal_files;
    use crate::journal::reader::JournalReader;
    use crate::types::PageNum;
    use tempfile::tempdir;

    fn config(dir: &Path) -> JournalConfig {
        JournalConfig::new(dir).min_size(0).buffer_size(256)
    }

    fn txn(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    fn file(n: i64) -> FileNumber {
        FileNumber::new(n).unwrap()
    }

    fn read_all(dir: &Path, number: FileNumber) -> Vec<Loggable> {
        JournalReader::open(dir, number)
            .unwrap()
            .map(|entry| entry.unwrap().loggable)
            .collect()
    }

    #[test]
    fn append_requires_current_file() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(config(dir.path())).unwrap();

        assert_eq!(journal.current_file_number(), None);
        let result = journal.append(&Loggable::TxnStart { txn: txn(1) });
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn rotation_from_uninitialized() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(config(dir.path())).unwrap();

        assert_eq!(journal.switch_files().unwrap(), file(0));
        assert_eq!(journal.switch_files().unwrap(), file(1));
        assert_eq!(journal.current_file_number(), Some(file(1)));
        assert!(dir.path().join("0000000000.log").exists());
        assert!(dir.path().join("0000000001.log").exists());
    }

    #[test]
    fn rotation_wraps_around() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(config(dir.path())).unwrap();

        journal.set_current_file_number(file(32766));
        assert_eq!(journal.switch_files().unwrap(), FileNumber::MAX);
        assert_eq!(journal.switch_files().unwrap(), FileNumber::ZERO);
    }

    #[test]
    fn rotation_backs_up_existing_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("0000000000.log");
        fs::write(&target, b"stale contents").unwrap();

        let journal = Journal::open(config(dir.path())).unwrap();
        journal.switch_files().unwrap();

        let backup = dir.path().join("0000000000.log.bak");
        assert_eq!(fs::read(&backup).unwrap(), b"stale contents");
        assert_eq!(fs::metadata(&target).unwrap().len(), HEADER_LEN);
    }

    #[test]
    fn lsns_are_file_offsets() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(config(dir.path())).unwrap();
        journal.switch_files().unwrap();

        let first = journal.append(&Loggable::TxnStart { txn: txn(1) }).unwrap();
        let second = journal.append(&Loggable::TxnCommit { txn: txn(1) }).unwrap();

        assert_eq!(first, Lsn::new(file(0), HEADER_LEN));
        assert_eq!(second.offset(), HEADER_LEN + 21);
        assert!(first < second);
        assert_eq!(journal.current_lsn(), Some(second));
        assert_eq!(journal.last_written_lsn(), None);

        journal.flush(false, false).unwrap();
        assert_eq!(journal.last_written_lsn(), Some(second));
    }

    #[test]
    fn oversized_record_survives_normal_shutdown() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(config(dir.path())).unwrap();
        journal.switch_files().unwrap();

        let data: Vec<u8> = (0..768u32).map(|i| (i % 251) as u8).collect();
        let record = Loggable::CreatePage {
            txn: txn(1),
            page: PageNum::new(1),
            data,
        };
        journal.append(&record).unwrap();
        journal.shutdown(TransactionId::RESERVED, false).unwrap();

        assert_eq!(read_all(dir.path(), file(0)), vec![record]);
    }

    #[test]
    fn flush_rotates_full_file() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(config(dir.path()).max_size(64)).unwrap();
        journal.switch_files().unwrap();

        journal.append(&Loggable::TxnStart { txn: txn(1) }).unwrap();
        journal.flush(false, true).unwrap();
        assert_eq!(journal.current_file_number(), Some(file(0)));

        journal.append(&Loggable::TxnCommit { txn: txn(1) }).unwrap();
        journal.append(&Loggable::TxnStart { txn: txn(2) }).unwrap();
        journal.flush(false, true).unwrap();
        assert_eq!(journal.current_file_number(), Some(file(1)));
        assert_eq!(read_all(dir.path(), file(0)).len(), 3);
    }

    #[test]
    fn min_size_blocks_rotation() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(
            JournalConfig::new(dir.path())
                .min_size(1024)
                .max_size(1024)
                .buffer_size(256),
        )
        .unwrap();
        journal.switch_files().unwrap();

        for id in 1..=5 {
            journal.append(&Loggable::TxnStart { txn: txn(id) }).unwrap();
        }
        journal.flush(true, true).unwrap();
        assert_eq!(journal.current_file_number(), Some(file(0)));

        journal.checkpoint(TransactionId::RESERVED, true).unwrap();
        assert_eq!(journal.current_file_number(), Some(file(0)));
    }

    #[test]
    fn checkpoint_with_switch_removes_older_files() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(config(dir.path())).unwrap();
        journal.switch_files().unwrap();
        journal.append(&Loggable::TxnStart { txn: txn(1) }).unwrap();
        journal.switch_files().unwrap();
        journal.append(&Loggable::TxnCommit { txn: txn(1) }).unwrap();

        let lsn = journal.checkpoint(TransactionId::RESERVED, true).unwrap();
        assert_eq!(lsn.file_number(), file(1));
        assert_eq!(journal.current_file_number(), Some(file(2)));

        let files = list_journal_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("0000000002.log")]);
    }

    #[test]
    fn checkpoint_without_switch_stays_in_file() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(config(dir.path())).unwrap();
        journal.switch_files().unwrap();

        journal.checkpoint(TransactionId::RESERVED, false).unwrap();
        assert_eq!(journal.current_file_number(), Some(file(0)));
        assert_eq!(
            read_all(dir.path(), file(0)),
            vec![Loggable::Checkpoint {
                txn: TransactionId::RESERVED
            }]
        );
    }

    #[test]
    fn shutdown_rejects_later_appends_and_releases_lock() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(config(dir.path())).unwrap();
        journal.switch_files().unwrap();
        journal.shutdown(TransactionId::RESERVED, true).unwrap();
        journal.shutdown(TransactionId::RESERVED, true).unwrap();

        assert!(journal.is_closed());
        let result = journal.append(&Loggable::TxnStart { txn: txn(1) });
        assert!(matches!(result, Err(CoreError::JournalClosed)));

        let reopened = Journal::open(config(dir.path())).unwrap();
        assert!(!reopened.is_closed());
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let _journal = Journal::open(config(dir.path())).unwrap();

        let result = Journal::open(config(dir.path()));
        assert!(matches!(result, Err(CoreError::JournalLocked { .. })));
    }

    #[test]
    fn recovery_mode_rejects_appends() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(config(dir.path())).unwrap();
        journal.switch_files().unwrap();

        journal.set_in_recovery(true);
        assert!(journal.is_in_recovery());
        assert!(journal.append(&Loggable::TxnStart { txn: txn(1) }).is_err());
        journal.flush(true, true).unwrap();

        journal.set_in_recovery(false);
        journal.append(&Loggable::TxnStart { txn: txn(1) }).unwrap();
    }

    #[test]
    fn open_rejects_bad_config() {
        let dir = tempdir().unwrap();
        assert!(Journal::open(config(dir.path()).buffer_size(0)).is_err());
        assert!(Journal::open(config(dir.path()).min_size(10).max_size(5)).is_err());
    }

    /// Forwards to the real journal file until `budget` bytes are spent,
    /// then fails every write.
    #[derive(Debug)]
    struct FailingFile {
        inner: File,
        budget: usize,
    }

    impl Write for FailingFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = self.inner.write(&buf[..buf.len().min(self.budget)])?;
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl JournalFile for FailingFile {
        fn sync_data(&self) -> io::Result<()> {
            self.inner.sync_data()
        }

        fn sync_all(&self) -> io::Result<()> {
            self.inner.sync_all()
        }
    }

    fn fail_writes_after(journal: &Journal, budget: usize) {
        let mut state = journal.state.lock();
        let active = state.active.as_mut().unwrap();
        let inner = OpenOptions::new().append(true).open(&active.path).unwrap();
        active.file = Box::new(FailingFile { inner, budget });
    }

    #[test]
    fn failed_write_inside_record_stops_the_journal() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(config(dir.path()).buffer_size(128)).unwrap();
        journal.switch_files().unwrap();
        journal.append(&Loggable::TxnStart { txn: txn(1) }).unwrap();
        journal.flush(true, false).unwrap();

        fail_writes_after(&journal, 0);
        let big = Loggable::CreatePage {
            txn: txn(1),
            page: PageNum::new(1),
            data: vec![7; 384],
        };
        assert!(matches!(journal.append(&big), Err(CoreError::Io(_))));

        let commit = Loggable::TxnCommit { txn: txn(1) };
        assert!(matches!(journal.append(&commit), Err(CoreError::JournalFailed)));
        assert!(matches!(journal.flush(true, false), Err(CoreError::JournalFailed)));
        assert!(matches!(journal.switch_files(), Err(CoreError::JournalFailed)));
        assert_eq!(
            read_all(dir.path(), file(0)),
            vec![Loggable::TxnStart { txn: txn(1) }]
        );
    }

    #[test]
    fn partial_flush_is_not_retried() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(config(dir.path())).unwrap();
        journal.switch_files().unwrap();
        journal.append(&Loggable::TxnStart { txn: txn(1) }).unwrap();
        journal.flush(true, false).unwrap();
        let flushed = fs::metadata(resolve_file(dir.path(), file(0))).unwrap().len();

        journal.append(&Loggable::TxnStart { txn: txn(2) }).unwrap();
        journal.append(&Loggable::TxnCommit { txn: txn(2) }).unwrap();
        fail_writes_after(&journal, 5);
        assert!(matches!(journal.flush(true, false), Err(CoreError::Io(_))));
        assert!(matches!(journal.flush(true, false), Err(CoreError::JournalFailed)));

        let len = fs::metadata(resolve_file(dir.path(), file(0))).unwrap().len();
        assert_eq!(len, flushed + 5);
        assert_eq!(
            read_all(dir.path(), file(0)),
            vec![Loggable::TxnStart { txn: txn(1) }]
        );
    }

    #[test]
    fn failed_journal_releases_lock_on_shutdown() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(config(dir.path())).unwrap();
        journal.switch_files().unwrap();
        journal.append(&Loggable::TxnStart { txn: txn(1) }).unwrap();
        fail_writes_after(&journal, 0);
        assert!(journal.flush(false, false).is_err());

        assert!(matches!(
            journal.shutdown(TransactionId::RESERVED, true),
            Err(CoreError::JournalFailed)
        ));
        assert!(journal.is_closed());
        assert!(journal.shutdown(TransactionId::RESERVED, true).is_ok());
        assert!(Journal::open(config(dir.path())).is_ok());
    }

    #[test]
    fn concurrent_appends_are_totally_ordered() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempdir().unwrap();
        let journal = Arc::new(Journal::open(config(dir.path())).unwrap());
        journal.switch_files().unwrap();

        let handles: Vec<_> = (1..=4u64)
            .map(|t| {
                let journal = Arc::clone(&journal);
                thread::spawn(move || {
                    (0..50)
                        .map(|_| journal.append(&Loggable::TxnStart { txn: txn(t) }).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut lsns = Vec::new();
        for handle in handles {
            let mine = handle.join().unwrap();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
            lsns.extend(mine);
        }
        journal.flush(true, false).unwrap();

        lsns.sort();
        lsns.dedup();
        assert_eq!(lsns.len(), 200);
        assert_eq!(read_all(dir.path(), file(0)).len(), 200);
    }
}
