//! Database facade and recovery.

use crate::config::JournalConfig;
use crate::error::{CoreError, CoreResult};
use crate::journal::Journal;
use crate::lsn::Lsn;
use crate::recovery::{recover, RecoveryReport};
use crate::transaction::{Transaction, TransactionManager};
use crate::types::{PageNum, TransactionId};
use parking_lot::RwLock;
use quire_storage::{FilePageStore, PageStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Name of the page snapshot file inside the data directory.
pub const PAGE_FILE_NAME: &str = "pages.dat";

/// The main database handle.
///
/// Opening a database runs recovery, so the page store seen through the
/// handle always reflects every committed transaction in the journal.
///
/// # Example
///
/// ```rust,no_run
/// use quire_core::{Database, JournalConfig, PageNum};
///
/// let db = Database::open_path(JournalConfig::new("my_database"))?;
///
/// db.transaction(|db, txn| {
///     db.create_page(txn, PageNum::new(1), b"hello".to_vec())?;
///     Ok(())
/// })?;
///
/// db.close()?;
/// # Ok::<(), quire_core::CoreError>(())
/// ```
pub struct Database {
    /// Configuration.
    config: JournalConfig,
    /// The journal.
    journal: Arc<Journal>,
    /// Transaction manager.
    txn_manager: TransactionManager,
    /// What recovery did when the database was opened.
    recovery: RecoveryReport,
    /// Whether the database is open.
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens a database with a file page store at `<data_dir>/pages.dat`.
    ///
    /// # Errors
    ///
    /// Returns an error if the page store or journal cannot be opened, or
    /// recovery fails.
    pub fn open_path(config: JournalConfig) -> CoreResult<Self> {
        let store = FilePageStore::open_with_create_dirs(&config.data_dir.join(PAGE_FILE_NAME))?;
        Self::open(config, Box::new(store))
    }

    /// Opens a database over `store`.
    ///
    /// The journal is locked and recovered into the store. Numbering then
    /// resumes after the last journal file found, a fresh file is started,
    /// and a journal that did not end with a checkpoint gets one.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the journal locked (`JournalLocked`)
    /// - A journal file is corrupted
    /// - I/O errors occur
    pub fn open(config: JournalConfig, mut store: Box<dyn PageStore>) -> CoreResult<Self> {
        let journal = Arc::new(Journal::open(config.clone())?);
        let recovery = recover(&journal, store.as_mut())?;

        if let Some(last) = recovery.last_file() {
            journal.set_current_file_number(last);
        }
        journal.switch_files()?;

        let next_txid = recovery.max_txn.map_or(1, |t| t.as_u64() + 1);
        let txn_manager = TransactionManager::with_next_txid(Arc::clone(&journal), store, next_txid);

        if !recovery.clean {
            txn_manager.checkpoint(true)?;
        }

        info!(
            dir = %journal.dir().display(),
            clean = recovery.clean,
            redone = recovery.redone,
            undone = recovery.undone,
            "database opened"
        );

        Ok(Self {
            config,
            journal,
            txn_manager,
            recovery,
            is_open: RwLock::new(true),
        })
    }

    /// Returns what recovery did when the database was opened.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Returns the journal.
    #[must_use]
    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> CoreResult<Transaction> {
        self.ensure_open()?;
        self.txn_manager.begin()
    }

    /// Commits a transaction.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<Lsn> {
        self.ensure_open()?;
        self.txn_manager.commit(txn)
    }

    /// Aborts a transaction.
    pub fn abort(&self, txn: &mut Transaction) -> CoreResult<()> {
        self.ensure_open()?;
        self.txn_manager.abort(txn)
    }

    /// Executes a function within a transaction.
    ///
    /// The transaction is committed if the function returns `Ok`, and
    /// aborted otherwise.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Self, &mut Transaction) -> CoreResult<T>,
    {
        let mut txn = self.begin()?;
        match f(self, &mut txn) {
            Ok(value) => {
                self.commit(&mut txn)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = self.abort(&mut txn) {
                    warn!(txn = %txn.id(), error = %abort_err, "abort after failed transaction body failed");
                }
                Err(e)
            }
        }
    }

    /// Creates a page.
    pub fn create_page(&self, txn: &mut Transaction, page: PageNum, data: Vec<u8>) -> CoreResult<Lsn> {
        self.ensure_open()?;
        self.txn_manager.create_page(txn, page, data)
    }

    /// Overwrites bytes of a page.
    pub fn update_page(
        &self,
        txn: &mut Transaction,
        page: PageNum,
        offset: u32,
        bytes: &[u8],
    ) -> CoreResult<Lsn> {
        self.ensure_open()?;
        self.txn_manager.update_page(txn, page, offset, bytes)
    }

    /// Removes a page.
    pub fn free_page(&self, txn: &mut Transaction, page: PageNum) -> CoreResult<Lsn> {
        self.ensure_open()?;
        self.txn_manager.free_page(txn, page)
    }

    /// Reads a page.
    pub fn read_page(&self, page: PageNum) -> CoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.txn_manager.read_page(page)
    }

    /// Lists all pages.
    pub fn page_numbers(&self) -> CoreResult<Vec<PageNum>> {
        self.ensure_open()?;
        self.txn_manager.page_numbers()
    }

    /// Syncs the page store and checkpoints the journal, rotating it and
    /// dropping older journal files when the current one is large enough.
    ///
    /// # Errors
    ///
    /// Returns an error if transactions are active or I/O fails.
    pub fn checkpoint(&self) -> CoreResult<Lsn> {
        self.ensure_open()?;
        self.txn_manager.checkpoint(true)
    }

    /// Closes the database.
    ///
    /// Without active transactions the page store is synced and a final
    /// checkpoint written, so the next open has nothing to recover. Active
    /// transactions are left to recovery, which rolls them back.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }

        if self.txn_manager.active_count() == 0 {
            self.txn_manager.checkpoint(false)?;
        } else {
            warn!(
                active = self.txn_manager.active_count(),
                "closing with active transactions"
            );
        }
        self.journal.shutdown(TransactionId::RESERVED, false)?;

        *is_open = false;
        info!(dir = %self.journal.dir().display(), "database closed");
        Ok(())
    }

    /// Drops the handle without flushing, syncing or checkpointing, as a
    /// process crash would. Only records already flushed survive.
    #[doc(hidden)]
    pub fn simulate_crash(self) {
        *self.is_open.write() = false;
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Ensures the database is open.
    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::JournalClosed)
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("is_open", &self.is_open())
            .field("journal", &self.journal.dir())
            .field("current_lsn", &self.journal.current_lsn())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close database");
        }
    }
}
