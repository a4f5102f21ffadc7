//! Transaction manager.

use crate::error::{CoreError, CoreResult};
use crate::journal::{Journal, Loggable};
use crate::lsn::Lsn;
use crate::transaction::state::Transaction;
use crate::types::{PageNum, TransactionId};
use parking_lot::{Mutex, RwLock};
use quire_storage::PageStore;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Runs transactions against a page store, logging every change first.
///
/// ## Write-Ahead Rule
///
/// Each mutation is appended to the journal and only then applied to the
/// store, both while the store lock is held, so the journal order is the
/// order in which changes hit the store. A commit is reported only after its
/// commit record has been flushed (and synced when `sync_on_commit` is set).
///
/// ## Aborts
///
/// An abort logs the inverse of each of the transaction's mutations, newest
/// first, applies them, and then logs the abort marker. Recovery replays
/// those compensating records like any other and never has to undo an
/// aborted transaction.
pub struct TransactionManager {
    /// Journal for durability.
    journal: Arc<Journal>,
    /// Page store the mutations are applied to.
    store: Mutex<Box<dyn PageStore>>,
    /// Next transaction ID.
    next_txid: AtomicU64,
    /// Active transactions.
    active_txns: RwLock<BTreeSet<TransactionId>>,
}

impl TransactionManager {
    /// Creates a transaction manager whose ids start at 1.
    pub fn new(journal: Arc<Journal>, store: Box<dyn PageStore>) -> Self {
        Self::with_next_txid(journal, store, 1)
    }

    /// Creates a transaction manager handing out ids from `next_txid`.
    ///
    /// Used after recovery so ids keep increasing across restarts.
    pub fn with_next_txid(journal: Arc<Journal>, store: Box<dyn PageStore>, next_txid: u64) -> Self {
        Self {
            journal,
            store: Mutex::new(store),
            next_txid: AtomicU64::new(next_txid.max(1)),
            active_txns: RwLock::new(BTreeSet::new()),
        }
    }

    /// Returns the journal.
    #[must_use]
    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the start record cannot be logged.
    pub fn begin(&self) -> CoreResult<Transaction> {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        self.journal.append(&Loggable::TxnStart { txn: txid })?;
        self.active_txns.write().insert(txid);
        Ok(Transaction::new(txid))
    }

    /// Creates `page` with initial contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the page already exists or logging fails.
    pub fn create_page(&self, txn: &mut Transaction, page: PageNum, data: Vec<u8>) -> CoreResult<Lsn> {
        txn.ensure_active()?;
        let mut store = self.store.lock();
        if store.read_page(page)?.is_some() {
            return Err(CoreError::invalid_operation(format!("{page} already exists")));
        }
        let loggable = Loggable::CreatePage {
            txn: txn.id(),
            page,
            data,
        };
        self.log_and_apply(store.as_mut(), txn, loggable)
    }

    /// Overwrites the bytes of `page` at `offset`, growing the page if the
    /// write runs past its end.
    ///
    /// # Errors
    ///
    /// Returns an error if the page does not exist, `offset` is past the end
    /// of the page, or logging fails.
    pub fn update_page(
        &self,
        txn: &mut Transaction,
        page: PageNum,
        offset: u32,
        bytes: &[u8],
    ) -> CoreResult<Lsn> {
        txn.ensure_active()?;
        let mut store = self.store.lock();
        let contents = store
            .read_page(page)?
            .ok_or_else(|| CoreError::invalid_operation(format!("{page} does not exist")))?;

        let start = offset as usize;
        if start > contents.len() {
            return Err(CoreError::invalid_argument(format!(
                "offset {offset} is past the end of {page} ({} bytes)",
                contents.len()
            )));
        }
        let end = (start + bytes.len()).min(contents.len());
        let loggable = Loggable::UpdatePage {
            txn: txn.id(),
            page,
            offset,
            before: contents[start..end].to_vec(),
            after: bytes.to_vec(),
        };
        self.log_and_apply(store.as_mut(), txn, loggable)
    }

    /// Removes `page`.
    ///
    /// # Errors
    ///
    /// Returns an error if the page does not exist or logging fails.
    pub fn free_page(&self, txn: &mut Transaction, page: PageNum) -> CoreResult<Lsn> {
        txn.ensure_active()?;
        let mut store = self.store.lock();
        let before = store
            .read_page(page)?
            .ok_or_else(|| CoreError::invalid_operation(format!("{page} does not exist")))?;
        let loggable = Loggable::FreePage {
            txn: txn.id(),
            page,
            before,
        };
        self.log_and_apply(store.as_mut(), txn, loggable)
    }

    fn log_and_apply(
        &self,
        store: &mut dyn PageStore,
        txn: &mut Transaction,
        loggable: Loggable,
    ) -> CoreResult<Lsn> {
        let lsn = self.journal.append(&loggable)?;
        loggable.redo(store)?;
        txn.record(loggable);
        Ok(lsn)
    }

    /// Reads a page.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn read_page(&self, page: PageNum) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.store.lock().read_page(page)?)
    }

    /// Lists the pages in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn page_numbers(&self) -> CoreResult<Vec<PageNum>> {
        Ok(self.store.lock().page_numbers()?)
    }

    /// Commits a transaction.
    ///
    /// Returns the LSN of the commit record once it has been flushed.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not active or the flush fails.
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<Lsn> {
        txn.ensure_active()?;
        let txid = txn.id();

        let lsn = self.journal.append(&Loggable::TxnCommit { txn: txid })?;
        self.journal
            .flush(self.journal.config().sync_on_commit, true)?;

        txn.mark_committed();
        self.active_txns.write().remove(&txid);
        debug!(txn = %txid, %lsn, "committed");
        Ok(lsn)
    }

    /// Aborts a transaction, compensating each of its changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not active or logging fails.
    pub fn abort(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_active()?;
        let txid = txn.id();

        {
            let mut store = self.store.lock();
            for loggable in txn.take_for_rollback() {
                if let Some(inverse) = loggable.inverse() {
                    self.journal.append(&inverse)?;
                    inverse.redo(store.as_mut())?;
                }
            }
        }
        self.journal.append(&Loggable::TxnAbort { txn: txid })?;
        self.journal.flush(false, true)?;

        txn.mark_aborted();
        self.active_txns.write().remove(&txid);
        debug!(txn = %txid, "aborted");
        Ok(())
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active_txns.read().len()
    }

    /// Returns true if `txid` is active.
    #[must_use]
    pub fn is_active(&self, txid: TransactionId) -> bool {
        self.active_txns.read().contains(&txid)
    }

    /// Makes the store durable and writes a journal checkpoint.
    ///
    /// With `switch_files`, the journal may rotate and drop the files the
    /// checkpoint made redundant.
    ///
    /// # Errors
    ///
    /// Returns an error if transactions are active or the sync fails.
    pub fn checkpoint(&self, switch_files: bool) -> CoreResult<Lsn> {
        let mut store = self.store.lock();
        let active = self.active_count();
        if active > 0 {
            return Err(CoreError::invalid_operation(format!(
                "cannot checkpoint with {active} active transactions"
            )));
        }
        store.sync()?;
        self.journal.checkpoint(TransactionId::RESERVED, switch_files)
    }

    /// Syncs the page store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn sync_store(&self) -> CoreResult<()> {
        Ok(self.store.lock().sync()?)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("journal", &self.journal.dir())
            .field("next_txid", &self.next_txid.load(Ordering::SeqCst))
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use crate::journal::{JournalReader, LogType};
    use crate::lsn::FileNumber;
    use quire_storage::InMemoryPageStore;
    use tempfile::{tempdir, TempDir};

    const PAGE: PageNum = PageNum(7);

    fn setup() -> (TempDir, TransactionManager) {
        let dir = tempdir().unwrap();
        let journal = Journal::open(JournalConfig::new(dir.path()).min_size(0)).unwrap();
        journal.switch_files().unwrap();
        let tm = TransactionManager::new(Arc::new(journal), Box::new(InMemoryPageStore::new()));
        (dir, tm)
    }

    fn logged_types(dir: &TempDir) -> Vec<LogType> {
        JournalReader::open(dir.path(), FileNumber::ZERO)
            .unwrap()
            .map(|e| e.unwrap().loggable.log_type())
            .collect()
    }

    #[test]
    fn begin_assigns_increasing_ids() {
        let (_dir, tm) = setup();
        let t1 = tm.begin().unwrap();
        let t2 = tm.begin().unwrap();

        assert!(t1.id() < t2.id());
        assert_eq!(tm.active_count(), 2);
        assert!(tm.is_active(t1.id()));
    }

    #[test]
    fn committed_changes_are_logged_before_commit() {
        let (dir, tm) = setup();
        let mut txn = tm.begin().unwrap();
        tm.create_page(&mut txn, PAGE, b"hello".to_vec()).unwrap();
        tm.update_page(&mut txn, PAGE, 5, b" world").unwrap();
        let lsn = tm.commit(&mut txn).unwrap();

        assert_eq!(tm.read_page(PAGE).unwrap().unwrap(), b"hello world");
        assert_eq!(tm.journal().last_written_lsn(), Some(lsn));
        assert_eq!(tm.active_count(), 0);
        assert_eq!(
            logged_types(&dir),
            vec![
                LogType::TxnStart,
                LogType::CreatePage,
                LogType::UpdatePage,
                LogType::TxnCommit
            ]
        );
    }

    #[test]
    fn update_records_before_image() {
        let (_dir, tm) = setup();
        let mut txn = tm.begin().unwrap();
        tm.create_page(&mut txn, PAGE, b"abcdef".to_vec()).unwrap();
        tm.update_page(&mut txn, PAGE, 4, b"XYZ").unwrap();

        match &txn.logged()[1] {
            Loggable::UpdatePage { before, after, .. } => {
                assert_eq!(before, b"ef");
                assert_eq!(after, b"XYZ");
            }
            other => panic!("unexpected record {other}"),
        }
        assert_eq!(tm.read_page(PAGE).unwrap().unwrap(), b"abcdXYZ");
    }

    #[test]
    fn abort_compensates_changes() {
        let (dir, tm) = setup();
        let mut setup_txn = tm.begin().unwrap();
        tm.create_page(&mut setup_txn, PAGE, b"base".to_vec()).unwrap();
        tm.commit(&mut setup_txn).unwrap();

        let mut txn = tm.begin().unwrap();
        tm.update_page(&mut txn, PAGE, 2, b"SEBALL").unwrap();
        tm.create_page(&mut txn, PageNum::new(8), b"temp".to_vec()).unwrap();
        tm.abort(&mut txn).unwrap();

        assert_eq!(tm.read_page(PAGE).unwrap().unwrap(), b"base");
        assert_eq!(tm.read_page(PageNum::new(8)).unwrap(), None);
        assert!(!txn.is_active());

        let types = logged_types(&dir);
        assert_eq!(
            types[types.len() - 3..],
            [LogType::FreePage, LogType::UpdatePage, LogType::TxnAbort]
        );
    }

    #[test]
    fn free_then_abort_restores_page() {
        let (_dir, tm) = setup();
        let mut t1 = tm.begin().unwrap();
        tm.create_page(&mut t1, PAGE, b"keep me".to_vec()).unwrap();
        tm.commit(&mut t1).unwrap();

        let mut t2 = tm.begin().unwrap();
        tm.free_page(&mut t2, PAGE).unwrap();
        assert_eq!(tm.read_page(PAGE).unwrap(), None);
        tm.abort(&mut t2).unwrap();

        assert_eq!(tm.read_page(PAGE).unwrap().unwrap(), b"keep me");
    }

    #[test]
    fn invalid_mutations_are_rejected() {
        let (_dir, tm) = setup();
        let mut txn = tm.begin().unwrap();

        assert!(tm.update_page(&mut txn, PAGE, 0, b"x").is_err());
        assert!(tm.free_page(&mut txn, PAGE).is_err());
        tm.create_page(&mut txn, PAGE, b"ab".to_vec()).unwrap();
        assert!(tm.create_page(&mut txn, PAGE, Vec::new()).is_err());
        assert!(matches!(
            tm.update_page(&mut txn, PAGE, 3, b"x"),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert_eq!(txn.logged().len(), 1);
    }

    #[test]
    fn finished_transaction_cannot_continue() {
        let (_dir, tm) = setup();
        let mut txn = tm.begin().unwrap();
        tm.commit(&mut txn).unwrap();

        assert!(tm.commit(&mut txn).is_err());
        assert!(tm.abort(&mut txn).is_err());
        assert!(tm.create_page(&mut txn, PAGE, Vec::new()).is_err());
    }

    #[test]
    fn checkpoint_refuses_active_transactions() {
        let (_dir, tm) = setup();
        let mut txn = tm.begin().unwrap();
        assert!(tm.checkpoint(false).is_err());

        tm.commit(&mut txn).unwrap();
        let lsn = tm.checkpoint(false).unwrap();
        assert_eq!(tm.journal().current_lsn(), Some(lsn));
    }

    #[test]
    fn rotating_checkpoint_keeps_files_of_active_transactions() {
        let (dir, tm) = setup();
        let mut txn = tm.begin().unwrap();
        tm.create_page(&mut txn, PAGE, b"pending".to_vec()).unwrap();
        tm.journal().flush(false, false).unwrap();

        assert!(matches!(
            tm.checkpoint(true),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert_eq!(tm.journal().current_file_number(), Some(FileNumber::ZERO));
        assert_eq!(
            logged_types(&dir),
            vec![LogType::TxnStart, LogType::CreatePage]
        );

        tm.commit(&mut txn).unwrap();
        tm.checkpoint(true).unwrap();
        assert_eq!(
            crate::journal::files::list_journal_files(dir.path()).unwrap(),
            vec![dir.path().join("0000000001.log")]
        );
    }

    #[test]
    fn ids_continue_from_seed() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(JournalConfig::new(dir.path())).unwrap();
        journal.switch_files().unwrap();
        let tm = TransactionManager::with_next_txid(
            Arc::new(journal),
            Box::new(InMemoryPageStore::new()),
            42,
        );
        assert_eq!(tm.begin().unwrap().id(), TransactionId::new(42));
    }
}
