//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::journal::Loggable;
use crate::types::TransactionId;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

/// A transaction handle.
///
/// Mutations are applied to the page store as they are made; the handle
/// remembers the records it logged so that an abort can compensate them.
#[derive(Debug)]
pub struct Transaction {
    /// Transaction ID.
    id: TransactionId,
    /// Current state.
    state: TransactionState,
    /// Page mutations logged so far, oldest first.
    logged: Vec<Loggable>,
}

impl Transaction {
    /// Creates a new transaction.
    pub(crate) fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            logged: Vec::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the page mutations logged so far.
    #[must_use]
    pub fn logged(&self) -> &[Loggable] {
        &self.logged
    }

    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        if !self.is_active() {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} is not active",
                self.id
            )));
        }
        Ok(())
    }

    pub(crate) fn record(&mut self, loggable: Loggable) {
        self.logged.push(loggable);
    }

    /// Takes the logged mutations, newest first.
    pub(crate) fn take_for_rollback(&mut self) -> Vec<Loggable> {
        let mut logged = std::mem::take(&mut self.logged);
        logged.reverse();
        logged
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageNum;

    fn free(page: u64) -> Loggable {
        Loggable::FreePage {
            txn: TransactionId::new(1),
            page: PageNum::new(page),
            before: Vec::new(),
        }
    }

    #[test]
    fn new_transaction_is_active() {
        let txn = Transaction::new(TransactionId::new(1));
        assert!(txn.is_active());
        assert_eq!(txn.state(), TransactionState::Active);
        assert!(txn.logged().is_empty());
        assert!(txn.ensure_active().is_ok());
    }

    #[test]
    fn finished_transaction_rejects_work() {
        let mut txn = Transaction::new(TransactionId::new(1));
        txn.mark_committed();
        assert!(!txn.is_active());
        assert!(matches!(
            txn.ensure_active(),
            Err(CoreError::InvalidOperation { .. })
        ));

        let mut txn = Transaction::new(TransactionId::new(2));
        txn.mark_aborted();
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn rollback_order_is_newest_first() {
        let mut txn = Transaction::new(TransactionId::new(1));
        txn.record(free(1));
        txn.record(free(2));

        assert_eq!(txn.take_for_rollback(), vec![free(2), free(1)]);
        assert!(txn.logged().is_empty());
    }
}
