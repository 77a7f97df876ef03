use std::collections::HashSet;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use super::chain::BlockchainError;
use super::transaction::Transaction;

/// Signed transactions waiting to be mined, in submission order
#[derive(Debug, Default)]
pub struct TransactionPool {
    pending: Mutex<Vec<Transaction>>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Transaction>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a signed transaction to the pool
    ///
    /// # Returns
    ///
    /// The number of pending transactions after insertion
    pub fn submit(&self, transaction: Transaction) -> Result<usize, BlockchainError> {
        let invalid = |reason: String| BlockchainError::InvalidTransaction {
            id: transaction.id().to_string(),
            reason,
        };

        if transaction.is_reward() {
            return Err(invalid("reward transactions cannot be submitted".to_string()));
        }

        transaction.validate().map_err(|e| invalid(e.to_string()))?;

        if !transaction.verify() {
            return Err(invalid(format!(
                "invalid or missing signature for sender {}",
                transaction.sender()
            )));
        }

        let mut pending = self.lock();
        if pending.iter().any(|tx| tx.id() == transaction.id()) {
            return Err(invalid("transaction is already pending".to_string()));
        }

        debug!(
            "Queued transaction {} from {} to {}",
            transaction.id(),
            transaction.sender(),
            transaction.recipient()
        );
        pending.push(transaction);

        Ok(pending.len())
    }

    /// Removes and returns every pending transaction in one step
    pub fn take_all(&self) -> Vec<Transaction> {
        mem::take(&mut *self.lock())
    }

    /// Puts previously taken transactions back ahead of anything submitted
    /// since they were taken
    ///
    /// A transaction resubmitted while it was taken keeps only its original
    /// position.
    pub fn restore(&self, transactions: Vec<Transaction>) {
        if transactions.is_empty() {
            return;
        }

        let mut pending = self.lock();
        let newer = mem::take(&mut *pending);

        let mut seen = HashSet::new();
        pending.extend(
            transactions
                .into_iter()
                .chain(newer)
                .filter(|tx| seen.insert(tx.id().to_string())),
        );
    }

    /// Copy of the pending transactions
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
