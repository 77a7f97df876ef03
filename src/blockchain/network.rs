//! Peer broadcast hook
//!
//! The peer-to-peer transport lives outside the core. Signed transactions
//! are handed to a [`TransactionBroadcaster`] after they are pooled, and
//! transactions received from peers enter the pool through a [`PoolHandle`].

use log::{debug, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::chain::BlockchainError;
use super::ledger::Blockchain;
use super::transaction::Transaction;

/// Fans a pooled transaction out to peers. Must not block.
pub trait TransactionBroadcaster: Send + Sync {
    fn broadcast(&self, transaction: &Transaction);
}

/// Broadcaster that queues transactions on an unbounded channel for a
/// network task to pick up
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: UnboundedSender<Transaction>,
}

impl ChannelBroadcaster {
    /// Creates the broadcaster together with the receiving end of its queue
    pub fn new() -> (Self, UnboundedReceiver<Transaction>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TransactionBroadcaster for ChannelBroadcaster {
    fn broadcast(&self, transaction: &Transaction) {
        match self.sender.send(transaction.clone()) {
            Ok(()) => debug!("Broadcast transaction {}", transaction.id()),
            Err(_) => warn!(
                "Broadcast queue closed, transaction {} not sent to peers",
                transaction.id()
            ),
        }
    }
}

/// Injection point for transactions arriving from peers
#[derive(Debug, Clone)]
pub struct PoolHandle {
    ledger: Blockchain,
}

impl PoolHandle {
    pub fn new(ledger: Blockchain) -> Self {
        Self { ledger }
    }

    /// Pushes a signed transaction into the shared pool. Received
    /// transactions are not broadcast again.
    pub fn receive(&self, transaction: Transaction) -> Result<usize, BlockchainError> {
        self.ledger.accept_transaction(transaction)
    }

    /// True while nothing is waiting to be mined
    pub fn pool_is_empty(&self) -> bool {
        self.ledger.pending_transactions().is_empty()
    }
}
