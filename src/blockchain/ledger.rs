use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{info, warn};

use super::block::Block;
use super::chain::{BlockchainError, Chain};
use super::crypto::{Address, Wallet};
use super::index::{AddressHistory, AddressIndex};
use super::mining::{split_confirmed, CancellationToken, MiningEngine, MiningOutcome};
use super::network::{PoolHandle, TransactionBroadcaster};
use super::pool::TransactionPool;
use super::transaction::Transaction;
use crate::config::ChainConfig;

/// Top-level controller owning the chain, the transaction pool and the
/// address index
#[derive(Clone)]
pub struct Blockchain {
    /// The chain of blocks
    chain: Arc<RwLock<Chain>>,

    /// Transactions waiting for the next block
    pool: Arc<TransactionPool>,

    /// Address to confirmed transactions
    index: Arc<AddressIndex>,

    /// Block assembly and proof of work
    engine: MiningEngine,

    /// Peer fan-out for submitted transactions
    broadcaster: Option<Arc<dyn TransactionBroadcaster>>,
}

impl fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blockchain")
            .field("engine", &self.engine)
            .field("pending", &self.pool.len())
            .finish()
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new(ChainConfig::default())
    }
}

impl Blockchain {
    /// Creates a new blockchain holding only the genesis block
    pub fn new(config: ChainConfig) -> Self {
        let chain = Chain::new(config.difficulty, config.mining_reward);
        let engine = MiningEngine::for_chain(&chain);
        let index = AddressIndex::from_blocks(&chain.blocks());

        Blockchain {
            chain: Arc::new(RwLock::new(chain)),
            pool: Arc::new(TransactionPool::new()),
            index: Arc::new(index),
            engine,
            broadcaster: None,
        }
    }

    /// Attaches the hook that fans submitted transactions out to peers
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn TransactionBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    fn read_chain(&self) -> RwLockReadGuard<'_, Chain> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_chain(&self) -> RwLockWriteGuard<'_, Chain> {
        self.chain.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn difficulty(&self) -> u8 {
        self.engine.difficulty()
    }

    pub fn mining_reward(&self) -> f64 {
        self.engine.base_reward()
    }

    /// Handle receiving code uses to push transactions into the shared pool
    pub fn pool_handle(&self) -> PoolHandle {
        PoolHandle::new(self.clone())
    }

    /// Adds a signed transaction to the pool without broadcasting it
    ///
    /// Transactions already confirmed on the chain are rejected.
    ///
    /// # Returns
    ///
    /// The number of pending transactions after insertion
    pub fn accept_transaction(&self, transaction: Transaction) -> Result<usize, BlockchainError> {
        if self.read_chain().contains_transaction(transaction.id()) {
            return Err(BlockchainError::InvalidTransaction {
                id: transaction.id().to_string(),
                reason: "transaction is already confirmed".to_string(),
            });
        }

        self.pool.submit(transaction)
    }

    /// Adds a signed transaction to the pool and broadcasts it
    ///
    /// # Returns
    ///
    /// The index of the block expected to include the transaction
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<u64, BlockchainError> {
        self.accept_transaction(transaction.clone())?;

        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast(&transaction);
        }

        Ok(self.last_block().index + 1)
    }

    /// Creates, signs and submits a transfer from `wallet`
    pub fn create_transaction(
        &self,
        wallet: &Wallet,
        recipient: Address,
        amount: f64,
        fee: f64,
    ) -> Result<Transaction, BlockchainError> {
        let mut transaction = Transaction::new(wallet.address().clone(), recipient, amount, fee)?;
        transaction.sign(wallet)?;

        self.submit_transaction(transaction.clone())?;

        Ok(transaction)
    }

    /// Gets all pending transactions
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pool.snapshot()
    }

    /// Mines the pooled transactions into a new block
    ///
    /// The pool is drained in one step; if mining is cancelled or the block
    /// cannot be appended, the drained transactions go back into the pool.
    pub fn mine(
        &self,
        reward_address: &Address,
        cancel: &CancellationToken,
    ) -> Result<MiningOutcome, BlockchainError> {
        let pending = self.pool.take_all();

        match self.mine_transactions(pending.clone(), reward_address, cancel) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let (pending, _) = split_confirmed(&self.read_chain(), pending);
                warn!(
                    "Mining failed, returning {} transactions to the pool: {}",
                    pending.len(),
                    err
                );
                self.pool.restore(pending);
                Err(err)
            }
        }
    }

    /// Mines the given transactions into a new block without touching the
    /// pool
    pub fn mine_transactions(
        &self,
        pending: Vec<Transaction>,
        reward_address: &Address,
        cancel: &CancellationToken,
    ) -> Result<MiningOutcome, BlockchainError> {
        let (index, previous_hash, pending, mut rejected) = {
            let chain = self.read_chain();
            let (pending, rejected) = split_confirmed(&chain, pending);
            let tail = chain.last_block();
            (tail.index + 1, tail.hash.clone(), pending, rejected)
        };

        let mined =
            self.engine
                .mine_detached(index, previous_hash, pending, reward_address, cancel)?;

        let block = self.append_block(mined.block)?;
        rejected.extend(mined.rejected);

        info!(
            "Block {} mined for {} ({} rejected transactions)",
            block.index,
            reward_address,
            rejected.len()
        );

        Ok(MiningOutcome {
            block,
            rejected,
            stats: mined.stats,
        })
    }

    /// Appends a validated block and indexes its transactions
    pub fn append_block(&self, block: Block) -> Result<Arc<Block>, BlockchainError> {
        let mut chain = self.write_chain();
        let block = chain.append_block(block)?;

        // Indexed under the write lock so readers never see a block
        // without its history entries
        self.index.record_block(&block);

        Ok(block)
    }

    /// Re-walks the full chain and reports the first violation
    pub fn validate_chain(&self) -> Result<(), BlockchainError> {
        self.read_chain().validate_chain()
    }

    pub fn is_valid(&self) -> bool {
        self.validate_chain().is_ok()
    }

    /// Read-only snapshot of the chain, oldest first
    pub fn get_blockchain(&self) -> Vec<Arc<Block>> {
        self.read_chain().blocks()
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> Arc<Block> {
        Arc::clone(self.read_chain().last_block())
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.read_chain().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_chain().is_empty()
    }

    /// Confirmed transactions where `address` is sender or recipient,
    /// oldest first. Pending transactions are not part of the history.
    pub fn get_address_history(&self, address: &Address) -> AddressHistory {
        let chain = self.read_chain();
        let locations = self.index.locations(address);
        AddressHistory::new(address.clone(), chain.blocks(), locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::network::ChannelBroadcaster;
    use crate::blockchain::MAX_DIFFICULTY;

    fn test_blockchain() -> Blockchain {
        Blockchain::new(ChainConfig {
            difficulty: 2,
            mining_reward: 50.0,
        })
    }

    #[test]
    fn test_new_blockchain() {
        let blockchain = test_blockchain();
        let chain = blockchain.get_blockchain();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].index, 0);
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_submit_mine_and_history() {
        let (broadcaster, mut outbound) = ChannelBroadcaster::new();
        let blockchain = test_blockchain().with_broadcaster(Arc::new(broadcaster));

        let sender = Wallet::new();
        let recipient = Address::new("0xB");
        let miner = Address::new("0xC");

        let transaction = blockchain
            .create_transaction(&sender, recipient.clone(), 10.0, 1.0)
            .unwrap();
        assert_eq!(blockchain.pending_transactions().len(), 1);
        assert_eq!(outbound.try_recv().unwrap(), transaction);

        // Pending transactions are not history yet
        assert!(blockchain.get_address_history(&recipient).is_empty());

        let outcome = blockchain.mine(&miner, &CancellationToken::new()).unwrap();

        assert_eq!(outcome.block.index, 1);
        assert_eq!(outcome.block.transactions.len(), 2);
        assert_eq!(outcome.block.transactions[0], transaction);
        let reward = outcome.block.reward_transaction().unwrap();
        assert_eq!(reward.recipient(), &miner);
        assert_eq!(reward.amount(), 51.0);

        assert!(blockchain.pending_transactions().is_empty());

        let history = blockchain.get_address_history(&recipient);
        let found: Vec<&Transaction> = history.iter().collect();
        assert_eq!(found, vec![&transaction]);

        assert_eq!(blockchain.get_address_history(&miner).len(), 1);
        assert_eq!(blockchain.get_address_history(sender.address()).len(), 1);
        assert!(blockchain.is_valid());
    }

    #[test]
    fn test_mine_empty_pool() {
        let blockchain = test_blockchain();

        let outcome = blockchain
            .mine(&Address::new("0xC"), &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.block.transactions.len(), 1);
        assert!(outcome.block.transactions[0].is_reward());
        assert_eq!(blockchain.len(), 2);
    }

    #[test]
    fn test_history_across_blocks_in_chain_order() {
        let blockchain = test_blockchain();
        let sender = Wallet::new();
        let recipient = Address::new("0xB");
        let cancel = CancellationToken::new();

        let first = blockchain
            .create_transaction(&sender, recipient.clone(), 1.0, 0.0)
            .unwrap();
        blockchain.mine(&Address::new("0xC"), &cancel).unwrap();

        let second = blockchain
            .create_transaction(&sender, recipient.clone(), 2.0, 0.0)
            .unwrap();
        blockchain.mine(&Address::new("0xC"), &cancel).unwrap();

        // Still pending, must not show up
        blockchain
            .create_transaction(&sender, recipient.clone(), 3.0, 0.0)
            .unwrap();

        let history = blockchain.get_address_history(&recipient);
        let amounts: Vec<f64> = history.iter().map(Transaction::amount).collect();
        assert_eq!(amounts, vec![first.amount(), second.amount()]);
    }

    #[test]
    fn test_chain_of_many_blocks_is_valid() {
        let blockchain = test_blockchain();
        let sender = Wallet::new();
        let cancel = CancellationToken::new();

        for i in 1..=5 {
            blockchain
                .create_transaction(&sender, Address::new("0xB"), i as f64, 0.1)
                .unwrap();
            blockchain.mine(&Address::new("0xC"), &cancel).unwrap();
        }

        assert_eq!(blockchain.len(), 6);
        assert!(blockchain.validate_chain().is_ok());
    }

    #[test]
    fn test_append_with_wrong_previous_hash() {
        let blockchain = test_blockchain();

        let reward = Transaction::new_reward(Address::new("0xC"), 50.0);
        let mut block = Block::new(1, vec![reward], "a".repeat(64), 2);
        MiningEngine::new(2, 50.0)
            .proof_of_work(&mut block, &CancellationToken::new())
            .unwrap();

        let result = blockchain.append_block(block);

        assert!(matches!(result, Err(BlockchainError::LinkageError { .. })));
        assert_eq!(blockchain.len(), 1);
    }

    #[test]
    fn test_cancelled_mining_keeps_pool_and_chain() {
        let blockchain = Blockchain::new(ChainConfig {
            difficulty: MAX_DIFFICULTY,
            mining_reward: 50.0,
        });
        let sender = Wallet::new();
        let transaction = blockchain
            .create_transaction(&sender, Address::new("0xB"), 10.0, 1.0)
            .unwrap();

        let cancel = CancellationToken::new();
        let remote = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            remote.cancel();
        });

        let result = blockchain.mine(&Address::new("0xC"), &cancel);
        canceller.join().unwrap();

        assert!(matches!(result, Err(BlockchainError::MiningAborted { .. })));
        assert_eq!(blockchain.pending_transactions(), vec![transaction]);
        assert_eq!(blockchain.len(), 1);
    }

    #[test]
    fn test_confirmed_transaction_is_never_mined_twice() {
        let blockchain = test_blockchain();
        let miner = Address::new("0xC");
        let cancel = CancellationToken::new();

        let transaction = blockchain
            .create_transaction(&Wallet::new(), Address::new("0xB"), 10.0, 1.0)
            .unwrap();
        blockchain.mine(&miner, &cancel).unwrap();

        // Echoed back by a peer or resubmitted by the client
        assert!(matches!(
            blockchain.pool_handle().receive(transaction.clone()),
            Err(BlockchainError::InvalidTransaction { .. })
        ));
        assert!(blockchain.submit_transaction(transaction.clone()).is_err());
        assert!(blockchain.pending_transactions().is_empty());

        // A stale copy handed straight to the miner is reported, not mined
        let outcome = blockchain
            .mine_transactions(vec![transaction.clone()], &miner, &cancel)
            .unwrap();
        assert_eq!(outcome.block.transactions.len(), 1);
        assert_eq!(outcome.rejected.len(), 1);

        assert_eq!(blockchain.get_address_history(&Address::new("0xB")).len(), 1);
        assert!(blockchain.validate_chain().is_ok());
    }

    #[test]
    fn test_resubmission_during_aborted_run_is_pooled_once() {
        let blockchain = Blockchain::new(ChainConfig {
            difficulty: MAX_DIFFICULTY,
            mining_reward: 50.0,
        });
        let transaction = blockchain
            .create_transaction(&Wallet::new(), Address::new("0xB"), 10.0, 1.0)
            .unwrap();

        let cancel = CancellationToken::new();
        let remote = cancel.clone();
        let handle = blockchain.pool_handle();
        let resubmitted = transaction.clone();
        let peer = std::thread::spawn(move || {
            // Wait until the run has taken the pool
            while !handle.pool_is_empty() {
                std::thread::yield_now();
            }
            handle.receive(resubmitted).unwrap();
            remote.cancel();
        });

        let result = blockchain.mine(&Address::new("0xC"), &cancel);
        peer.join().unwrap();

        assert!(matches!(result, Err(BlockchainError::MiningAborted { .. })));
        assert_eq!(blockchain.pending_transactions(), vec![transaction]);
    }

    #[test]
    fn test_pool_handle_feeds_mining() {
        let blockchain = test_blockchain();
        let handle = blockchain.pool_handle();

        let wallet = Wallet::new();
        let mut transaction =
            Transaction::new(wallet.address().clone(), Address::new("0xB"), 4.0, 0.5).unwrap();
        transaction.sign(&wallet).unwrap();
        handle.receive(transaction.clone()).unwrap();

        let outcome = blockchain
            .mine(&Address::new("0xC"), &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.block.transactions[0], transaction);
    }
}
