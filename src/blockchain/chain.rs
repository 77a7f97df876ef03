use std::collections::HashSet;
use std::sync::Arc;

use log::info;
use thiserror::Error;

use super::block::{meets_difficulty, Block};
use super::transaction::{Transaction, TransactionError};

/// Allowed drift between a reward amount and base reward plus fees
const REWARD_TOLERANCE: f64 = 1e-9;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Invalid transaction {id}: {reason}")]
    InvalidTransaction { id: String, reason: String },

    #[error("Linkage error at block {index}: expected previous hash {expected}, found {found}")]
    LinkageError {
        index: u64,
        expected: String,
        found: String,
    },

    #[error("Hash mismatch at block {index}: stored {stored}, computed {computed}")]
    HashMismatch {
        index: u64,
        stored: String,
        computed: String,
    },

    #[error("Proof of work error at block {index}: hash {hash} does not satisfy difficulty {difficulty}")]
    ProofOfWorkError {
        index: u64,
        hash: String,
        difficulty: u8,
    },

    #[error("Invalid transaction {transaction_id} in block {index}: {reason}")]
    InvalidTransactionInBlock {
        index: u64,
        transaction_id: String,
        reason: String,
    },

    #[error("Index mismatch: expected block {expected}, found {found}")]
    IndexMismatch { expected: u64, found: u64 },

    #[error("Invalid genesis block: {0}")]
    InvalidGenesis(String),

    #[error("Mining of block {index} aborted after {attempts} attempts")]
    MiningAborted { index: u64, attempts: u64 },

    #[error("System error: {0}")]
    SystemError(String),
}

impl BlockchainError {
    /// Index of the block the error refers to, if any
    pub fn block_index(&self) -> Option<u64> {
        match self {
            BlockchainError::LinkageError { index, .. }
            | BlockchainError::HashMismatch { index, .. }
            | BlockchainError::ProofOfWorkError { index, .. }
            | BlockchainError::InvalidTransactionInBlock { index, .. }
            | BlockchainError::MiningAborted { index, .. }
            | BlockchainError::IndexMismatch { found: index, .. } => Some(*index),
            BlockchainError::InvalidGenesis(_) => Some(0),
            _ => None,
        }
    }
}

/// The ordered sequence of validated blocks
///
/// Index 0 is always the fixed genesis block. The only mutation is
/// [`Chain::append_block`], which either appends a fully validated block or
/// leaves the chain untouched.
#[derive(Debug, Clone)]
pub struct Chain {
    blocks: Vec<Arc<Block>>,

    /// Ids of every transaction in `blocks`
    confirmed: HashSet<String>,

    /// Minimum difficulty (leading zero hex digits) a block must satisfy
    difficulty: u8,

    /// Fixed reward minted for every mined block
    base_reward: f64,
}

impl Chain {
    /// Creates a chain holding only the genesis block
    pub fn new(difficulty: u8, base_reward: f64) -> Self {
        Chain {
            blocks: vec![Arc::new(Block::genesis())],
            confirmed: HashSet::new(),
            difficulty,
            base_reward,
        }
    }

    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    pub fn base_reward(&self) -> f64 {
        self.base_reward
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false: the genesis block is never removed
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The current tail of the chain
    pub fn last_block(&self) -> &Arc<Block> {
        &self.blocks[self.blocks.len() - 1]
    }

    /// Checks if a transaction with this id is already in a block
    pub fn contains_transaction(&self, id: &str) -> bool {
        self.confirmed.contains(id)
    }

    /// Read-only snapshot of all blocks, oldest first
    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.blocks.clone()
    }

    /// Appends a validated block to the chain
    ///
    /// # Arguments
    ///
    /// * `block` - A mined block linking to the current tail
    ///
    /// # Returns
    ///
    /// The appended block, or the first violation found. On error the
    /// chain is left unchanged.
    pub fn append_block(&mut self, block: Block) -> Result<Arc<Block>, BlockchainError> {
        self.check_block(&block, self.last_block(), &self.confirmed)?;

        self.confirmed
            .extend(block.transactions.iter().map(|tx| tx.id().to_string()));
        let block = Arc::new(block);
        self.blocks.push(Arc::clone(&block));

        info!(
            "Appended block {} ({} transactions, hash {})",
            block.index,
            block.transactions.len(),
            block.hash
        );

        Ok(block)
    }

    /// Re-walks the full chain, recomputing hashes and verifying every
    /// linkage and transaction
    ///
    /// # Returns
    ///
    /// `Ok(())` if the chain is valid, otherwise the first violation found
    pub fn validate_chain(&self) -> Result<(), BlockchainError> {
        self.check_genesis()?;

        let mut seen = HashSet::new();
        for pair in self.blocks.windows(2) {
            self.check_block(&pair[1], &pair[0], &seen)?;
            seen.extend(pair[1].transactions.iter().map(|tx| tx.id().to_string()));
        }

        Ok(())
    }

    /// Validates the chain
    ///
    /// # Returns
    ///
    /// true if the chain is valid, false otherwise
    pub fn is_valid(&self) -> bool {
        self.validate_chain().is_ok()
    }

    fn check_genesis(&self) -> Result<(), BlockchainError> {
        let genesis = &self.blocks[0];
        let expected = Block::genesis();

        if genesis.index != 0 || !genesis.transactions.is_empty() {
            return Err(BlockchainError::InvalidGenesis(
                "genesis block must have index 0 and no transactions".to_string(),
            ));
        }

        if genesis.hash != genesis.calculate_hash() || genesis.hash != expected.hash {
            return Err(BlockchainError::InvalidGenesis(format!(
                "unexpected genesis hash {}",
                genesis.hash
            )));
        }

        Ok(())
    }

    fn check_block(
        &self,
        block: &Block,
        previous: &Block,
        confirmed: &HashSet<String>,
    ) -> Result<(), BlockchainError> {
        let expected_index = previous.index + 1;
        if block.index != expected_index {
            return Err(BlockchainError::IndexMismatch {
                expected: expected_index,
                found: block.index,
            });
        }

        if block.previous_hash != previous.hash {
            return Err(BlockchainError::LinkageError {
                index: block.index,
                expected: previous.hash.clone(),
                found: block.previous_hash.clone(),
            });
        }

        let computed = block.calculate_hash();
        if block.hash != computed {
            return Err(BlockchainError::HashMismatch {
                index: block.index,
                stored: block.hash.clone(),
                computed,
            });
        }

        if block.difficulty < self.difficulty || !meets_difficulty(&block.hash, block.difficulty) {
            return Err(BlockchainError::ProofOfWorkError {
                index: block.index,
                hash: block.hash.clone(),
                difficulty: block.difficulty.max(self.difficulty),
            });
        }

        self.check_transactions(block, confirmed)
    }

    /// `confirmed` holds the transaction ids of every earlier block
    fn check_transactions(
        &self,
        block: &Block,
        confirmed: &HashSet<String>,
    ) -> Result<(), BlockchainError> {
        let invalid = |transaction: &Transaction, reason: String| {
            BlockchainError::InvalidTransactionInBlock {
                index: block.index,
                transaction_id: transaction.id().to_string(),
                reason,
            }
        };

        let last = block.transactions.len().saturating_sub(1);
        let mut in_block = HashSet::with_capacity(block.transactions.len());

        for (position, transaction) in block.transactions.iter().enumerate() {
            if confirmed.contains(transaction.id()) {
                return Err(invalid(
                    transaction,
                    "transaction is already confirmed in an earlier block".to_string(),
                ));
            }

            if !in_block.insert(transaction.id()) {
                return Err(invalid(
                    transaction,
                    "transaction appears more than once in the block".to_string(),
                ));
            }

            if transaction.is_reward() {
                if position != last {
                    return Err(invalid(
                        transaction,
                        "reward transaction must be the last transaction".to_string(),
                    ));
                }
                continue;
            }

            transaction
                .validate()
                .map_err(|e| invalid(transaction, e.to_string()))?;

            if !transaction.verify() {
                return Err(invalid(
                    transaction,
                    format!("invalid or missing signature for sender {}", transaction.sender()),
                ));
            }
        }

        let reward = block.reward_transaction().ok_or_else(|| {
            BlockchainError::InvalidTransactionInBlock {
                index: block.index,
                transaction_id: String::new(),
                reason: "block has no reward transaction".to_string(),
            }
        })?;

        let expected = self.base_reward + block.total_fees();
        if (reward.amount() - expected).abs() > REWARD_TOLERANCE {
            return Err(invalid(
                reward,
                format!("reward {} does not equal base reward plus fees {}", reward.amount(), expected),
            ));
        }

        Ok(())
    }
}
