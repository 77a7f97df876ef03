//! Proof-of-work mining
//!
//! Assembles candidate blocks from pending transactions plus a reward
//! transaction and searches for a nonce satisfying the difficulty target.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};

use super::block::{meets_difficulty, Block};
use super::chain::{BlockchainError, Chain};
use super::crypto::Address;
use super::transaction::Transaction;

/// Nonce attempts between two checks of the cancellation flag
pub const CANCELLATION_CHECK_INTERVAL: u64 = 1024;

/// Thread-safe flag used to abort a running proof-of-work search
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a new unset token
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the search to stop. Once triggered the flag remains set.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Mining statistics
#[derive(Debug, Clone)]
pub struct MiningStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

/// A pooled transaction left out of a block, with the reason
#[derive(Debug)]
pub struct RejectedTransaction {
    pub transaction: Transaction,
    pub error: BlockchainError,
}

/// A solved block that has not been appended yet
#[derive(Debug)]
pub struct MinedBlock {
    pub block: Block,
    pub rejected: Vec<RejectedTransaction>,
    pub stats: MiningStats,
}

/// Result of a successful mining cycle
#[derive(Debug)]
pub struct MiningOutcome {
    pub block: Arc<Block>,
    pub rejected: Vec<RejectedTransaction>,
    pub stats: MiningStats,
}

/// Builds and solves blocks for a given difficulty and reward
#[derive(Debug, Clone)]
pub struct MiningEngine {
    difficulty: u8,
    base_reward: f64,
}

impl MiningEngine {
    pub fn new(difficulty: u8, base_reward: f64) -> Self {
        Self {
            difficulty,
            base_reward,
        }
    }

    /// Creates an engine matching a chain's difficulty and reward
    pub fn for_chain(chain: &Chain) -> Self {
        Self::new(chain.difficulty(), chain.base_reward())
    }

    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    pub fn base_reward(&self) -> f64 {
        self.base_reward
    }

    /// Mine a block on top of `chain` and append it
    ///
    /// The chain is only touched once the proof of work succeeded; an
    /// aborted or failed search leaves it unchanged.
    pub fn mine(
        &self,
        chain: &mut Chain,
        pending: Vec<Transaction>,
        reward_address: &Address,
        cancel: &CancellationToken,
    ) -> Result<MiningOutcome, BlockchainError> {
        let (pending, mut rejected) = split_confirmed(chain, pending);

        let tail = chain.last_block();
        let mined = self.mine_detached(
            tail.index + 1,
            tail.hash.clone(),
            pending,
            reward_address,
            cancel,
        )?;

        let block = chain.append_block(mined.block)?;
        rejected.extend(mined.rejected);

        Ok(MiningOutcome {
            block,
            rejected,
            stats: mined.stats,
        })
    }

    /// Mine a block without access to the chain
    ///
    /// Takes the tail data as a snapshot, performs the CPU-intensive search
    /// and returns the solved block. The caller appends it, which re-checks
    /// linkage against the tail at that time.
    pub fn mine_detached(
        &self,
        index: u64,
        previous_hash: String,
        pending: Vec<Transaction>,
        reward_address: &Address,
        cancel: &CancellationToken,
    ) -> Result<MinedBlock, BlockchainError> {
        let start = Instant::now();

        let (mut block, rejected) = self.assemble(index, previous_hash, pending, reward_address);

        info!(
            "Mining block {} with {} transactions at difficulty {}...",
            block.index,
            block.transactions.len(),
            block.difficulty
        );

        let attempts = self.proof_of_work(&mut block, cancel)?;

        let elapsed = start.elapsed().as_millis();
        let hash_rate = if elapsed > 0 {
            (attempts as f64) / (elapsed as f64 / 1000.0)
        } else {
            attempts as f64
        };

        info!(
            "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
            block.index, elapsed, attempts, hash_rate
        );

        Ok(MinedBlock {
            block,
            rejected,
            stats: MiningStats {
                hash_attempts: attempts,
                time_ms: elapsed,
                hash_rate,
            },
        })
    }

    /// Builds the candidate block: valid pending transactions followed by
    /// the reward transaction for base reward plus their fees
    pub fn assemble(
        &self,
        index: u64,
        previous_hash: String,
        pending: Vec<Transaction>,
        reward_address: &Address,
    ) -> (Block, Vec<RejectedTransaction>) {
        let mut included = Vec::with_capacity(pending.len() + 1);
        let mut rejected = Vec::new();
        let mut ids = HashSet::with_capacity(pending.len());

        for transaction in pending {
            let checked = check_pending(&transaction).and_then(|()| {
                if ids.insert(transaction.id().to_string()) {
                    Ok(())
                } else {
                    Err(BlockchainError::InvalidTransaction {
                        id: transaction.id().to_string(),
                        reason: "duplicate of an earlier pending transaction".to_string(),
                    })
                }
            });

            match checked {
                Ok(()) => included.push(transaction),
                Err(error) => {
                    warn!("Skipping transaction in block {}: {}", index, error);
                    rejected.push(RejectedTransaction { transaction, error });
                }
            }
        }

        let fees: f64 = included.iter().map(Transaction::fee).sum();
        included.push(Transaction::new_reward(
            reward_address.clone(),
            self.base_reward + fees,
        ));

        (Block::new(index, included, previous_hash, self.difficulty), rejected)
    }

    /// Increments the nonce from 0 until the block hash satisfies the
    /// difficulty, checking `cancel` every [`CANCELLATION_CHECK_INTERVAL`]
    /// attempts
    ///
    /// # Returns
    ///
    /// The number of hash attempts, or `MiningAborted`
    pub fn proof_of_work(
        &self,
        block: &mut Block,
        cancel: &CancellationToken,
    ) -> Result<u64, BlockchainError> {
        let mut attempts: u64 = 0;
        block.nonce = 0;

        loop {
            if attempts % CANCELLATION_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                warn!(
                    "Mining of block {} cancelled after {} attempts",
                    block.index, attempts
                );
                return Err(BlockchainError::MiningAborted {
                    index: block.index,
                    attempts,
                });
            }

            let hash = block.calculate_hash();
            attempts += 1;

            if meets_difficulty(&hash, block.difficulty) {
                block.hash = hash;
                return Ok(attempts);
            }

            block.nonce = block.nonce.wrapping_add(1);
        }
    }
}

/// Separates transactions already confirmed on `chain` from the rest,
/// reporting the confirmed ones as rejected
pub fn split_confirmed(
    chain: &Chain,
    pending: Vec<Transaction>,
) -> (Vec<Transaction>, Vec<RejectedTransaction>) {
    let (confirmed, fresh): (Vec<_>, Vec<_>) = pending
        .into_iter()
        .partition(|tx| chain.contains_transaction(tx.id()));

    let rejected = confirmed
        .into_iter()
        .map(|transaction| {
            warn!("Dropping transaction {}: already confirmed", transaction.id());
            RejectedTransaction {
                error: BlockchainError::InvalidTransaction {
                    id: transaction.id().to_string(),
                    reason: "transaction is already confirmed".to_string(),
                },
                transaction,
            }
        })
        .collect();

    (fresh, rejected)
}

fn check_pending(transaction: &Transaction) -> Result<(), BlockchainError> {
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

    Ok(())
}
