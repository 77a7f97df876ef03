use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::transaction::Transaction;

/// Previous-hash sentinel carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Largest difficulty a SHA-256 hex digest can express
pub const MAX_DIFFICULTY: u8 = 64;

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Version of the block structure
    #[serde(default = "default_version")]
    pub version: u32,

    /// Index of the block in the chain
    pub index: u64,

    /// Timestamp when the block was assembled
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// List of transactions included in this block
    pub transactions: Vec<Transaction>,

    /// Proof of work nonce
    pub nonce: u64,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Hash of the current block (calculated)
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hash: String,

    /// Number of leading zero hex digits required when the block was mined
    pub difficulty: u8,
}

/// Default version for blocks
fn default_version() -> u32 {
    1
}

impl Block {
    /// Creates a new, not yet mined block
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `transactions` - The list of transactions to include in the block
    /// * `previous_hash` - The hash of the previous block
    /// * `difficulty` - The difficulty the block will be mined at
    ///
    /// # Returns
    ///
    /// A new Block instance with nonce 0 and its hash filled in
    pub fn new(
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: String,
        difficulty: u8,
    ) -> Self {
        let mut block = Block {
            version: default_version(),
            index,
            timestamp: Utc::now(),
            transactions,
            nonce: 0,
            previous_hash,
            hash: String::new(),
            difficulty,
        };

        block.hash = block.calculate_hash();
        block
    }

    /// Creates the fixed genesis block
    pub fn genesis() -> Self {
        let mut block = Block {
            version: default_version(),
            index: 0,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            transactions: Vec::new(),
            nonce: 0,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            hash: String::new(),
            difficulty: 0,
        };

        block.hash = block.calculate_hash();
        block
    }

    /// Calculates the hash of the block
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the block as a hexadecimal string
    pub fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();

        let block_data = serde_json::json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "transactions": self.transactions,
            "previous_hash": self.previous_hash,
            "nonce": self.nonce,
        });

        hasher.update(block_data.to_string().as_bytes());

        format!("{:x}", hasher.finalize())
    }

    /// Checks whether the stored hash satisfies the block's difficulty
    pub fn has_valid_proof(&self) -> bool {
        meets_difficulty(&self.hash, self.difficulty)
    }

    /// Sum of the fees paid by the block's user transactions
    pub fn total_fees(&self) -> f64 {
        self.transactions
            .iter()
            .filter(|tx| !tx.is_reward())
            .map(Transaction::fee)
            .sum()
    }

    /// The reward transaction, which is always the last one in a mined block
    pub fn reward_transaction(&self) -> Option<&Transaction> {
        self.transactions.last().filter(|tx| tx.is_reward())
    }
}

/// Checks whether a hex digest starts with `difficulty` zero digits
pub fn meets_difficulty(hash: &str, difficulty: u8) -> bool {
    let required = difficulty as usize;
    hash.len() >= required && hash.bytes().take(required).all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Address;

    #[test]
    fn test_new_block() {
        let transactions = vec![
            Transaction::new_reward(Address::new("0x1"), 10.0),
            Transaction::new_reward(Address::new("0x2"), 20.0),
        ];

        let block = Block::new(1, transactions, "previous_hash".to_string(), 2);

        assert_eq!(block.index, 1);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.difficulty, 2);
        assert_eq!(block.previous_hash, "previous_hash");
        assert_eq!(block.hash, block.calculate_hash());
    }

    #[test]
    fn test_calculate_hash() {
        let transactions = vec![Transaction::new_reward(Address::new("0xC"), 10.0)];

        let mut block = Block::new(1, transactions, "previous_hash".to_string(), 1);

        let hash = block.calculate_hash();
        assert_eq!(hash.len(), 64); // SHA-256 hash is 64 characters in hex

        block.nonce += 1;
        assert_ne!(block.calculate_hash(), hash);
    }

    #[test]
    fn test_genesis_is_fixed() {
        let first = Block::genesis();
        let second = Block::genesis();

        assert_eq!(first.hash, second.hash);
        assert_eq!(first.index, 0);
        assert!(first.transactions.is_empty());
        assert_eq!(first.previous_hash, GENESIS_PREVIOUS_HASH);
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("00ab", 2));
        assert!(meets_difficulty("00ab", 0));
        assert!(!meets_difficulty("0a0b", 2));
        assert!(!meets_difficulty("00", 3));
    }

    #[test]
    fn test_fees_and_reward() {
        let wallet = crate::blockchain::Wallet::new();
        let mut transfer =
            Transaction::new(wallet.address().clone(), Address::new("0xB"), 10.0, 1.5).unwrap();
        transfer.sign(&wallet).unwrap();

        let reward = Transaction::new_reward(Address::new("0xC"), 51.5);
        let block = Block::new(1, vec![transfer, reward.clone()], "prev".to_string(), 1);

        assert_eq!(block.total_fees(), 1.5);
        assert_eq!(block.reward_transaction(), Some(&reward));
    }
}
