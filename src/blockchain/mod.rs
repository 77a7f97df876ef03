// Blockchain module
//
// This module contains the core ledger implementation including:
// - Signing keys and addresses
// - Transaction structure
// - Block structure and the chain of blocks
// - Proof of work mining
// - Transaction pool and address index
// - Broadcast hook for the peer network

pub mod block;
pub mod chain;
pub mod crypto;
pub mod index;
pub mod ledger;
pub mod mining;
pub mod network;
pub mod pool;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, GENESIS_PREVIOUS_HASH, MAX_DIFFICULTY};
pub use chain::{BlockchainError, Chain};
pub use crypto::{Address, CryptoError, DigitalSignature, Wallet};
pub use index::{AddressHistory, AddressIndex};
pub use ledger::Blockchain;
pub use mining::{CancellationToken, MiningEngine, MiningOutcome, MiningStats, RejectedTransaction};
pub use network::{ChannelBroadcaster, PoolHandle, TransactionBroadcaster};
pub use pool::TransactionPool;
pub use transaction::{Transaction, TransactionError, SYSTEM_ADDRESS};
