use std::sync::Arc;

use dashmap::DashMap;

use super::block::Block;
use super::crypto::Address;
use super::transaction::Transaction;

/// Position of a confirmed transaction in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxLocation {
    pub block: usize,
    pub position: usize,
}

/// Maps each address to the confirmed transactions it appears in, in chain
/// order
#[derive(Debug, Default)]
pub struct AddressIndex {
    entries: DashMap<Address, Vec<TxLocation>>,
}

impl AddressIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index by scanning every block
    pub fn from_blocks(blocks: &[Arc<Block>]) -> Self {
        let index = Self::new();
        for block in blocks {
            index.record_block(block);
        }
        index
    }

    /// Records the transactions of a newly confirmed block
    pub fn record_block(&self, block: &Block) {
        let block_index = block.index as usize;

        for (position, transaction) in block.transactions.iter().enumerate() {
            let location = TxLocation {
                block: block_index,
                position,
            };

            self.entries
                .entry(transaction.sender().clone())
                .or_default()
                .push(location);

            if transaction.recipient() != transaction.sender() {
                self.entries
                    .entry(transaction.recipient().clone())
                    .or_default()
                    .push(location);
            }
        }
    }

    /// Locations of the transactions involving `address`, oldest first
    pub fn locations(&self, address: &Address) -> Vec<TxLocation> {
        self.entries
            .get(address)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Number of distinct addresses seen
    pub fn address_count(&self) -> usize {
        self.entries.len()
    }
}

/// Confirmed transactions of one address, resolved lazily against a chain
/// snapshot
///
/// Iterating does not consume the history; call [`AddressHistory::iter`] as
/// often as needed.
#[derive(Debug, Clone)]
pub struct AddressHistory {
    address: Address,
    blocks: Vec<Arc<Block>>,
    locations: Vec<TxLocation>,
}

impl AddressHistory {
    pub fn new(address: Address, blocks: Vec<Arc<Block>>, locations: Vec<TxLocation>) -> Self {
        Self {
            address,
            blocks,
            locations,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn iter(&self) -> HistoryIter<'_> {
        HistoryIter {
            history: self,
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

impl<'a> IntoIterator for &'a AddressHistory {
    type Item = &'a Transaction;
    type IntoIter = HistoryIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over an [`AddressHistory`]
#[derive(Debug, Clone)]
pub struct HistoryIter<'a> {
    history: &'a AddressHistory,
    next: usize,
}

impl<'a> Iterator for HistoryIter<'a> {
    type Item = &'a Transaction;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(location) = self.history.locations.get(self.next) {
            self.next += 1;

            let transaction = self
                .history
                .blocks
                .get(location.block)
                .and_then(|block| block.transactions.get(location.position));

            if transaction.is_some() {
                return transaction;
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.history.locations.len() - self.next))
    }
}
