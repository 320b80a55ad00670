//! Block implementation
//!
//! A block contains a header with metadata and a list of transactions.
//! The canonical byte form (used by snapshots) is the bincode encoding
//! from [`crate::core::encoding`].

use crate::core::encoding::{self, HashWriter};
use crate::core::transaction::{Transaction, TransactionOutput};
use crate::crypto::{calculate_merkle_root, double_sha256, Hash256};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Block Constants
// =============================================================================

/// Current block version
pub const BLOCK_VERSION: u32 = 0;

/// Maximum number of transactions per block
pub const MAX_BLOCK_TXS: usize = 10_000;

/// Fixed genesis timestamp so every node derives the same genesis hash
pub const GENESIS_TIMESTAMP: u64 = 1_468_595_301;

/// Asset id of the governing share token
pub fn share_asset_id() -> Hash256 {
    double_sha256(b"ledger-shell governing share")
}

/// Asset id of the utility coin used for fees
pub fn coin_asset_id() -> Hash256 {
    double_sha256(b"ledger-shell utility coin")
}

// =============================================================================
// Block Errors
// =============================================================================

/// Block validation errors
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Too many transactions: {0} (max: {1})")]
    TooManyTransactions(usize, usize),
    #[error("Invalid merkle root")]
    InvalidMerkleRoot,
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Block header containing metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block version
    pub version: u32,
    /// Block height
    pub index: u64,
    /// Hash of the previous block
    pub previous_hash: Hash256,
    /// Merkle root of all transaction hashes
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds
    pub timestamp: u64,
}

impl BlockHeader {
    /// Calculate the hash of the block header
    pub fn hash(&self) -> Hash256 {
        let mut w = HashWriter::new();
        w.write_u32_le(self.version);
        w.write_u64_le(self.index);
        w.write_bytes(self.previous_hash.as_bytes());
        w.write_bytes(self.merkle_root.as_bytes());
        w.write_u64_le(self.timestamp);
        double_sha256(&w.into_inner())
    }
}

/// A block in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new block stamped with the current time
    pub fn new(index: u64, previous_hash: Hash256, transactions: Vec<Transaction>) -> Self {
        let timestamp = Utc::now().timestamp().max(0) as u64;
        Self::with_timestamp(index, previous_hash, transactions, timestamp)
    }

    pub fn with_timestamp(
        index: u64,
        previous_hash: Hash256,
        transactions: Vec<Transaction>,
        timestamp: u64,
    ) -> Self {
        let merkle_root = Self::calculate_merkle_root(&transactions);
        Self {
            header: BlockHeader {
                version: BLOCK_VERSION,
                index,
                previous_hash,
                merkle_root,
                timestamp,
            },
            transactions,
        }
    }

    /// Create the genesis block issuing `allocations`
    pub fn genesis(allocations: Vec<TransactionOutput>) -> Self {
        let transactions = if allocations.is_empty() {
            Vec::new()
        } else {
            vec![Transaction::issue(allocations, 0)]
        };
        Self::with_timestamp(0, Hash256::ZERO, transactions, GENESIS_TIMESTAMP)
    }

    /// Create the block following `self`
    pub fn next(&self, transactions: Vec<Transaction>) -> Self {
        let timestamp = Utc::now().timestamp().max(0) as u64;
        Self::with_timestamp(
            self.index() + 1,
            self.hash(),
            transactions,
            timestamp.max(self.header.timestamp),
        )
    }

    pub fn index(&self) -> u64 {
        self.header.index
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    fn calculate_merkle_root(transactions: &[Transaction]) -> Hash256 {
        let tx_hashes: Vec<Hash256> = transactions.iter().map(Transaction::hash).collect();
        calculate_merkle_root(&tx_hashes)
    }

    /// Verify the block's merkle root
    pub fn verify_merkle_root(&self) -> bool {
        Self::calculate_merkle_root(&self.transactions) == self.header.merkle_root
    }

    /// Structural checks independent of chain state
    pub fn validate(&self) -> Result<(), BlockError> {
        let tx_count = self.transactions.len();
        if tx_count > MAX_BLOCK_TXS {
            return Err(BlockError::TooManyTransactions(tx_count, MAX_BLOCK_TXS));
        }
        if !self.verify_merkle_root() {
            return Err(BlockError::InvalidMerkleRoot);
        }
        Ok(())
    }

    /// Canonical serialization
    pub fn to_bytes(&self) -> Result<Vec<u8>, BlockError> {
        Ok(encoding::to_bytes(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlockError> {
        Ok(encoding::from_bytes(bytes)?)
    }

    /// Get number of transactions in this block
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::amount::Fixed8;
    use crate::crypto::hash160;

    fn allocation() -> TransactionOutput {
        TransactionOutput {
            asset_id: share_asset_id(),
            value: Fixed8::from_whole(100).unwrap(),
            script_hash: hash160(b"founder"),
        }
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis(vec![allocation()]);
        assert_eq!(genesis.index(), 0);
        assert_eq!(genesis.header.previous_hash, Hash256::ZERO);
        assert_eq!(genesis.hash(), Block::genesis(vec![allocation()]).hash());
        assert!(genesis.verify_merkle_root());
    }

    #[test]
    fn test_next_links_to_parent() {
        let genesis = Block::genesis(Vec::new());
        let next = genesis.next(Vec::new());
        assert_eq!(next.index(), 1);
        assert_eq!(next.header.previous_hash, genesis.hash());
        assert_eq!(next.header.merkle_root, Hash256::ZERO);
    }

    #[test]
    fn test_merkle_root_verification() {
        let mut block = Block::genesis(vec![allocation()]);
        assert!(block.validate().is_ok());

        block.transactions[0].nonce += 1;
        assert!(!block.verify_merkle_root());
        assert!(matches!(block.validate(), Err(BlockError::InvalidMerkleRoot)));
    }

    #[test]
    fn test_canonical_bytes() {
        let block = Block::genesis(vec![allocation()]);
        let bytes = block.to_bytes().unwrap();
        assert_eq!(&bytes[..4], &BLOCK_VERSION.to_le_bytes());
        assert_eq!(&bytes[4..12], &0u64.to_le_bytes());
        assert_eq!(Block::from_bytes(&bytes).unwrap(), block);

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(Block::from_bytes(&trailing).is_err());
        assert!(Block::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
