//! Ledger state
//!
//! The [`Ledger`] trait is the narrow view the shell has of block storage:
//! read the tip, read blocks, append blocks, and toggle full verification.
//! [`MemoryLedger`] is the in-process implementation used by the shell and
//! the tests. It tracks the unspent coin set and performs full verification
//! (linkage, merkle root, inputs, value conservation, witnesses) while
//! verification is enabled.

use crate::core::amount::{AmountError, Fixed8};
use crate::core::block::{Block, BlockError};
use crate::core::script::ScriptError;
use crate::core::transaction::{Coin, OutPoint, Transaction, TransactionOutput, MAX_OUTPUTS};
use crate::crypto::{Hash160, Hash256};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Unexpected block height: expected {expected}, got {got}")]
    UnexpectedHeight { expected: u64, got: u64 },
    #[error("Block {0} does not link to the current tip")]
    PreviousHashMismatch(u64),
    #[error("Invalid block: {0}")]
    InvalidBlock(#[from] BlockError),
    #[error("Transaction {tx} spends unknown or spent output {outpoint:?}")]
    MissingInput { tx: Hash256, outpoint: OutPoint },
    #[error("Transaction {tx} spends more {asset} than its inputs hold")]
    ValueMismatch { tx: Hash256, asset: Hash256 },
    #[error("Transaction {tx} has invalid witnesses: {source}")]
    InvalidWitness {
        tx: Hash256,
        #[source]
        source: ScriptError,
    },
    #[error("Issuing transaction {0} outside the genesis block")]
    UnexpectedIssue(Hash256),
    #[error("Transaction {0} has more outputs than an output index can address")]
    TooManyOutputs(Hash256),
    #[error("Amount overflow")]
    Overflow,
    #[error("Block verification is already suspended")]
    VerificationSuspended,
}

impl From<AmountError> for LedgerError {
    fn from(_: AmountError) -> Self {
        LedgerError::Overflow
    }
}

// =============================================================================
// Ledger Trait
// =============================================================================

/// Block storage as seen by the shell
pub trait Ledger: Send + Sync {
    /// Height of the tip, or `None` for an empty ledger
    fn current_height(&self) -> Option<u64>;

    fn get_block(&self, height: u64) -> Option<Block>;

    /// Append the block at the next height
    fn apply_block(&self, block: Block) -> Result<(), LedgerError>;

    fn verify_blocks(&self) -> bool;

    /// Set the verification flag, returning its previous value
    fn set_verify_blocks(&self, enabled: bool) -> bool;
}

// =============================================================================
// Verification Suspension
// =============================================================================

/// Keeps block verification off while alive
///
/// Dropping the guard turns verification back on, including during
/// unwinding. Only one guard can exist per ledger at a time.
pub struct VerificationSuspension<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
}

impl<'a, L: Ledger + ?Sized> VerificationSuspension<'a, L> {
    pub fn acquire(ledger: &'a L) -> Result<Self, LedgerError> {
        if !ledger.set_verify_blocks(false) {
            // Someone else already holds it; leave their suspension alone
            return Err(LedgerError::VerificationSuspended);
        }
        log::debug!("Block verification suspended");
        Ok(Self { ledger })
    }
}

impl<L: Ledger + ?Sized> Drop for VerificationSuspension<'_, L> {
    fn drop(&mut self) {
        self.ledger.set_verify_blocks(true);
        log::debug!("Block verification restored");
    }
}

// =============================================================================
// Memory Ledger
// =============================================================================

#[derive(Debug, Default)]
struct ChainState {
    blocks: Vec<Block>,
    coins: HashMap<OutPoint, TransactionOutput>,
}

/// In-memory ledger with an unspent coin index
#[derive(Debug)]
pub struct MemoryLedger {
    state: RwLock<ChainState>,
    verify: AtomicBool,
}

impl MemoryLedger {
    /// Create an empty ledger with verification enabled
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ChainState::default()),
            verify: AtomicBool::new(true),
        }
    }

    /// Create a ledger starting from `genesis`
    pub fn with_genesis(genesis: Block) -> Result<Self, LedgerError> {
        let ledger = Self::new();
        ledger.apply_block(genesis)?;
        Ok(ledger)
    }

    pub fn block_count(&self) -> usize {
        self.state.read().blocks.len()
    }

    pub fn tip_hash(&self) -> Option<Hash256> {
        self.state.read().blocks.last().map(Block::hash)
    }

    pub fn coin(&self, outpoint: &OutPoint) -> Option<TransactionOutput> {
        self.state.read().coins.get(outpoint).cloned()
    }

    pub fn coin_count(&self) -> usize {
        self.state.read().coins.len()
    }

    /// Unspent coins paying to any of `script_hashes`, in outpoint order
    pub fn unspent_coins(&self, script_hashes: &HashSet<Hash160>) -> Vec<Coin> {
        let state = self.state.read();
        let mut coins: Vec<Coin> = state
            .coins
            .iter()
            .filter(|(_, output)| script_hashes.contains(&output.script_hash))
            .map(|(outpoint, output)| Coin {
                outpoint: *outpoint,
                output: output.clone(),
            })
            .collect();
        coins.sort_by_key(|coin| coin.outpoint);
        coins
    }

    /// Total unspent value per asset for `script_hashes`
    pub fn balances(
        &self,
        script_hashes: &HashSet<Hash160>,
    ) -> Result<HashMap<Hash256, Fixed8>, LedgerError> {
        let mut balances: HashMap<Hash256, Fixed8> = HashMap::new();
        for coin in self.unspent_coins(script_hashes) {
            let entry = balances.entry(coin.output.asset_id).or_default();
            *entry = entry.checked_add(coin.output.value)?;
        }
        Ok(balances)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for MemoryLedger {
    fn current_height(&self) -> Option<u64> {
        let len = self.state.read().blocks.len() as u64;
        len.checked_sub(1)
    }

    fn get_block(&self, height: u64) -> Option<Block> {
        let index = usize::try_from(height).ok()?;
        self.state.read().blocks.get(index).cloned()
    }

    fn apply_block(&self, block: Block) -> Result<(), LedgerError> {
        let verify = self.verify_blocks();
        let mut state = self.state.write();

        let expected = state.blocks.len() as u64;
        if block.index() != expected {
            return Err(LedgerError::UnexpectedHeight {
                expected,
                got: block.index(),
            });
        }

        if verify {
            let previous = state.blocks.last().map_or(Hash256::ZERO, Block::hash);
            if block.header.previous_hash != previous {
                return Err(LedgerError::PreviousHashMismatch(block.index()));
            }
            block.validate()?;
        }

        let mut changes = CoinChanges::new(&state.coins);
        for tx in &block.transactions {
            if verify {
                changes.verify(tx, block.index())?;
            }
            changes.apply(tx);
        }
        let CoinChanges { spent, created, .. } = changes;

        for outpoint in &spent {
            state.coins.remove(outpoint);
        }
        state.coins.extend(created);
        state.blocks.push(block);
        Ok(())
    }

    fn verify_blocks(&self) -> bool {
        self.verify.load(Ordering::SeqCst)
    }

    fn set_verify_blocks(&self, enabled: bool) -> bool {
        self.verify.swap(enabled, Ordering::SeqCst)
    }
}

/// Coin set updates staged while a block is checked, committed only if
/// every transaction passes
struct CoinChanges<'a> {
    base: &'a HashMap<OutPoint, TransactionOutput>,
    spent: HashSet<OutPoint>,
    created: HashMap<OutPoint, TransactionOutput>,
}

impl<'a> CoinChanges<'a> {
    fn new(base: &'a HashMap<OutPoint, TransactionOutput>) -> Self {
        Self {
            base,
            spent: HashSet::new(),
            created: HashMap::new(),
        }
    }

    fn lookup(&self, outpoint: &OutPoint) -> Option<&TransactionOutput> {
        if self.spent.contains(outpoint) {
            return None;
        }
        self.created.get(outpoint).or_else(|| self.base.get(outpoint))
    }

    fn verify(&self, tx: &Transaction, height: u64) -> Result<(), LedgerError> {
        let tx_hash = tx.hash();
        if tx.outputs.len() > MAX_OUTPUTS {
            return Err(LedgerError::TooManyOutputs(tx_hash));
        }

        if tx.is_issue() {
            if height != 0 {
                return Err(LedgerError::UnexpectedIssue(tx_hash));
            }
            return Ok(());
        }

        let mut seen = HashSet::new();
        let mut balance: HashMap<Hash256, Fixed8> = HashMap::new();
        let mut script_hashes = BTreeSet::new();

        for outpoint in &tx.inputs {
            let output = self
                .lookup(outpoint)
                .filter(|_| seen.insert(*outpoint))
                .ok_or(LedgerError::MissingInput {
                    tx: tx_hash,
                    outpoint: *outpoint,
                })?;
            let entry = balance.entry(output.asset_id).or_default();
            *entry = entry.checked_add(output.value)?;
            script_hashes.insert(output.script_hash);
        }

        for output in &tx.outputs {
            let entry = balance.entry(output.asset_id).or_default();
            *entry = entry.checked_sub(output.value)?;
            if entry.is_negative() || !output.value.is_positive() {
                return Err(LedgerError::ValueMismatch {
                    tx: tx_hash,
                    asset: output.asset_id,
                });
            }
        }

        let required: Vec<Hash160> = script_hashes.into_iter().collect();
        tx.verify_witnesses(&required)
            .map_err(|source| LedgerError::InvalidWitness { tx: tx_hash, source })
    }

    fn apply(&mut self, tx: &Transaction) {
        for outpoint in &tx.inputs {
            if self.created.remove(outpoint).is_none() {
                self.spent.insert(*outpoint);
            }
        }
        for coin in tx.coins() {
            self.created.insert(coin.outpoint, coin.output);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::share_asset_id;
    use crate::core::contract::Contract;
    use crate::core::script::invocation_script;
    use crate::core::transaction::{TransactionBuilder, Witness};
    use crate::crypto::KeyPair;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn funded(kp: &KeyPair, whole: i64) -> (MemoryLedger, Contract) {
        let contract = Contract::single(&kp.public_key());
        let genesis = Block::genesis(vec![TransactionOutput {
            asset_id: share_asset_id(),
            value: Fixed8::from_whole(whole).unwrap(),
            script_hash: contract.script_hash(),
        }]);
        (MemoryLedger::with_genesis(genesis).unwrap(), contract)
    }

    fn spend(ledger: &MemoryLedger, contract: &Contract, signer: &KeyPair) -> Block {
        let owned: HashSet<Hash160> = [contract.script_hash()].into_iter().collect();
        let coins = ledger.unspent_coins(&owned);
        let unsigned = TransactionBuilder::new(share_asset_id())
            .build(
                vec![TransactionOutput {
                    asset_id: share_asset_id(),
                    value: Fixed8::from_whole(4).unwrap(),
                    script_hash: Contract::single(&KeyPair::generate().public_key())
                        .script_hash(),
                }],
                Fixed8::ZERO,
                &coins,
            )
            .unwrap();
        let signature = signer.sign(&unsigned.hash()).unwrap();
        let tx = unsigned.into_signed(vec![Witness {
            invocation: invocation_script(&[signature]),
            verification: contract.script.clone(),
        }]);
        let tip = ledger.get_block(ledger.current_height().unwrap()).unwrap();
        tip.next(vec![tx])
    }

    #[test]
    fn test_empty_ledger() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.current_height(), None);
        assert!(ledger.verify_blocks());
        assert!(ledger.get_block(0).is_none());
    }

    #[test]
    fn test_apply_valid_spend() {
        let kp = KeyPair::generate();
        let (ledger, contract) = funded(&kp, 10);
        let block = spend(&ledger, &contract, &kp);

        ledger.apply_block(block).unwrap();
        assert_eq!(ledger.current_height(), Some(1));

        let owned: HashSet<Hash160> = [contract.script_hash()].into_iter().collect();
        let balances = ledger.balances(&owned).unwrap();
        assert_eq!(balances[&share_asset_id()], Fixed8::from_whole(6).unwrap());
    }

    #[test]
    fn test_rejects_wrong_signer_while_verifying() {
        let kp = KeyPair::generate();
        let (ledger, contract) = funded(&kp, 10);
        let block = spend(&ledger, &contract, &KeyPair::generate());

        let err = ledger.apply_block(block.clone()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidWitness { .. }));
        assert_eq!(ledger.current_height(), Some(0));

        // Accepted unchecked while verification is off
        let _guard = VerificationSuspension::acquire(&ledger).unwrap();
        ledger.apply_block(block).unwrap();
        assert_eq!(ledger.current_height(), Some(1));
    }

    #[test]
    fn test_rejects_wrong_height_and_linkage() {
        let kp = KeyPair::generate();
        let (ledger, _) = funded(&kp, 10);
        let genesis = ledger.get_block(0).unwrap();

        let skipping = Block::new(2, genesis.hash(), Vec::new());
        assert!(matches!(
            ledger.apply_block(skipping),
            Err(LedgerError::UnexpectedHeight { expected: 1, got: 2 })
        ));

        let unlinked = Block::new(1, Hash256::ZERO, Vec::new());
        assert!(matches!(
            ledger.apply_block(unlinked),
            Err(LedgerError::PreviousHashMismatch(1))
        ));
    }

    #[test]
    fn test_rejects_double_spend_within_block() {
        let kp = KeyPair::generate();
        let (ledger, contract) = funded(&kp, 10);
        let block = spend(&ledger, &contract, &kp);
        let tx = block.transactions[0].clone();
        let genesis = ledger.get_block(0).unwrap();
        let doubled = genesis.next(vec![tx.clone(), tx]);

        assert!(matches!(
            ledger.apply_block(doubled),
            Err(LedgerError::MissingInput { .. })
        ));
    }

    #[test]
    fn test_guard_is_exclusive_and_restores() {
        let ledger = MemoryLedger::new();
        {
            let _guard = VerificationSuspension::acquire(&ledger).unwrap();
            assert!(!ledger.verify_blocks());
            assert!(matches!(
                VerificationSuspension::acquire(&ledger),
                Err(LedgerError::VerificationSuspended)
            ));
            // The failed acquire must not re-enable verification
            assert!(!ledger.verify_blocks());
        }
        assert!(ledger.verify_blocks());
    }

    #[test]
    fn test_guard_restores_on_panic() {
        let ledger = MemoryLedger::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guard = VerificationSuspension::acquire(&ledger).unwrap();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(ledger.verify_blocks());
    }
}
