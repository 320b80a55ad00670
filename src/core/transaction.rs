//! Transaction handling
//!
//! Implements the multi-asset UTXO transaction model:
//! - Outputs carry an asset id, a fixed-point value and a destination script hash
//! - Inputs reference previous outputs by (transaction hash, index)
//! - Witnesses pair an invocation script with the verification script it satisfies
//!
//! The transaction hash covers everything except the witnesses, so adding
//! signatures never changes the hash being signed.

use crate::core::amount::{AmountError, Fixed8};
use crate::core::encoding::{self, HashWriter};
use crate::core::script::{self, ScriptError};
use crate::crypto::{double_sha256, hash160, Hash160, Hash256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Current transaction version
pub const TX_VERSION: u8 = 0;

/// Most outputs a transaction can have; output indexes are 16-bit
pub const MAX_OUTPUTS: usize = u16::MAX as usize + 1;

// =============================================================================
// Error Types
// =============================================================================

/// Errors from assembling a transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Insufficient funds for asset {asset}: required {required}, available {available}")]
    InsufficientFunds {
        asset: Hash256,
        required: Fixed8,
        available: Fixed8,
    },
    #[error("Amount overflow")]
    Overflow,
    #[error("Output {0} has a non-positive value")]
    NonPositiveOutput(usize),
    #[error("Negative fee")]
    NegativeFee,
    #[error("Inputs and outputs do not balance for asset {0}")]
    Unbalanced(Hash256),
    #[error("Transaction has {0} outputs, more than an output index can address")]
    TooManyOutputs(usize),
}

impl From<AmountError> for BuildError {
    fn from(_: AmountError) -> Self {
        BuildError::Overflow
    }
}

// =============================================================================
// Inputs and Outputs
// =============================================================================

/// Reference to a previous transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: Hash256,
    pub index: u16,
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub asset_id: Hash256,
    pub value: Fixed8,
    pub script_hash: Hash160,
}

/// An unspent output together with the outpoint that identifies it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub output: TransactionOutput,
}

// =============================================================================
// Witness
// =============================================================================

/// Invocation script plus the verification script it satisfies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    #[serde(with = "crate::crypto::hash::serde_hex")]
    pub invocation: Vec<u8>,
    #[serde(with = "crate::crypto::hash::serde_hex")]
    pub verification: Vec<u8>,
}

impl Witness {
    pub fn script_hash(&self) -> Hash160 {
        hash160(&self.verification)
    }

    /// Check the invocation against the verification script for `hash`
    pub fn verify(&self, hash: &Hash256) -> Result<(), ScriptError> {
        script::verify_witness(&self.invocation, &self.verification, hash)
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u8,
    /// Distinguishes otherwise identical transactions
    pub nonce: u32,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<TransactionOutput>,
    pub witnesses: Vec<Witness>,
}

impl Transaction {
    /// Create an issuing transaction (no inputs)
    pub fn issue(outputs: Vec<TransactionOutput>, nonce: u32) -> Self {
        Self {
            version: TX_VERSION,
            nonce,
            inputs: Vec::new(),
            outputs,
            witnesses: Vec::new(),
        }
    }

    pub fn is_issue(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Bytes covered by the hash and by signatures
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut w = HashWriter::new();
        w.write_u8(self.version);
        w.write_u32_le(self.nonce);
        w.write_u32_le(self.inputs.len() as u32);
        for input in &self.inputs {
            w.write_bytes(input.tx_hash.as_bytes());
            w.write_u16_le(input.index);
        }
        w.write_u32_le(self.outputs.len() as u32);
        for output in &self.outputs {
            w.write_bytes(output.asset_id.as_bytes());
            w.write_i64_le(output.value.units());
            w.write_bytes(output.script_hash.as_bytes());
        }
        w.into_inner()
    }

    /// Transaction hash (witnesses excluded)
    pub fn hash(&self) -> Hash256 {
        double_sha256(&self.signing_payload())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        encoding::to_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        encoding::from_bytes(bytes)
    }

    /// Outpoints this transaction creates, paired with their outputs
    pub fn coins(&self) -> Vec<Coin> {
        let tx_hash = self.hash();
        self.outputs
            .iter()
            .zip(0..=u16::MAX)
            .map(|(output, index)| Coin {
                outpoint: OutPoint { tx_hash, index },
                output: output.clone(),
            })
            .collect()
    }

    /// Check the witnesses against the script hashes being spent
    ///
    /// `required` must be sorted ascending; witnesses are expected in the
    /// same order.
    pub fn verify_witnesses(&self, required: &[Hash160]) -> Result<(), ScriptError> {
        if self.witnesses.len() != required.len() {
            return Err(ScriptError::WitnessMismatch);
        }
        let hash = self.hash();
        for (witness, expected) in self.witnesses.iter().zip(required) {
            if witness.script_hash() != *expected {
                return Err(ScriptError::WitnessMismatch);
            }
            witness.verify(&hash)?;
        }
        Ok(())
    }
}

// =============================================================================
// Unsigned Transaction
// =============================================================================

/// A balanced transaction awaiting witnesses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub transaction: Transaction,
    pub fee: Fixed8,
    pub fee_asset: Hash256,
    /// Coins consumed by the inputs, in input order
    pub spent: Vec<Coin>,
}

impl UnsignedTransaction {
    pub fn hash(&self) -> Hash256 {
        self.transaction.hash()
    }

    /// Distinct script hashes whose owners must sign, ascending
    pub fn script_hashes_for_verifying(&self) -> Vec<Hash160> {
        self.spent
            .iter()
            .map(|coin| coin.output.script_hash)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Attach witnesses, producing the final transaction
    pub fn into_signed(self, witnesses: Vec<Witness>) -> Transaction {
        let mut tx = self.transaction;
        tx.witnesses = witnesses;
        tx
    }
}

// =============================================================================
// Transaction Builder
// =============================================================================

/// Assembles balanced transactions from caller outputs and spendable coins
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    fee_asset: Hash256,
    change_script_hash: Option<Hash160>,
    nonce: u32,
}

impl TransactionBuilder {
    pub fn new(fee_asset: Hash256) -> Self {
        Self {
            fee_asset,
            change_script_hash: None,
            nonce: 0,
        }
    }

    /// Send change to `script_hash`
    ///
    /// Without one, change for an asset returns to the script hash of the
    /// first coin selected for it.
    pub fn change_to(mut self, script_hash: Hash160) -> Self {
        self.change_script_hash = Some(script_hash);
        self
    }

    pub fn nonce(mut self, nonce: u32) -> Self {
        self.nonce = nonce;
        self
    }

    /// Select inputs and add change so every asset balances
    ///
    /// Per asset, Σinputs == Σoutputs (+ fee for the fee asset). Nothing is
    /// marked spent.
    pub fn build(
        &self,
        outputs: Vec<TransactionOutput>,
        fee: Fixed8,
        spendable: &[Coin],
    ) -> Result<UnsignedTransaction, BuildError> {
        if fee.is_negative() {
            return Err(BuildError::NegativeFee);
        }
        if let Some(index) = outputs.iter().position(|o| !o.value.is_positive()) {
            return Err(BuildError::NonPositiveOutput(index));
        }

        if outputs.len() > MAX_OUTPUTS {
            return Err(BuildError::TooManyOutputs(outputs.len()));
        }

        let requirements = self.requirements(&outputs, fee)?;

        // A coin listed twice is still spent once
        let mut seen = HashSet::new();
        let unique: Vec<&Coin> = spendable
            .iter()
            .filter(|coin| seen.insert(coin.outpoint))
            .collect();

        let mut spent: Vec<Coin> = Vec::new();
        let mut change_outputs = Vec::new();

        for (asset, required) in requirements {
            let candidates: Vec<&Coin> = unique
                .iter()
                .copied()
                .filter(|coin| coin.output.asset_id == asset)
                .collect();
            let selected = select_coins(asset, required, &candidates)?;

            let selected_total = Fixed8::checked_sum(selected.iter().map(|c| c.output.value))?;
            let change = selected_total.checked_sub(required)?;
            if change.is_positive() {
                let script_hash = match self.change_script_hash {
                    Some(hash) => hash,
                    None => selected[0].output.script_hash,
                };
                change_outputs.push(TransactionOutput {
                    asset_id: asset,
                    value: change,
                    script_hash,
                });
            }

            spent.extend(selected.into_iter().cloned());
        }

        let mut all_outputs = outputs;
        all_outputs.extend(change_outputs);
        if all_outputs.len() > MAX_OUTPUTS {
            return Err(BuildError::TooManyOutputs(all_outputs.len()));
        }

        let transaction = Transaction {
            version: TX_VERSION,
            nonce: self.nonce,
            inputs: spent.iter().map(|coin| coin.outpoint).collect(),
            outputs: all_outputs,
            witnesses: Vec::new(),
        };

        let unsigned = UnsignedTransaction {
            transaction,
            fee,
            fee_asset: self.fee_asset,
            spent,
        };
        check_balance(&unsigned)?;
        Ok(unsigned)
    }

    /// Required total per asset, in first-appearance order, fee asset last
    fn requirements(
        &self,
        outputs: &[TransactionOutput],
        fee: Fixed8,
    ) -> Result<Vec<(Hash256, Fixed8)>, BuildError> {
        let mut order: Vec<Hash256> = Vec::new();
        let mut totals: HashMap<Hash256, Fixed8> = HashMap::new();

        for output in outputs {
            let total = totals.entry(output.asset_id).or_insert_with(|| {
                order.push(output.asset_id);
                Fixed8::ZERO
            });
            *total = total.checked_add(output.value)?;
        }

        if fee.is_positive() {
            let total = totals.entry(self.fee_asset).or_insert_with(|| {
                order.push(self.fee_asset);
                Fixed8::ZERO
            });
            *total = total.checked_add(fee)?;
        }

        Ok(order
            .into_iter()
            .map(|asset| (asset, totals[&asset]))
            .collect())
    }
}

/// Pick coins of one asset covering `required`
///
/// Takes everything on an exact match; otherwise walks coins by descending
/// value taking each that still fits, then tops up with the smallest
/// remaining coin that covers what is left.
fn select_coins<'a>(
    asset: Hash256,
    required: Fixed8,
    candidates: &[&'a Coin],
) -> Result<Vec<&'a Coin>, BuildError> {
    let available = Fixed8::checked_sum(candidates.iter().map(|c| c.output.value))?;
    if available < required {
        return Err(BuildError::InsufficientFunds {
            asset,
            required,
            available,
        });
    }
    if available == required {
        return Ok(candidates.to_vec());
    }

    let mut ordered = candidates.to_vec();
    ordered.sort_by(|a, b| b.output.value.cmp(&a.output.value));

    let mut selected = Vec::new();
    let mut remaining_coins = Vec::new();
    let mut remaining = required;

    for coin in ordered {
        if coin.output.value <= remaining {
            remaining = remaining.checked_sub(coin.output.value)?;
            selected.push(coin);
        } else {
            remaining_coins.push(coin);
        }
    }

    if remaining.is_positive() {
        // remaining_coins is still in descending order
        let top_up = remaining_coins
            .into_iter()
            .rev()
            .find(|coin| coin.output.value >= remaining)
            .ok_or(BuildError::InsufficientFunds {
                asset,
                required,
                available,
            })?;
        selected.push(top_up);
    }

    Ok(selected)
}

fn check_balance(unsigned: &UnsignedTransaction) -> Result<(), BuildError> {
    let mut balance: HashMap<Hash256, Fixed8> = HashMap::new();

    for coin in &unsigned.spent {
        let entry = balance.entry(coin.output.asset_id).or_default();
        *entry = entry.checked_add(coin.output.value)?;
    }
    for output in &unsigned.transaction.outputs {
        let entry = balance.entry(output.asset_id).or_default();
        *entry = entry.checked_sub(output.value)?;
    }
    if unsigned.fee.is_positive() {
        let entry = balance.entry(unsigned.fee_asset).or_default();
        *entry = entry.checked_sub(unsigned.fee)?;
    }

    match balance.into_iter().find(|(_, net)| *net != Fixed8::ZERO) {
        Some((asset, _)) => Err(BuildError::Unbalanced(asset)),
        None => Ok(()),
    }
}

// =============================================================================
// Tests
// =============================================================================
