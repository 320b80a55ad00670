//! Signature collection for a single transaction
//!
//! A [`SignatureContext`] gathers signatures for every contract whose coins
//! a transaction spends. Contexts can be exported to a portable JSON form,
//! handed to other signers, and merged back together; once every contract
//! has its threshold of signatures the context yields the final witnesses.

use crate::core::contract::Contract;
use crate::core::script::{self, ScriptError, ScriptKind};
use crate::core::ledger::MemoryLedger;
use crate::core::transaction::{OutPoint, Transaction, TransactionOutput, UnsignedTransaction, Witness};
use crate::crypto::{hash160, verify_signature, Hash160, Hash256, KeyError, KeyPair, PubKey, Signature};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Signature collection errors
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Unrecognized verification script")]
    UnrecognizedScript,
    #[error("Contract {0} is not required by this transaction or does not hold the key")]
    UnrelatedContract(Hash160),
    #[error("Signature context belongs to a different transaction")]
    TransactionMismatch,
    #[error("Not all required signatures are present")]
    IncompleteSignatures,
    #[error("Input {0:?} is not an unspent coin")]
    UnknownInput(OutPoint),
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Malformed signature context: {0}")]
    Malformed(String),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

impl From<ScriptError> for SigningError {
    fn from(_: ScriptError) -> Self {
        SigningError::UnrecognizedScript
    }
}

/// Progress of a signature context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningState {
    /// No signatures yet
    Open,
    /// Some signatures collected, at least one contract still short
    PartiallySigned,
    /// Every required contract meets its threshold
    Complete,
}

// =============================================================================
// Per-contract signatures
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct ContractSignatures {
    script: Vec<u8>,
    kind: ScriptKind,
    signatures: BTreeMap<PubKey, Signature>,
}

impl ContractSignatures {
    fn new(script: Vec<u8>) -> Result<Self, SigningError> {
        let kind = script::classify(&script)?;
        Ok(Self {
            script,
            kind,
            signatures: BTreeMap::new(),
        })
    }

    fn is_satisfied(&self) -> bool {
        self.signatures.len() >= self.kind.threshold()
    }

    /// Insert, keeping the smaller signature on conflict. Returns whether
    /// anything changed.
    fn insert(&mut self, key: PubKey, signature: Signature) -> bool {
        match self.signatures.get_mut(&key) {
            Some(existing) if signature < *existing => {
                *existing = signature;
                true
            }
            Some(_) => false,
            None => {
                self.signatures.insert(key, signature);
                true
            }
        }
    }

    /// First `threshold` signatures in the script's key order
    fn invocation(&self) -> Vec<u8> {
        let ordered: Vec<Signature> = self
            .kind
            .keys()
            .iter()
            .filter_map(|key| self.signatures.get(key).copied())
            .take(self.kind.threshold())
            .collect();
        script::invocation_script(&ordered)
    }
}

// =============================================================================
// Signature Context
// =============================================================================

/// Signatures collected so far for one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureContext {
    transaction: Transaction,
    hash: Hash256,
    script_hashes: Vec<Hash160>,
    contracts: BTreeMap<Hash160, ContractSignatures>,
}

impl SignatureContext {
    /// Open a context for an unsigned transaction
    pub fn new(unsigned: &UnsignedTransaction) -> Self {
        Self::with_script_hashes(
            unsigned.transaction.clone(),
            unsigned.script_hashes_for_verifying(),
        )
    }

    /// Open a context naming the required script hashes explicitly
    pub fn with_script_hashes(mut transaction: Transaction, mut script_hashes: Vec<Hash160>) -> Self {
        transaction.witnesses.clear();
        script_hashes.sort();
        script_hashes.dedup();
        let hash = transaction.hash();
        Self {
            transaction,
            hash,
            script_hashes,
            contracts: BTreeMap::new(),
        }
    }

    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Script hashes that must sign, ascending
    pub fn script_hashes(&self) -> &[Hash160] {
        &self.script_hashes
    }

    /// Signatures held for `script_hash`
    pub fn signatures(&self, script_hash: &Hash160) -> Option<&BTreeMap<PubKey, Signature>> {
        self.contracts.get(script_hash).map(|c| &c.signatures)
    }

    /// Required script hashes that still lack signatures
    pub fn missing(&self) -> Vec<Hash160> {
        self.script_hashes
            .iter()
            .filter(|hash| {
                !self
                    .contracts
                    .get(*hash)
                    .is_some_and(ContractSignatures::is_satisfied)
            })
            .copied()
            .collect()
    }

    pub fn state(&self) -> SigningState {
        if self.missing().is_empty() {
            SigningState::Complete
        } else if self.contracts.values().all(|c| c.signatures.is_empty()) {
            SigningState::Open
        } else {
            SigningState::PartiallySigned
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state() == SigningState::Complete
    }

    /// Look up (or start) the entry for `contract`, checking it is required
    /// and holds `key`
    fn entry_for(
        &mut self,
        contract: &Contract,
        key: &PubKey,
    ) -> Result<&mut ContractSignatures, SigningError> {
        let script_hash = contract.script_hash();
        if self.script_hashes.binary_search(&script_hash).is_err() {
            return Err(SigningError::UnrelatedContract(script_hash));
        }
        let kind = script::classify(&contract.script)?;
        if !kind.contains_key(key) {
            return Err(SigningError::UnrelatedContract(script_hash));
        }

        Ok(match self.contracts.entry(script_hash) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(ContractSignatures::new(contract.script.clone())?),
        })
    }

    /// Sign with `account` on behalf of `contract`
    ///
    /// Returns `Ok(false)` when nothing was added: the key already signed
    /// or the context is already complete.
    pub fn add_signature(
        &mut self,
        contract: &Contract,
        account: &KeyPair,
    ) -> Result<bool, SigningError> {
        if self.is_complete() {
            return Ok(false);
        }
        let key = account.public_key();
        let hash = self.hash;
        let entry = self.entry_for(contract, &key)?;
        if entry.signatures.contains_key(&key) {
            return Ok(false);
        }
        let signature = account.sign(&hash)?;
        Ok(entry.insert(key, signature))
    }

    /// Accept a signature produced elsewhere over `signed_hash`
    pub fn add_partial(
        &mut self,
        contract: &Contract,
        key: PubKey,
        signature: Signature,
        signed_hash: &Hash256,
    ) -> Result<bool, SigningError> {
        if *signed_hash != self.hash {
            return Err(SigningError::TransactionMismatch);
        }
        if !verify_signature(&key, &self.hash, &signature) {
            return Err(SigningError::InvalidSignature);
        }
        if self.is_complete() {
            return Ok(false);
        }
        let entry = self.entry_for(contract, &key)?;
        Ok(entry.insert(key, signature))
    }

    /// Union of both contexts' signatures
    ///
    /// Where both hold a different signature for the same key the smaller
    /// one wins, so merging is order independent.
    pub fn merge(&mut self, other: &SignatureContext) -> Result<(), SigningError> {
        if self.hash != other.hash || self.script_hashes != other.script_hashes {
            return Err(SigningError::TransactionMismatch);
        }
        for (script_hash, theirs) in &other.contracts {
            let ours = self
                .contracts
                .entry(*script_hash)
                .or_insert_with(|| ContractSignatures {
                    script: theirs.script.clone(),
                    kind: theirs.kind.clone(),
                    signatures: BTreeMap::new(),
                });
            for (key, signature) in &theirs.signatures {
                ours.insert(*key, *signature);
            }
        }
        Ok(())
    }

    /// Witnesses for every required contract, ascending by script hash
    pub fn finalize(&self) -> Result<Vec<Witness>, SigningError> {
        if !self.is_complete() {
            return Err(SigningError::IncompleteSignatures);
        }
        self.script_hashes
            .iter()
            .map(|script_hash| {
                let contract = self
                    .contracts
                    .get(script_hash)
                    .ok_or(SigningError::IncompleteSignatures)?;
                Ok(Witness {
                    invocation: contract.invocation(),
                    verification: contract.script.clone(),
                })
            })
            .collect()
    }

    /// The transaction with its final witnesses attached
    pub fn into_signed_transaction(self) -> Result<Transaction, SigningError> {
        let witnesses = self.finalize()?;
        let mut tx = self.transaction;
        tx.witnesses = witnesses;
        Ok(tx)
    }

    // =========================================================================
    // Portable form
    // =========================================================================

    pub fn to_json(&self) -> Result<String, SigningError> {
        let portable = PortableContext {
            hex: hex::encode(self.transaction.to_bytes()?),
            hash: self.hash,
            script_hashes: self.script_hashes.clone(),
            contracts: self
                .contracts
                .iter()
                .map(|(script_hash, c)| PortableContract {
                    script_hash: *script_hash,
                    script: c.script.clone(),
                    signatures: c.signatures.clone(),
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&portable)?)
    }

    /// Parse a portable context, re-deriving the hash and re-verifying
    /// every signature
    pub fn from_json(json: &str) -> Result<Self, SigningError> {
        let portable: PortableContext = serde_json::from_str(json)?;
        let bytes = hex::decode(&portable.hex)
            .map_err(|e| SigningError::Malformed(format!("transaction hex: {}", e)))?;
        let transaction = Transaction::from_bytes(&bytes)?;

        let mut context = Self::with_script_hashes(transaction, portable.script_hashes);
        if context.hash != portable.hash {
            return Err(SigningError::TransactionMismatch);
        }
        if context.script_hashes.is_empty() && !context.transaction.inputs.is_empty() {
            return Err(SigningError::TransactionMismatch);
        }

        for entry in portable.contracts {
            if hash160(&entry.script) != entry.script_hash {
                return Err(SigningError::Malformed(format!(
                    "script does not hash to {}",
                    entry.script_hash
                )));
            }
            let contract = Contract::from_script(entry.script)?;
            for (key, signature) in entry.signatures {
                if !verify_signature(&key, &context.hash, &signature) {
                    return Err(SigningError::InvalidSignature);
                }
                context.entry_for(&contract, &key)?.insert(key, signature);
            }
        }

        Ok(context)
    }

    /// Check the required script hashes are exactly those of the coins the
    /// inputs spend, as resolved by `resolve`
    pub fn verify_inputs<F>(&self, resolve: F) -> Result<(), SigningError>
    where
        F: Fn(&OutPoint) -> Option<TransactionOutput>,
    {
        let mut required = BTreeSet::new();
        for outpoint in &self.transaction.inputs {
            let output = resolve(outpoint).ok_or(SigningError::UnknownInput(*outpoint))?;
            required.insert(output.script_hash);
        }
        if !required.iter().eq(self.script_hashes.iter()) {
            return Err(SigningError::TransactionMismatch);
        }
        Ok(())
    }

    /// Parse a portable context and check it against `ledger`'s unspent coins
    pub fn from_json_checked(json: &str, ledger: &MemoryLedger) -> Result<Self, SigningError> {
        let context = Self::from_json(json)?;
        context.verify_inputs(|outpoint| ledger.coin(outpoint))?;
        Ok(context)
    }
}

impl fmt::Display for SignatureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json() {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "SignatureContext({})", self.hash),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PortableContext {
    hex: String,
    hash: Hash256,
    script_hashes: Vec<Hash160>,
    contracts: Vec<PortableContract>,
}

#[derive(Serialize, Deserialize)]
struct PortableContract {
    script_hash: Hash160,
    #[serde(with = "crate::crypto::hash::serde_hex")]
    script: Vec<u8>,
    signatures: BTreeMap<PubKey, Signature>,
}

// =============================================================================
// Tests
// =============================================================================
