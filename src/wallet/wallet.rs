//! Wallet implementation
//!
//! Holds the operator's accounts and the contracts they can sign for,
//! builds spends from the ledger's unspent coins, contributes signatures
//! to signature contexts and remembers the transactions it has sent.

use crate::core::amount::Fixed8;
use crate::core::contract::Contract;
use crate::core::ledger::MemoryLedger;
use crate::core::transaction::{
    BuildError, Coin, OutPoint, Transaction, TransactionBuilder, TransactionOutput,
    UnsignedTransaction,
};
use crate::crypto::{Hash160, Hash256, KeyPair, PubKey};
use crate::signing::{SignatureContext, SigningError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

/// Wallet-related errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Transaction error: {0}")]
    Build(#[from] BuildError),
    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),
    #[error("Contract {0} holds none of this wallet's keys")]
    ForeignContract(Hash160),
    #[error("Invalid contract: {0}")]
    InvalidContract(#[from] crate::core::script::ScriptError),
    #[error("Wallet has no accounts")]
    NoAccounts,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] crate::crypto::KeyError),
}

impl WalletError {
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, WalletError::Build(BuildError::InsufficientFunds { .. }))
    }
}

// =============================================================================
// Account
// =============================================================================

/// A key pair owned by the wallet
#[derive(Debug, Clone)]
pub struct Account {
    key_pair: KeyPair,
    pub label: Option<String>,
}

impl Account {
    pub fn new(key_pair: KeyPair, label: Option<String>) -> Self {
        Self { key_pair, label }
    }

    pub fn public_key(&self) -> PubKey {
        self.key_pair.public_key()
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// The account's own single-signature contract
    pub fn contract(&self) -> Contract {
        Contract::single(&self.public_key())
    }

    pub fn script_hash(&self) -> Hash160 {
        self.contract().script_hash()
    }

    pub fn address(&self) -> String {
        self.contract().address()
    }
}

// =============================================================================
// Persistence
// =============================================================================

/// Serializable wallet data for persistence
#[derive(Serialize, Deserialize)]
struct WalletData {
    accounts: Vec<AccountData>,
    contracts: Vec<Contract>,
    #[serde(default)]
    sent: Vec<SentTransaction>,
}

#[derive(Serialize, Deserialize)]
struct AccountData {
    private_key_hex: String,
    label: Option<String>,
}

impl Drop for AccountData {
    fn drop(&mut self) {
        self.private_key_hex.zeroize();
    }
}

/// A transaction this wallet signed and handed off
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentTransaction {
    pub transaction: Transaction,
    pub sent_at: DateTime<Utc>,
}

// =============================================================================
// Wallet
// =============================================================================

/// Accounts, contracts and sent transactions
#[derive(Debug, Default)]
pub struct Wallet {
    accounts: BTreeMap<PubKey, Account>,
    contracts: BTreeMap<Hash160, Contract>,
    sent: Vec<SentTransaction>,
}

impl Wallet {
    /// Create an empty wallet
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new account and register its contract
    pub fn create_account(&mut self, label: Option<&str>) -> Account {
        let account = Account::new(KeyPair::generate(), label.map(str::to_string));
        self.insert_account(account.clone());
        account
    }

    /// Import an account from a hex private key
    pub fn import_account(&mut self, private_key_hex: &str) -> Result<Account, WalletError> {
        let account = Account::new(KeyPair::from_private_key_hex(private_key_hex)?, None);
        self.insert_account(account.clone());
        Ok(account)
    }

    fn insert_account(&mut self, account: Account) {
        let contract = account.contract();
        self.contracts.insert(contract.script_hash(), contract);
        self.accounts.insert(account.public_key(), account);
    }

    /// Register a contract (typically multi-signature) this wallet can sign for
    pub fn add_contract(&mut self, contract: Contract) -> Result<Hash160, WalletError> {
        let kind = contract.kind()?;
        let script_hash = contract.script_hash();
        if !kind.keys().iter().any(|key| self.accounts.contains_key(key)) {
            return Err(WalletError::ForeignContract(script_hash));
        }
        self.contracts.insert(script_hash, contract);
        Ok(script_hash)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn contracts(&self) -> impl Iterator<Item = &Contract> {
        self.contracts.values()
    }

    pub fn contract(&self, script_hash: &Hash160) -> Option<&Contract> {
        self.contracts.get(script_hash)
    }

    pub fn script_hashes(&self) -> HashSet<Hash160> {
        self.contracts.keys().copied().collect()
    }

    pub fn sent(&self) -> &[SentTransaction] {
        &self.sent
    }

    /// Where change goes: the first standard contract
    pub fn change_script_hash(&self) -> Option<Hash160> {
        self.contracts
            .values()
            .find(|c| c.is_standard())
            .map(Contract::script_hash)
    }

    /// Coins this wallet can spend, excluding those consumed by sent
    /// transactions the ledger has not yet included
    pub fn coins(&self, ledger: &MemoryLedger) -> Vec<Coin> {
        let reserved: HashSet<OutPoint> = self
            .sent
            .iter()
            .flat_map(|sent| sent.transaction.inputs.iter().copied())
            .collect();
        ledger
            .unspent_coins(&self.script_hashes())
            .into_iter()
            .filter(|coin| !reserved.contains(&coin.outpoint))
            .collect()
    }

    /// Build a balanced spend paying `outputs` plus `fee`
    pub fn make_transaction(
        &self,
        outputs: Vec<TransactionOutput>,
        fee: Fixed8,
        fee_asset: Hash256,
        ledger: &MemoryLedger,
    ) -> Result<UnsignedTransaction, WalletError> {
        let change = self.change_script_hash().ok_or(WalletError::NoAccounts)?;
        let nonce = rand::random::<u32>();
        let builder = TransactionBuilder::new(fee_asset)
            .change_to(change)
            .nonce(nonce);
        Ok(builder.build(outputs, fee, &self.coins(ledger))?)
    }

    /// Add every signature this wallet can contribute to `context`
    ///
    /// Returns whether any signature was added.
    pub fn sign(&self, context: &mut SignatureContext) -> Result<bool, WalletError> {
        let mut signed = false;
        for script_hash in context.script_hashes().to_vec() {
            let Some(contract) = self.contracts.get(&script_hash) else {
                continue;
            };
            let kind = contract.kind()?;
            for key in kind.keys() {
                if let Some(account) = self.accounts.get(key) {
                    signed |= context.add_signature(contract, account.key_pair())?;
                }
            }
        }
        Ok(signed)
    }

    /// Remember a signed transaction so its inputs are not spent again
    pub fn save_transaction(&mut self, transaction: Transaction) -> bool {
        let hash = transaction.hash();
        if self.sent.iter().any(|s| s.transaction.hash() == hash) {
            return false;
        }
        self.sent.push(SentTransaction {
            transaction,
            sent_at: Utc::now(),
        });
        true
    }

    /// Drop sent transactions whose inputs are no longer unspent
    pub fn prune_sent(&mut self, ledger: &MemoryLedger) -> usize {
        let before = self.sent.len();
        self.sent.retain(|sent| {
            sent.transaction
                .inputs
                .iter()
                .all(|outpoint| ledger.coin(outpoint).is_some())
        });
        before - self.sent.len()
    }

    /// Save wallet to file
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let data = WalletData {
            accounts: self
                .accounts
                .values()
                .map(|account| AccountData {
                    private_key_hex: account.key_pair.private_key_hex().to_string(),
                    label: account.label.clone(),
                })
                .collect(),
            contracts: self.contracts.values().cloned().collect(),
            sent: self.sent.clone(),
        };

        let json = Zeroizing::new(serde_json::to_string_pretty(&data)?);
        fs::write(path, json.as_bytes())?;
        Ok(())
    }

    /// Load wallet from file
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let json = Zeroizing::new(fs::read_to_string(path)?);
        let data: WalletData = serde_json::from_str(&json)?;

        let mut wallet = Self::new();
        for entry in &data.accounts {
            let key_pair = KeyPair::from_private_key_hex(&entry.private_key_hex)?;
            wallet.insert_account(Account::new(key_pair, entry.label.clone()));
        }
        for contract in &data.contracts {
            wallet.add_contract(contract.clone())?;
        }
        wallet.sent = data.sent.clone();
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::{share_asset_id, Block};
    use crate::core::ledger::Ledger;

    fn funded_wallet(values: &[i64]) -> (Wallet, MemoryLedger) {
        let mut wallet = Wallet::new();
        let account = wallet.create_account(Some("main"));
        let genesis = Block::genesis(
            values
                .iter()
                .map(|v| TransactionOutput {
                    asset_id: share_asset_id(),
                    value: Fixed8::from_whole(*v).unwrap(),
                    script_hash: account.script_hash(),
                })
                .collect(),
        );
        (wallet, MemoryLedger::with_genesis(genesis).unwrap())
    }

    fn pay(whole: i64) -> TransactionOutput {
        TransactionOutput {
            asset_id: share_asset_id(),
            value: Fixed8::from_whole(whole).unwrap(),
            script_hash: Contract::single(&KeyPair::generate().public_key()).script_hash(),
        }
    }

    #[test]
    fn test_account_creation() {
        let mut wallet = Wallet::new();
        let account = wallet.create_account(None);
        assert!(account.address().starts_with('A'));
        assert_eq!(wallet.change_script_hash(), Some(account.script_hash()));
        assert!(wallet.contract(&account.script_hash()).unwrap().is_standard());
    }

    #[test]
    fn test_import_account() {
        let mut wallet = Wallet::new();
        let kp = KeyPair::generate();
        let account = wallet.import_account(&kp.private_key_hex()).unwrap();
        assert_eq!(account.public_key(), kp.public_key());
    }

    #[test]
    fn test_foreign_contract_rejected() {
        let mut wallet = Wallet::new();
        wallet.create_account(None);
        let keys = vec![KeyPair::generate().public_key(), KeyPair::generate().public_key()];
        let contract = Contract::multisig(1, &keys).unwrap();
        assert!(matches!(
            wallet.add_contract(contract),
            Err(WalletError::ForeignContract(_))
        ));
    }

    #[test]
    fn test_make_sign_and_apply() {
        let (mut wallet, ledger) = funded_wallet(&[6, 6]);
        let unsigned = wallet
            .make_transaction(vec![pay(10)], Fixed8::ZERO, share_asset_id(), &ledger)
            .unwrap();
        assert_eq!(unsigned.spent.len(), 2);

        let mut context = SignatureContext::new(&unsigned);
        assert!(wallet.sign(&mut context).unwrap());
        assert!(context.is_complete());

        let tx = context.into_signed_transaction().unwrap();
        assert!(wallet.save_transaction(tx.clone()));
        assert!(!wallet.save_transaction(tx.clone()));
        assert!(wallet.coins(&ledger).is_empty());

        let tip = ledger.get_block(0).unwrap();
        ledger.apply_block(tip.next(vec![tx])).unwrap();
        assert_eq!(wallet.prune_sent(&ledger), 1);
        // Change of 2 came back to the wallet
        let coins = wallet.coins(&ledger);
        assert_eq!(coins.len(), 1);
        assert_eq!(coins[0].output.value, Fixed8::from_whole(2).unwrap());
    }

    #[test]
    fn test_insufficient_funds() {
        let (wallet, ledger) = funded_wallet(&[3]);
        let err = wallet
            .make_transaction(vec![pay(5)], Fixed8::ZERO, share_asset_id(), &ledger)
            .unwrap_err();
        assert!(err.is_insufficient_funds());
    }

    #[test]
    fn test_wallet_save_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("wallet.json");

        let mut wallet = Wallet::new();
        let a = wallet.create_account(Some("a"));
        let b = wallet.create_account(Some("b"));
        let multisig = Contract::multisig(2, &[a.public_key(), b.public_key()]).unwrap();
        wallet.add_contract(multisig.clone()).unwrap();
        wallet.save(&path).unwrap();

        let loaded = Wallet::load(&path).unwrap();
        assert_eq!(loaded.accounts().count(), 2);
        assert!(loaded.contract(&multisig.script_hash()).is_some());
        assert_eq!(loaded.script_hashes(), wallet.script_hashes());
    }
}
