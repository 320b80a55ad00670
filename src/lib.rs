//! Ledger Shell: the core of a node-operator shell for a UTXO ledger client
//!
//! This crate provides:
//! - Fixed-point amounts, hashes, secp256k1 keys and base58 addresses
//! - Recognition of single- and multi-signature verification scripts
//! - Balanced transaction construction from unspent coins
//! - Multi-party signature contexts with a portable JSON form
//! - A length-prefixed chain snapshot format, raw or ZIP-archived
//! - Idempotent, resumable replay of snapshots into a ledger
//! - Reference wallet, ledger and relay collaborators
//!
//! # Example
//!
//! ```rust
//! use ledger_shell::core::{coin_asset_id, Block, Fixed8, Ledger, MemoryLedger, TransactionOutput};
//! use ledger_shell::signing::SignatureContext;
//! use ledger_shell::wallet::Wallet;
//!
//! let mut wallet = Wallet::new();
//! let account = wallet.create_account(None);
//!
//! // Fund the account in the genesis block
//! let ledger = MemoryLedger::with_genesis(Block::genesis(vec![TransactionOutput {
//!     asset_id: coin_asset_id(),
//!     value: Fixed8::from_whole(10).unwrap(),
//!     script_hash: account.script_hash(),
//! }]))
//! .unwrap();
//!
//! // Pay 3 back to ourselves and sign
//! let unsigned = wallet
//!     .make_transaction(
//!         vec![TransactionOutput {
//!             asset_id: coin_asset_id(),
//!             value: Fixed8::from_whole(3).unwrap(),
//!             script_hash: account.script_hash(),
//!         }],
//!         Fixed8::ZERO,
//!         coin_asset_id(),
//!         &ledger,
//!     )
//!     .unwrap();
//! let mut context = SignatureContext::new(&unsigned);
//! wallet.sign(&mut context).unwrap();
//! assert!(context.is_complete());
//!
//! let tx = context.into_signed_transaction().unwrap();
//! ledger
//!     .apply_block(ledger.get_block(0).unwrap().next(vec![tx]))
//!     .unwrap();
//! assert_eq!(ledger.current_height(), Some(1));
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod crypto;
pub mod network;
pub mod signing;
pub mod snapshot;
pub mod wallet;

// Re-export commonly used types
pub use config::{ConfigError, ShellConfig};
pub use core::{
    Block, Contract, Fixed8, Ledger, MemoryLedger, ScriptKind, Transaction, TransactionBuilder,
    UnsignedTransaction,
};
pub use crypto::KeyPair;
pub use network::{ChannelRelay, Relay};
pub use signing::{SignatureContext, SigningState};
pub use snapshot::{ChainReplayer, SnapshotReader, SnapshotWriter};
pub use wallet::Wallet;
