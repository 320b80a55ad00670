//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Fixed-point amounts
//! - Verification script templates and contracts
//! - Transactions and the transaction builder (coin selection, change)
//! - Blocks and their canonical encoding
//! - The ledger collaborator and the verification guard

pub mod amount;
pub mod block;
pub mod contract;
pub mod encoding;
pub mod ledger;
pub mod script;
pub mod transaction;

pub use amount::{AmountError, Fixed8};
pub use block::{coin_asset_id, share_asset_id, Block, BlockError, BlockHeader};
pub use contract::{Contract, ContractParameterType};
pub use ledger::{Ledger, LedgerError, MemoryLedger, VerificationSuspension};
pub use script::{ScriptError, ScriptKind};
pub use transaction::{
    BuildError, Coin, OutPoint, Transaction, TransactionBuilder, TransactionOutput,
    UnsignedTransaction, Witness,
};
