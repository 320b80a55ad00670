//! Wallet module for key, contract and transaction management

pub mod wallet;

pub use wallet::{Account, SentTransaction, Wallet, WalletError};
