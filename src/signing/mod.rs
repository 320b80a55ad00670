//! Multi-party signature collection
//!
//! Signers contribute to a [`SignatureContext`] locally or exchange its
//! portable JSON form; the context only yields witnesses once every
//! contract being spent has its threshold of signatures.

pub mod context;

pub use context::{SignatureContext, SigningError, SigningState};
