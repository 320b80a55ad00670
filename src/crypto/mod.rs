//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 / RIPEMD-160 hashing and the digest types
//! - ECDSA key management (secp256k1) and addresses
//! - Merkle root calculation

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{double_sha256, hash160, sha256, sha256_hex, Hash160, Hash256, ParseDigestError};
pub use keys::{
    address_to_script_hash, script_hash_to_address, verify_signature, KeyError, KeyPair, PubKey,
    Signature, ADDRESS_VERSION,
};
pub use merkle::calculate_merkle_root;
