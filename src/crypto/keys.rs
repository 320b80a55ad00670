//! ECDSA key management
//!
//! Key pair generation, signing and verification on secp256k1. Private
//! key bytes live in zeroize-on-drop buffers; the secp256k1 secret key is
//! rebuilt for each signature and erased right after use.

use rand::rngs::OsRng;
use secp256k1::{ecdsa, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

use super::hash::{fixed_bytes, Hash160, Hash256};

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

fixed_bytes!(
    /// Compressed secp256k1 public key (33 bytes)
    ///
    /// Ordering is lexicographic over the compressed encoding, which is the
    /// order multi-signature scripts embed their keys in.
    PubKey,
    33
);

fixed_bytes!(
    /// Compact ECDSA signature (64 bytes, r || s)
    Signature,
    64
);

impl PubKey {
    /// Parse and validate a compressed public key
    pub fn from_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| KeyError::InvalidPublicKey)?;
        let key = PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self(key.serialize()))
    }

    fn to_secp(self) -> Result<PublicKey, KeyError> {
        PublicKey::from_slice(&self.0).map_err(|_| KeyError::InvalidPublicKey)
    }
}

/// A key pair consisting of a private key and its corresponding public key
pub struct KeyPair {
    secret: Zeroizing<[u8; 32]>,
    public_key: PubKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (mut secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        let pair = Self {
            secret: Zeroizing::new(secret_key.secret_bytes()),
            public_key: PubKey(public_key.serialize()),
        };
        secret_key.non_secure_erase();
        pair
    }

    /// Create a key pair from raw private key bytes
    ///
    /// The caller keeps ownership of `bytes` and is responsible for
    /// clearing them.
    pub fn from_private_key(bytes: &[u8]) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let mut secret_key = SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        let pair = Self {
            secret: Zeroizing::new(secret_key.secret_bytes()),
            public_key: PubKey(public_key.serialize()),
        };
        secret_key.non_secure_erase();
        Ok(pair)
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = Zeroizing::new(hex::decode(hex_key.trim()).map_err(|_| KeyError::InvalidPrivateKey)?);
        Self::from_private_key(&bytes)
    }

    /// Get the private key as a hex string
    /// WARNING: the returned string is secret; it is wrapped so it is wiped on drop.
    pub fn private_key_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(*self.secret))
    }

    pub fn public_key(&self) -> PubKey {
        self.public_key
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        self.public_key.to_hex()
    }

    /// Sign a 32-byte hash with the private key
    pub fn sign(&self, hash: &Hash256) -> Result<Signature, KeyError> {
        let secp = Secp256k1::signing_only();
        let mut secret_key =
            SecretKey::from_slice(&self.secret[..]).map_err(|_| KeyError::InvalidPrivateKey)?;
        let message = Message::from_digest_slice(hash.as_bytes())?;
        let signature = secp.sign_ecdsa(&message, &secret_key);
        secret_key.non_secure_erase();
        Ok(Signature(signature.serialize_compact()))
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            secret: Zeroizing::new(*self.secret),
            public_key: self.public_key,
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Verify a compact signature over a 32-byte hash
pub fn verify_signature(public_key: &PubKey, hash: &Hash256, signature: &Signature) -> bool {
    let secp = Secp256k1::verification_only();
    let Ok(key) = public_key.to_secp() else {
        return false;
    };
    let Ok(message) = Message::from_digest_slice(hash.as_bytes()) else {
        return false;
    };
    let Ok(sig) = ecdsa::Signature::from_compact(&signature.0) else {
        return false;
    };
    secp.verify_ecdsa(&message, &sig, &key).is_ok()
}

/// Address version byte; produces addresses starting with 'A'
pub const ADDRESS_VERSION: u8 = 0x17;

/// Convert a script hash to a Base58Check address
pub fn script_hash_to_address(script_hash: &Hash160) -> String {
    let mut address_bytes = vec![ADDRESS_VERSION];
    address_bytes.extend_from_slice(script_hash.as_bytes());

    // Checksum: first 4 bytes of double SHA256
    let checksum = Sha256::digest(Sha256::digest(&address_bytes));
    address_bytes.extend_from_slice(&checksum[..4]);

    bs58::encode(address_bytes).into_string()
}

/// Parse a Base58Check address back to its script hash
pub fn address_to_script_hash(address: &str) -> Result<Hash160, KeyError> {
    let invalid = || KeyError::InvalidAddress(address.to_string());
    let bytes = bs58::decode(address.trim()).into_vec().map_err(|_| invalid())?;
    if bytes.len() != 1 + Hash160::LEN + 4 || bytes[0] != ADDRESS_VERSION {
        return Err(invalid());
    }

    let (payload, checksum) = bytes.split_at(1 + Hash160::LEN);
    let expected = Sha256::digest(Sha256::digest(payload));
    if checksum != &expected[..4] {
        return Err(invalid());
    }

    Hash160::from_slice(&payload[1..]).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{double_sha256, hash160};

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.private_key_hex().len(), 64);
        assert_eq!(kp.public_key_hex().len(), 66);
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let hash = double_sha256(b"Hello, ledger!");

        let signature = kp.sign(&hash).unwrap();
        assert!(verify_signature(&kp.public_key(), &hash, &signature));

        let other = double_sha256(b"something else");
        assert!(!verify_signature(&kp.public_key(), &other, &signature));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let kp = KeyPair::generate();
        let hash = double_sha256(b"payload");
        assert_eq!(kp.sign(&hash).unwrap(), kp.sign(&hash).unwrap());
    }

    #[test]
    fn test_key_pair_from_hex() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::from_private_key_hex(&kp1.private_key_hex()).unwrap();
        assert_eq!(kp1.public_key(), kp2.public_key());
        assert!(KeyPair::from_private_key_hex("not hex").is_err());
    }

    #[test]
    fn test_address_round_trip() {
        let script_hash = hash160(b"verification script");
        let address = script_hash_to_address(&script_hash);
        assert!(address.starts_with('A'));
        assert_eq!(address_to_script_hash(&address).unwrap(), script_hash);

        let mut tampered = address.clone();
        tampered.pop();
        tampered.push(if address.ends_with('z') { 'y' } else { 'z' });
        assert!(address_to_script_hash(&tampered).is_err());
    }
}
