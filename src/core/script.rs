//! Verification script templates
//!
//! Classifies verification scripts into the signature templates this
//! client knows how to satisfy, builds those scripts, and checks
//! invocation scripts against them.
//!
//! Templates:
//! - single signature: `PUSHBYTES33 <key> CHECKSIG`
//! - multi signature:  `PUSH(m) (PUSHBYTES33 <key>){n} PUSH(n) CHECKMULTISIG`
//!
//! An invocation script is a sequence of `PUSHBYTES64 <signature>`.

use crate::crypto::{verify_signature, Hash256, PubKey, Signature};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Opcodes
// =============================================================================

pub const OP_PUSHBYTES1: u8 = 0x01;
pub const OP_PUSHBYTES33: u8 = 0x21;
pub const OP_PUSHBYTES64: u8 = 0x40;
/// OP_1; OP_n is `OP_1 + n - 1` for n in 1..=16
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_CHECKSIG: u8 = 0xAC;
pub const OP_CHECKMULTISIG: u8 = 0xAE;

/// Maximum number of keys in a multi-signature script
pub const MAX_MULTISIG_KEYS: usize = 20;

// =============================================================================
// Script Errors
// =============================================================================

/// Script-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Unrecognized verification script")]
    UnrecognizedScript,
    #[error("Invalid threshold: {threshold} of {keys} keys")]
    InvalidThreshold { threshold: usize, keys: usize },
    #[error("Duplicate public key in script")]
    DuplicateKey,
    #[error("Malformed invocation script")]
    MalformedInvocation,
    #[error("Expected {expected} signatures, got {got}")]
    SignatureCount { expected: usize, got: usize },
    #[error("Signature verification failed")]
    VerificationFailed,
    #[error("Witnesses do not match the script hashes being spent")]
    WitnessMismatch,
}

// =============================================================================
// Script Kinds
// =============================================================================

/// The signature template a verification script follows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptKind {
    /// Exactly one required key
    SingleSignature { key: PubKey },
    /// `threshold` of `keys`, keys in the order the script embeds them
    MultiSignature { threshold: usize, keys: Vec<PubKey> },
}

impl ScriptKind {
    /// Required public keys, in script order
    pub fn keys(&self) -> &[PubKey] {
        match self {
            ScriptKind::SingleSignature { key } => std::slice::from_ref(key),
            ScriptKind::MultiSignature { keys, .. } => keys,
        }
    }

    /// Number of signatures needed to satisfy the script
    pub fn threshold(&self) -> usize {
        match self {
            ScriptKind::SingleSignature { .. } => 1,
            ScriptKind::MultiSignature { threshold, .. } => *threshold,
        }
    }

    pub fn contains_key(&self, key: &PubKey) -> bool {
        self.keys().contains(key)
    }

    /// Human readable "m-of-n"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.threshold(), self.keys().len())
    }
}

// =============================================================================
// Matching
// =============================================================================

/// Determine which keys and how many signatures a script requires
pub fn classify(script: &[u8]) -> Result<ScriptKind, ScriptError> {
    if let Some(key) = match_single(script) {
        return Ok(ScriptKind::SingleSignature { key });
    }
    if let Some((threshold, keys)) = match_multi(script) {
        return Ok(ScriptKind::MultiSignature { threshold, keys });
    }
    Err(ScriptError::UnrecognizedScript)
}

fn match_single(script: &[u8]) -> Option<PubKey> {
    if script.len() != 35 || script[0] != OP_PUSHBYTES33 || script[34] != OP_CHECKSIG {
        return None;
    }
    PubKey::from_slice(&script[1..34])
}

fn match_multi(script: &[u8]) -> Option<(usize, Vec<PubKey>)> {
    if script.last() != Some(&OP_CHECKMULTISIG) {
        return None;
    }

    let (threshold, mut pos) = read_number(script, 0)?;
    let mut keys = Vec::new();
    while script.get(pos) == Some(&OP_PUSHBYTES33) {
        let key = PubKey::from_slice(script.get(pos + 1..pos + 34)?)?;
        keys.push(key);
        pos += 34;
    }
    let (count, pos) = read_number(script, pos)?;

    // Only the trailing CHECKMULTISIG may remain
    if pos + 1 != script.len() || count != keys.len() {
        return None;
    }
    if threshold == 0 || threshold > count || count > MAX_MULTISIG_KEYS {
        return None;
    }
    if has_duplicates(&keys) {
        return None;
    }

    Some((threshold, keys))
}

fn read_number(script: &[u8], pos: usize) -> Option<(usize, usize)> {
    match *script.get(pos)? {
        op @ OP_1..=OP_16 => Some(((op - OP_1) as usize + 1, pos + 1)),
        OP_PUSHBYTES1 => {
            let value = *script.get(pos + 1)? as usize;
            // Small values must use the OP_n form
            (value > 16).then_some((value, pos + 2))
        }
        _ => None,
    }
}

fn push_number(script: &mut Vec<u8>, value: usize) {
    if (1..=16).contains(&value) {
        script.push(OP_1 + (value - 1) as u8);
    } else {
        script.push(OP_PUSHBYTES1);
        script.push(value as u8);
    }
}

fn has_duplicates(keys: &[PubKey]) -> bool {
    let mut sorted = keys.to_vec();
    sorted.sort();
    sorted.windows(2).any(|w| w[0] == w[1])
}

// =============================================================================
// Script Construction
// =============================================================================

/// Build a single-signature verification script
pub fn single_signature_script(key: &PubKey) -> Vec<u8> {
    let mut script = Vec::with_capacity(35);
    script.push(OP_PUSHBYTES33);
    script.extend_from_slice(key.as_bytes());
    script.push(OP_CHECKSIG);
    script
}

/// Build an m-of-n verification script, embedding keys in the given order
pub fn multisig_script(threshold: usize, keys: &[PubKey]) -> Result<Vec<u8>, ScriptError> {
    if threshold == 0 || threshold > keys.len() || keys.len() > MAX_MULTISIG_KEYS {
        return Err(ScriptError::InvalidThreshold {
            threshold,
            keys: keys.len(),
        });
    }
    if has_duplicates(keys) {
        return Err(ScriptError::DuplicateKey);
    }

    let mut script = Vec::with_capacity(3 + keys.len() * 34 + 2);
    push_number(&mut script, threshold);
    for key in keys {
        script.push(OP_PUSHBYTES33);
        script.extend_from_slice(key.as_bytes());
    }
    push_number(&mut script, keys.len());
    script.push(OP_CHECKMULTISIG);
    Ok(script)
}

/// Build an invocation script pushing the given signatures in order
pub fn invocation_script(signatures: &[Signature]) -> Vec<u8> {
    let mut script = Vec::with_capacity(signatures.len() * 65);
    for signature in signatures {
        script.push(OP_PUSHBYTES64);
        script.extend_from_slice(signature.as_bytes());
    }
    script
}

/// Split an invocation script back into its signatures
pub fn parse_invocation(script: &[u8]) -> Result<Vec<Signature>, ScriptError> {
    if script.len() % 65 != 0 {
        return Err(ScriptError::MalformedInvocation);
    }
    script
        .chunks(65)
        .map(|chunk| {
            if chunk[0] != OP_PUSHBYTES64 {
                return Err(ScriptError::MalformedInvocation);
            }
            Signature::from_slice(&chunk[1..]).ok_or(ScriptError::MalformedInvocation)
        })
        .collect()
}

// =============================================================================
// Witness Verification
// =============================================================================

/// Check an invocation script against a verification script for `hash`
///
/// The invocation must carry exactly `threshold` signatures, ordered like
/// their keys in the verification script.
pub fn verify_witness(
    invocation: &[u8],
    verification: &[u8],
    hash: &Hash256,
) -> Result<(), ScriptError> {
    let kind = classify(verification)?;
    let signatures = parse_invocation(invocation)?;

    if signatures.len() != kind.threshold() {
        return Err(ScriptError::SignatureCount {
            expected: kind.threshold(),
            got: signatures.len(),
        });
    }

    let keys = kind.keys();
    let mut key_pos = 0;
    for signature in &signatures {
        loop {
            // Not enough keys left for the remaining signatures
            let key = keys.get(key_pos).ok_or(ScriptError::VerificationFailed)?;
            key_pos += 1;
            if verify_signature(key, hash, signature) {
                break;
            }
        }
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{double_sha256, KeyPair};

    fn sorted_keys(n: usize) -> Vec<KeyPair> {
        let mut pairs: Vec<KeyPair> = (0..n).map(|_| KeyPair::generate()).collect();
        pairs.sort_by_key(|k| k.public_key());
        pairs
    }

    #[test]
    fn test_classify_single_signature() {
        let kp = KeyPair::generate();
        let script = single_signature_script(&kp.public_key());
        let kind = classify(&script).unwrap();
        assert_eq!(kind, ScriptKind::SingleSignature { key: kp.public_key() });
        assert_eq!(kind.threshold(), 1);
        assert_eq!(kind.keys(), &[kp.public_key()]);
    }

    #[test]
    fn test_classify_multisig_preserves_key_order() {
        let pairs = sorted_keys(3);
        let keys: Vec<PubKey> = pairs.iter().rev().map(|k| k.public_key()).collect();
        let script = multisig_script(2, &keys).unwrap();

        let kind = classify(&script).unwrap();
        assert_eq!(kind.threshold(), 2);
        assert_eq!(kind.keys(), keys.as_slice());
        assert_eq!(kind.description(), "2-of-3");
    }

    #[test]
    fn test_classify_large_multisig_uses_pushbytes() {
        let pairs = sorted_keys(18);
        let keys: Vec<PubKey> = pairs.iter().map(|k| k.public_key()).collect();
        let script = multisig_script(17, &keys).unwrap();
        assert_eq!(script[0], OP_PUSHBYTES1);

        let kind = classify(&script).unwrap();
        assert_eq!(kind.threshold(), 17);
        assert_eq!(kind.keys().len(), 18);
    }

    #[test]
    fn test_classify_rejects_unknown_templates() {
        assert_eq!(classify(&[]), Err(ScriptError::UnrecognizedScript));
        assert_eq!(classify(&[OP_CHECKSIG]), Err(ScriptError::UnrecognizedScript));

        let kp = KeyPair::generate();
        let mut script = single_signature_script(&kp.public_key());
        script.push(0x00);
        assert_eq!(classify(&script), Err(ScriptError::UnrecognizedScript));

        // Declared key count disagrees with embedded keys
        let pairs = sorted_keys(2);
        let keys: Vec<PubKey> = pairs.iter().map(|k| k.public_key()).collect();
        let mut script = multisig_script(1, &keys).unwrap();
        let n_pos = script.len() - 2;
        script[n_pos] = OP_1 + 2;
        assert_eq!(classify(&script), Err(ScriptError::UnrecognizedScript));
    }

    #[test]
    fn test_multisig_script_validation() {
        let pairs = sorted_keys(2);
        let keys: Vec<PubKey> = pairs.iter().map(|k| k.public_key()).collect();
        assert!(multisig_script(0, &keys).is_err());
        assert!(multisig_script(3, &keys).is_err());
        assert_eq!(
            multisig_script(1, &[keys[0], keys[0]]),
            Err(ScriptError::DuplicateKey)
        );
    }

    #[test]
    fn test_invocation_round_trip() {
        let kp = KeyPair::generate();
        let hash = double_sha256(b"tx");
        let sigs = vec![kp.sign(&hash).unwrap(), kp.sign(&double_sha256(b"other")).unwrap()];
        let script = invocation_script(&sigs);
        assert_eq!(parse_invocation(&script).unwrap(), sigs);
        assert_eq!(
            parse_invocation(&script[..64]),
            Err(ScriptError::MalformedInvocation)
        );
    }

    #[test]
    fn test_verify_multisig_witness_requires_script_order() {
        let pairs = sorted_keys(3);
        let keys: Vec<PubKey> = pairs.iter().map(|k| k.public_key()).collect();
        let verification = multisig_script(2, &keys).unwrap();
        let hash = double_sha256(b"spend");

        let sig_a = pairs[0].sign(&hash).unwrap();
        let sig_c = pairs[2].sign(&hash).unwrap();

        let ordered = invocation_script(&[sig_a, sig_c]);
        assert!(verify_witness(&ordered, &verification, &hash).is_ok());

        let reversed = invocation_script(&[sig_c, sig_a]);
        assert_eq!(
            verify_witness(&reversed, &verification, &hash),
            Err(ScriptError::VerificationFailed)
        );

        let short = invocation_script(&[sig_a]);
        assert!(matches!(
            verify_witness(&short, &verification, &hash),
            Err(ScriptError::SignatureCount { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_verify_single_witness_wrong_hash() {
        let kp = KeyPair::generate();
        let verification = single_signature_script(&kp.public_key());
        let sig = kp.sign(&double_sha256(b"a")).unwrap();
        let invocation = invocation_script(&[sig]);
        assert!(verify_witness(&invocation, &verification, &double_sha256(b"a")).is_ok());
        assert!(verify_witness(&invocation, &verification, &double_sha256(b"b")).is_err());
    }
}
