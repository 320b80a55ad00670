//! Merkle root calculation for block transaction lists

use super::hash::{double_sha256, Hash256};

/// Calculate the merkle root from a list of transaction hashes
///
/// Odd levels duplicate their last hash; an empty list hashes to zero.
pub fn calculate_merkle_root(hashes: &[Hash256]) -> Hash256 {
    if hashes.is_empty() {
        return Hash256::ZERO;
    }

    let mut current_level: Vec<Hash256> = hashes.to_vec();

    while current_level.len() > 1 {
        current_level = current_level
            .chunks(2)
            .map(|chunk| {
                let left = chunk[0];
                let right = chunk.get(1).copied().unwrap_or(left);
                let mut data = [0u8; 64];
                data[..32].copy_from_slice(left.as_bytes());
                data[32..].copy_from_slice(right.as_bytes());
                double_sha256(&data)
            })
            .collect();
    }

    current_level[0]
}
