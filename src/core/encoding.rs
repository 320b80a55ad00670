//! Canonical binary encoding
//!
//! Blocks and transactions travel as bincode with fixed-width
//! little-endian integers. Decoding rejects trailing bytes and is bounded
//! so a hostile length prefix cannot trigger a huge allocation.

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

/// Upper bound on any single encoded object
pub const MAX_ENCODED_SIZE: u64 = 0x0200_0000;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_ENCODED_SIZE)
        .reject_trailing_bytes()
}

pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    options().serialize(value)
}

pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    options().deserialize(bytes)
}

/// Little-endian writer for hash preimages
///
/// Hash inputs are laid out by hand so hashing never depends on a
/// serializer and cannot fail.
#[derive(Debug, Default)]
pub struct HashWriter {
    buf: Vec<u8>,
}

impl HashWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64_le(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64_le(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixint_little_endian() {
        let bytes = to_bytes(&0x0102_0304u32).unwrap();
        assert_eq!(bytes, vec![0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = to_bytes(&7u64).unwrap();
        assert_eq!(from_bytes::<u64>(&bytes).unwrap(), 7);
        bytes.push(0);
        assert!(from_bytes::<u64>(&bytes).is_err());
    }

    #[test]
    fn test_rejects_oversized_length_prefix() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(from_bytes::<Vec<u8>>(&bytes).is_err());
    }

    #[test]
    fn test_hash_writer_layout() {
        let mut w = HashWriter::new();
        w.write_u8(1);
        w.write_u16_le(2);
        w.write_u32_le(3);
        w.write_bytes(&[9, 9]);
        assert_eq!(w.into_inner(), vec![1, 2, 0, 3, 0, 0, 0, 9, 9]);
    }
}
