//! SHA-256 helpers and the wire CRC-16.
//!
//! All hashing is deterministic across platforms; the sha2 crate provides
//! the audited SHA-256 implementation.

use sha2::{Digest, Sha256};

/// Compute SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute SHA-256 of multiple byte slices (concatenated).
pub fn sha256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection.
///
/// Used as the replication delta checksum; the 5-digit wire field holds
/// any 16-bit value.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // echo -n "hello world" | sha256sum
        let hash = sha256(b"hello world");
        assert_eq!(
            hex::encode(hash),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha256_multi_matches_concat() {
        let multi = sha256_multi(&[b"hello", b" ", b"world"]);
        assert_eq!(multi, sha256(b"hello world"));
    }

    #[test]
    fn test_crc16_check_value() {
        // Standard CCITT-FALSE check input
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_crc16_empty() {
        assert_eq!(crc16(b""), 0xFFFF);
    }
}
