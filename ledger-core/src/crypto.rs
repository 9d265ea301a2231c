//! Hashing for the event log and snapshots
//!
//! This module provides:
//! - SHA-256 hashing of arbitrary bytes
//! - Chained record hashes for the append-only event log
//! - Snapshot digests

use sha2::{Digest, Sha256};

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a log record's canonical bytes onto its predecessor's hash
pub fn chain_hash(prev_hash: &[u8; 32], record_bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update((record_bytes.len() as u64).to_be_bytes());
    hasher.update(record_bytes);
    hasher.finalize().into()
}

/// Hex-encoded digest, for logs and snapshot headers
pub fn digest_hex(data: &[u8]) -> String {
    hex::encode(hash_bytes(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"job-1 delivered";
        assert_eq!(hash_bytes(data), hash_bytes(data));
        assert_ne!(hash_bytes(data), hash_bytes(b"job-2 delivered"));
    }

    #[test]
    fn test_chain_hash_depends_on_predecessor() {
        let record = b"record";
        let a = chain_hash(&[0u8; 32], record);
        let b = chain_hash(&[1u8; 32], record);
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_hex_length() {
        assert_eq!(digest_hex(b"").len(), 64);
        assert_eq!(
            digest_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
