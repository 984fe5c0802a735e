//! SHA-256 hashing for gossip deduplication.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::canonical_json;

/// Compute the SHA-256 digest of arbitrary data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a JSON payload independently of key order and whitespace.
pub fn content_hash(value: &Value) -> [u8; 32] {
    sha256(canonical_json(value).as_bytes())
}
