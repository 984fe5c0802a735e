//! Cryptographic primitives for the beacon network.
//!
//! - **HMAC-SHA256** for handshake authentication tokens and message signatures
//! - **SHA-256** content hashes for gossip deduplication
//! - A canonical JSON serializer so signer and verifier hash identical bytes

pub mod canonical;
pub mod error;
pub mod hash;
pub mod mac;

pub use canonical::{canonical_json, format_number};
pub use error::CryptoError;
pub use hash::{content_hash, sha256};
pub use mac::{auth_token, hmac_sha256_hex, random_challenge, verify_hmac_sha256_hex};
