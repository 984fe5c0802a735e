//! HMAC-SHA256 tokens keyed by the shared network secret.
//!
//! Tokens travel as lowercase hex. Verification decodes the hex and compares
//! MACs in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `message` under `key`.
pub fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> Result<String, CryptoError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex-encoded HMAC-SHA256 tag in constant time.
///
/// Malformed hex never verifies.
pub fn verify_hmac_sha256_hex(key: &[u8], message: &[u8], tag_hex: &str) -> bool {
    let Ok(tag) = hex::decode(tag_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&tag).is_ok()
}

/// Handshake token: `HMAC(secret, "{uuid}:{timestamp}:{challenge}")`.
///
/// `timestamp` is the wire rendering of the timestamp field, see
/// [`crate::format_number`].
pub fn auth_token(
    secret: &[u8],
    node_uuid: &str,
    timestamp: &str,
    challenge: &str,
) -> Result<String, CryptoError> {
    hmac_sha256_hex(secret, format!("{node_uuid}:{timestamp}:{challenge}").as_bytes())
}

/// A fresh, unpredictable challenge string.
pub fn random_challenge() -> String {
    uuid::Uuid::new_v4().to_string()
}
