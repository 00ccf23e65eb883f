//! Signed init-data verification.
//!
//! The mini-app hands every request an opaque token minted by the messaging
//! platform: URL-encoded key/value claims plus a keyed-hash signature. The
//! verifier recomputes the signature from the shared bot token and rejects
//! anything that does not match, byte for byte, in constant time.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::BTreeMap;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Fixed key literal the platform uses to derive the per-bot signing key.
const KEY_DERIVATION_LITERAL: &[u8] = b"WebAppData";

/// Why verification failed.
///
/// Internal only: the API surface collapses every variant into one uniform
/// authentication failure so callers learn nothing about which check tripped.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed init data")]
    Malformed,
    #[error("missing signature field")]
    MissingSignature,
    #[error("missing or malformed user claim")]
    MissingUser,
    #[error("signature mismatch")]
    SignatureMismatch,
}

/// The identity embedded in a verified token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaim {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl IdentityClaim {
    /// Display name as the platform renders it.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Verify a signed init-data token and extract the embedded identity claim.
///
/// Algorithm: decode the token's key/value pairs, pull out the `hash` field,
/// join the remaining pairs sorted by key as `key=value` lines, then check
/// HMAC-SHA256(derived key, canonical string) against the provided hex
/// signature. The derived key is HMAC-SHA256(`"WebAppData"`, bot token).
pub fn verify_init_data(raw: &str, bot_token: &str) -> Result<IdentityClaim, AuthError> {
    // BTreeMap keeps the pairs sorted lexicographically by key, which is
    // exactly the order the canonical string requires.
    let mut pairs: BTreeMap<String, String> = BTreeMap::new();
    for field in raw.split('&') {
        let (key, value) = field.split_once('=').ok_or(AuthError::Malformed)?;
        let key = urlencoding::decode(key).map_err(|_| AuthError::Malformed)?;
        let value = urlencoding::decode(value).map_err(|_| AuthError::Malformed)?;
        pairs.insert(key.into_owned(), value.into_owned());
    }

    let provided = pairs.remove("hash").ok_or(AuthError::MissingSignature)?;
    let signature = hex::decode(&provided).map_err(|_| AuthError::SignatureMismatch)?;

    let check_string = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    let mut mac =
        HmacSha256::new_from_slice(KEY_DERIVATION_LITERAL).map_err(|_| AuthError::Malformed)?;
    mac.update(bot_token.as_bytes());
    let secret = mac.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(&secret).map_err(|_| AuthError::Malformed)?;
    mac.update(check_string.as_bytes());
    // verify_slice is constant-time; no short-circuit on the first bad byte.
    mac.verify_slice(&signature)
        .map_err(|_| AuthError::SignatureMismatch)?;

    let user_json = pairs.get("user").ok_or(AuthError::MissingUser)?;
    serde_json::from_str(user_json).map_err(|_| AuthError::MissingUser)
}
