//! Scoped-key codec: derives and verifies search-only credentials that
//! prove knowledge of a parent API key and carry embedded, tamper-evident
//! query parameters.
//!
//! Wire format (bit-exact, grounded on `auth_manager.cpp`'s
//! `authenticate_parse_params`): the base64 envelope wraps
//! `HMAC_SHA256_b64(parent_value, params_json) || parent_prefix[0..4] ||
//! params_json`. The HMAC digest is itself base64 text (44 bytes for a
//! 32-byte SHA-256 digest) embedded before the second, outer base64
//! encoding — this is why the digest slice below is ASCII text, not raw
//! bytes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of a base64-encoded SHA-256 digest (32 bytes -> 44 b64
/// chars including padding).
pub const HMAC_BASE64_LEN: usize = 44;

/// Length in bytes of an API key's lookup prefix.
pub const PREFIX_LEN: usize = 4;

/// Errors decoding or verifying a scoped key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopedKeyError {
    /// The token was not valid base64.
    #[error("scoped key is not valid base64")]
    InvalidBase64,
    /// The decoded payload was shorter than `HMAC_BASE64_LEN + PREFIX_LEN`.
    #[error("scoped key payload too short")]
    Malformed,
    /// The embedded params were not valid UTF-8.
    #[error("scoped key params are not valid UTF-8")]
    InvalidParamsEncoding,
}

/// A decoded, not-yet-verified scoped key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedScopedKey {
    /// The base64 text of the claimed HMAC digest (44 ASCII chars).
    pub digest_b64: String,
    /// The 4-char prefix used to look up candidate parent keys.
    pub prefix: String,
    /// The raw embedded-params JSON text, exactly as HMAC-covered — must
    /// not be re-serialized before verification.
    pub params_json: String,
}

/// Compute the base64 HMAC-SHA256 digest of `params_json` keyed by
/// `parent_value`.
pub fn hmac_digest_b64(parent_value: &str, params_json: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(parent_value.as_bytes()).expect("HMAC accepts any key length");
    mac.update(params_json.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Build a scoped key token for `parent_value` (the parent's full secret)
/// and `parent_prefix` (its first 4 characters) embedding `params_json`.
pub fn encode_scoped_key(parent_value: &str, parent_prefix: &str, params_json: &str) -> String {
    let digest = hmac_digest_b64(parent_value, params_json);
    let mut payload = String::with_capacity(digest.len() + parent_prefix.len() + params_json.len());
    payload.push_str(&digest);
    payload.push_str(parent_prefix);
    payload.push_str(params_json);
    BASE64.encode(payload.as_bytes())
}

/// Decode (but do not verify) a scoped-key token into its three parts.
pub fn decode_scoped_key(token: &str) -> Result<DecodedScopedKey, ScopedKeyError> {
    let payload = BASE64.decode(token).map_err(|_| ScopedKeyError::InvalidBase64)?;
    if payload.len() < HMAC_BASE64_LEN + PREFIX_LEN {
        return Err(ScopedKeyError::Malformed);
    }
    let payload = String::from_utf8(payload).map_err(|_| ScopedKeyError::InvalidParamsEncoding)?;
    let digest_b64 = payload[..HMAC_BASE64_LEN].to_string();
    let prefix = payload[HMAC_BASE64_LEN..HMAC_BASE64_LEN + PREFIX_LEN].to_string();
    let params_json = payload[HMAC_BASE64_LEN + PREFIX_LEN..].to_string();
    Ok(DecodedScopedKey {
        digest_b64,
        prefix,
        params_json,
    })
}

/// Verify `candidate.digest_b64` against the HMAC recomputed under
/// `parent_value`, in constant time over the 44-byte base64 digest text
/// (never the raw bytes), per the external-interoperability requirement.
pub fn verify_digest(candidate: &DecodedScopedKey, parent_value: &str) -> bool {
    let expected = hmac_digest_b64(parent_value, &candidate.params_json);
    if expected.len() != candidate.digest_b64.len() {
        return false;
    }
    expected.as_bytes().ct_eq(candidate.digest_b64.as_bytes()).into()
}
