//! Wire-format codecs: the scoped-key HMAC derivation used by
//! `meridian-security`'s `AuthManager`, and the streaming gzip reader used
//! for chunked import bodies.

pub mod gzip;
pub mod scoped_key;

pub use gzip::{GzipChunkError, GzipChunkReader};
pub use scoped_key::{
    decode_scoped_key, encode_scoped_key, hmac_digest_b64, verify_digest, DecodedScopedKey, ScopedKeyError,
    HMAC_BASE64_LEN, PREFIX_LEN,
};
