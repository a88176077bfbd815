//! Storage-layer value wrapper with TTL support
//!
//! The contract type `Versioned<T>` doesn't include TTL because TTL is
//! a storage concern, not a contract concern. This module provides
//! `StoredValue` which combines a `VersionedValue` with optional TTL
//! for the storage layer.

use std::time::Duration;

use meridian_core::{Timestamp, Value, Version, VersionedValue};

/// A stored value with optional TTL
///
/// Wraps `VersionedValue` with TTL metadata for the storage layer.
/// This separation keeps TTL as a storage concern, not part of the
/// contract types.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    /// The versioned value (value + version + timestamp)
    inner: VersionedValue,
    /// Optional time-to-live
    ttl: Option<Duration>,
}

impl StoredValue {
    /// Create a new stored value with TTL
    pub fn new(value: Value, version: Version, ttl: Option<Duration>) -> Self {
        StoredValue {
            inner: VersionedValue::new(value, version),
            ttl,
        }
    }

    /// Create a stored value with explicit timestamp
    pub fn with_timestamp(
        value: Value,
        version: Version,
        timestamp: Timestamp,
        ttl: Option<Duration>,
    ) -> Self {
        StoredValue {
            inner: VersionedValue::with_timestamp(value, version, timestamp),
            ttl,
        }
    }

    /// Create from a VersionedValue without TTL
    pub fn from_versioned(vv: VersionedValue) -> Self {
        StoredValue {
            inner: vv,
            ttl: None,
        }
    }

    /// Create from a VersionedValue with TTL
    pub fn from_versioned_with_ttl(vv: VersionedValue, ttl: Option<Duration>) -> Self {
        StoredValue { inner: vv, ttl }
    }

    /// Get the inner VersionedValue
    #[inline]
    pub fn versioned(&self) -> &VersionedValue {
        &self.inner
    }

    /// Consume and return the inner VersionedValue
    #[inline]
    pub fn into_versioned(self) -> VersionedValue {
        self.inner
    }

    /// Get the value
    #[inline]
    pub fn value(&self) -> &Value {
        &self.inner.value
    }

    /// Get the version
    #[inline]
    pub fn version(&self) -> Version {
        self.inner.version
    }

    /// Get the timestamp
    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.inner.timestamp
    }

    /// Get the TTL
    #[inline]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Check if this value has expired
    pub fn is_expired(&self) -> bool {
        if let Some(ttl) = self.ttl {
            let now = Timestamp::now();
            if let Some(age) = now.duration_since(self.inner.timestamp) {
                return age >= ttl;
            }
        }
        false
    }

    /// Calculate the expiry timestamp
    ///
    /// Returns `Some(timestamp)` when the value will expire, or `None` if no TTL.
    pub fn expiry_timestamp(&self) -> Option<Timestamp> {
        self.ttl
            .map(|ttl| self.inner.timestamp.saturating_add(ttl))
    }
}

impl From<StoredValue> for VersionedValue {
    fn from(sv: StoredValue) -> Self {
        sv.inner
    }
}
