//! Core traits for storage and snapshot abstraction
//!
//! This module defines the Storage and SnapshotView traits that enable
//! swapping implementations without breaking upper layers.

// Note: We use () as placeholder for error type until Story #10 implements proper error types
#![allow(clippy::result_unit_err)]

use std::time::Duration;

/// Storage abstraction for unified backend
///
/// This trait enables replacing the MVP BTreeMap+RwLock implementation
/// with sharded, lock-free, or distributed storage without breaking
/// upper layers (concurrency, primitives, engine).
///
/// Thread safety: All methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync).
///
/// # Examples
///
/// ```
/// use meridian_core::traits::Storage;
/// // Storage implementations will be added in Epic 2
/// ```
pub trait Storage: Send + Sync {
    /// Get current value for key (latest version)
    ///
    /// Returns None if key doesn't exist or is expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn get(&self, key: &Key) -> Result<Option<VersionedValue>>;

    /// Get value at or before specified version (for snapshot isolation)
    ///
    /// This enables creating snapshots without cloning the entire store.
    /// Returns the latest version <= max_version.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn get_versioned(&self, key: &Key, max_version: u64) -> Result<Option<VersionedValue>>;

    /// Put key-value pair with optional TTL
    ///
    /// Returns the version assigned to this write.
    /// Version is monotonically increasing and assigned by storage layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn put(&self, key: Key, value: Value, ttl: Option<Duration>) -> Result<u64>;

    /// Delete key
    ///
    /// Returns the deleted value if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn delete(&self, key: &Key) -> Result<Option<VersionedValue>>;

    /// Scan keys with given prefix at or before max_version
    ///
    /// Results are sorted by key order (namespace → type_tag → user_key).
    /// Used for range queries and namespace scans.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn scan_prefix(&self, prefix: &Key, max_version: u64) -> Result<Vec<(Key, VersionedValue)>>;

    /// Scan all keys for a given run_id at or before max_version
    ///
    /// Critical for replay: fetch all writes for a specific run.
    /// Results are sorted by key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn scan_by_run(&self, run_id: RunId, max_version: u64) -> Result<Vec<(Key, VersionedValue)>>;

    /// Get current global version
    ///
    /// Returns the highest version assigned so far.
    /// Used for creating snapshots at current version.
    fn current_version(&self) -> u64;
}

/// Snapshot view abstraction for snapshot isolation
///
/// Provides version-bounded read view of storage.
/// MVP: ClonedSnapshotView (deep clone at version)
/// Future: LazySnapshotView (version-bounded reads from live storage)
///
/// Thread safety: Must be safe to pass between threads (Send + Sync).
///
/// # Examples
///
/// ```
/// use meridian_core::traits::SnapshotView;
/// // SnapshotView implementations will be added in Epic 2
/// ```
pub trait SnapshotView: Send + Sync {
    /// Get value from snapshot
    ///
    /// Returns value as it existed at snapshot version.
    /// Returns None if key didn't exist at that version.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn get(&self, key: &Key) -> Result<Option<VersionedValue>>;

    /// Scan keys with prefix from snapshot
    ///
    /// Returns all matching keys as they existed at snapshot version.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn scan_prefix(&self, prefix: &Key) -> Result<Vec<(Key, VersionedValue)>>;

    /// Get snapshot version
    ///
    /// Returns the version this snapshot was created at.
    fn version(&self) -> u64;
}

// Type aliases for convenience (these types will be defined in other stories)
// For now, we use placeholder types that will be replaced when the actual types are implemented

/// Placeholder for Key type (will be defined in Story #8)
pub type Key = ();

/// Placeholder for Value type (will be defined in Story #9)
pub type Value = ();

/// Placeholder for VersionedValue type (will be defined in Story #9)
pub type VersionedValue = ();

/// Placeholder for RunId type (will be defined in Story #7)
pub type RunId = ();

/// Placeholder for Result type (will be defined in Story #10)
pub type Result<T> = std::result::Result<T, ()>;
