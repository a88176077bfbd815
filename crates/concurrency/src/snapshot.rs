//! Snapshot isolation for OCC transactions
//!
//! This module provides snapshot implementations for transactions.
//! M2 uses `ClonedSnapshotView` (deep copy of data).
//!
//! # Snapshot Isolation Guarantees
//!
//! From `docs/architecture/M2_TRANSACTION_SEMANTICS.md`:
//!
//! **What a Snapshot ALWAYS Provides** (Section 2.1):
//! - Committed data as of `start_version`
//! - Consistent point-in-time view
//! - Repeatable reads (same key returns same value)
//!
//! **What a Snapshot NEVER Shows** (Section 2.2):
//! - Writes committed AFTER `start_version`
//! - Uncommitted writes from other transactions
//! - Partial writes
//!
//! # Future Optimization
//!
//! The `SnapshotView` trait (defined in `meridian_core::traits`) enables
//! future implementations like `LazySnapshotView` that read from live
//! storage with version bounds, avoiding the clone overhead.

use meridian_core::error::Result;
use meridian_core::traits::SnapshotView;
use meridian_core::types::Key;
use meridian_core::value::VersionedValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// M2 Implementation: Clone-based snapshot
///
/// Creates an immutable, isolated view of storage by cloning the data
/// at snapshot creation time.
///
/// # Known Limitations (Acceptable for M2)
///
/// - **Memory**: O(data_size) per active transaction
/// - **Time**: O(data_size) per snapshot creation
///
/// # Why This is Acceptable for M2
///
/// - Agent workloads have small working sets (<100MB typical)
/// - Transactions are short-lived (<1 second)
/// - Simplicity enables correctness validation
/// - The `SnapshotView` trait abstraction enables future optimization
///
/// # Future Optimization: LazySnapshotView
///
/// M3+ may implement `LazySnapshotView` that:
/// - Reads from live storage with version bounds
/// - Has O(1) creation time and memory
/// - Trades read latency for snapshot creation cost
///
/// # Example
///
/// ```
/// use meridian_concurrency::snapshot::ClonedSnapshotView;
/// use meridian_core::traits::SnapshotView;
/// use std::collections::BTreeMap;
///
/// // Create empty snapshot
/// let snapshot = ClonedSnapshotView::empty(100);
/// assert_eq!(snapshot.version(), 100);
/// assert!(snapshot.is_empty());
/// ```
pub struct ClonedSnapshotView {
    /// The snapshot version (global version at creation time)
    version: u64,
    /// Immutable clone of storage data
    data: Arc<BTreeMap<Key, VersionedValue>>,
}

impl ClonedSnapshotView {
    /// Create a new snapshot by taking ownership of the provided data
    ///
    /// # Arguments
    /// * `version` - The snapshot version (global version at creation time)
    /// * `data` - The data for this snapshot
    ///
    /// # Performance
    /// This wraps the data in an Arc, which is O(1).
    /// The actual cloning cost is paid by the caller when preparing the data.
    pub fn new(version: u64, data: BTreeMap<Key, VersionedValue>) -> Self {
        ClonedSnapshotView {
            version,
            data: Arc::new(data),
        }
    }

    /// Create a snapshot from an existing Arc (for sharing between snapshots)
    ///
    /// This is useful when multiple transactions need the same snapshot data.
    pub fn from_arc(version: u64, data: Arc<BTreeMap<Key, VersionedValue>>) -> Self {
        ClonedSnapshotView { version, data }
    }

    /// Create an empty snapshot at a given version
    ///
    /// Useful for testing or for transactions that start with no data.
    pub fn empty(version: u64) -> Self {
        ClonedSnapshotView {
            version,
            data: Arc::new(BTreeMap::new()),
        }
    }

    /// Get the number of keys in the snapshot
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a reference to the underlying data (for testing/debugging)
    #[cfg(test)]
    pub fn data(&self) -> &BTreeMap<Key, VersionedValue> {
        &self.data
    }
}

impl SnapshotView for ClonedSnapshotView {
    fn get(&self, key: &Key) -> Result<Option<VersionedValue>> {
        // Simple lookup - data is already filtered to snapshot version
        Ok(self.data.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &Key) -> Result<Vec<(Key, VersionedValue)>> {
        // Use Key::starts_with for prefix matching
        // BTreeMap iteration is ordered, so results are sorted
        let results: Vec<(Key, VersionedValue)> = self
            .data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(results)
    }

    fn version(&self) -> u64 {
        self.version
    }
}
