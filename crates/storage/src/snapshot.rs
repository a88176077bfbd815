//! ClonedSnapshotView: MVP snapshot implementation via deep clone
//!
//! This module provides version-bounded views of storage for transaction isolation.
//! The MVP implementation creates a deep clone of the BTreeMap at snapshot time.
//!
//! # Design Notes
//!
//! - **Deep clone**: Expensive but correct for MVP (full BTreeMap copy)
//! - **Immutable**: Once created, the snapshot never changes
//! - **Thread-safe**: Can be safely shared across threads (Arc-wrapped data)
//! - **Version-bounded**: Only returns data visible at snapshot version
//!
//! # Future Optimization
//!
//! The `SnapshotView` trait abstraction allows replacing this with a lazy
//! implementation (LazySnapshotView) that reads from live storage with
//! version filtering, avoiding the clone cost.

use std::collections::BTreeMap;
use std::sync::Arc;

use meridian_core::{Key, Result, SnapshotView, VersionedValue};

use crate::stored_value::StoredValue;

/// A snapshot view that clones the entire BTreeMap
///
/// This is the MVP implementation - simple but expensive.
/// Creates an immutable point-in-time view of storage.
///
/// # Example
///
/// ```ignore
/// let store = UnifiedStore::new();
/// // ... write some data ...
/// let snapshot = store.create_snapshot();
///
/// // Writes after snapshot creation are not visible
/// store.put(key, value, None);
/// assert!(snapshot.get(&key).unwrap().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct ClonedSnapshotView {
    /// The version at which this snapshot was created
    version: u64,
    /// Deep clone of the storage data at snapshot time (includes TTL info)
    data: Arc<BTreeMap<Key, StoredValue>>,
}

impl ClonedSnapshotView {
    /// Create a new ClonedSnapshotView from existing data
    ///
    /// # Arguments
    ///
    /// * `version` - The version at which the snapshot was created
    /// * `data` - The cloned BTreeMap data
    ///
    /// # Note
    ///
    /// This is typically called by `UnifiedStore::create_snapshot()`, not directly.
    pub fn new(version: u64, data: BTreeMap<Key, StoredValue>) -> Self {
        Self {
            version,
            data: Arc::new(data),
        }
    }
}

impl SnapshotView for ClonedSnapshotView {
    fn get(&self, key: &Key) -> Result<Option<VersionedValue>> {
        match self.data.get(key) {
            Some(sv) if sv.version().as_u64() <= self.version && !sv.is_expired() => {
                Ok(Some(sv.versioned().clone()))
            }
            _ => Ok(None),
        }
    }

    fn scan_prefix(&self, prefix: &Key) -> Result<Vec<(Key, VersionedValue)>> {
        let results: Vec<(Key, VersionedValue)> = self
            .data
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, sv)| sv.version().as_u64() <= self.version && !sv.is_expired())
            .map(|(k, sv)| (k.clone(), sv.versioned().clone()))
            .collect();

        Ok(results)
    }

    fn version(&self) -> u64 {
        self.version
    }
}
