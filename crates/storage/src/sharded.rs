//! Sharded storage performance
//!
//! Replaces RwLock + BTreeMap with DashMap + HashMap.
//! Lock-free reads, sharded writes, O(1) lookups.
//!
//! # Design
//!
//! - DashMap: 16-way sharded by default, lock-free reads
//! - FxHashMap: O(1) lookups, fast non-crypto hash
//! - Per-BranchId: Natural agent partitioning, no cross-branch contention
//!
//! # Performance Targets
//!
//! - get(): Lock-free via DashMap
//! - put(): Only locks target shard
//! - Snapshot acquisition: < 500ns
//! - Different branches: Never contend
//!
//! # Storage vs Contract Types
//!
//! - `StoredValue`: Internal storage type that includes TTL (storage concern)
//! - `VersionedValue`: Contract type returned to callers (no TTL)
//!
//! # Version Handling
//!
//! The storage layer uses raw `u64` for version comparisons because:
//! 1. All versions in storage are `Version::Txn` variants (transaction versions)
//! 2. Raw u64 comparison is correct for same-variant versions
//! 3. The `Version::Ord` implementation compares discriminant first, ensuring
//!    cross-variant comparisons are safe (though they shouldn't occur here)
//! 4. Performance: Avoiding enum matching on every comparison

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use meridian_core::types::{BranchId, Key};
use meridian_core::{Timestamp, Version, VersionedValue};

use crate::stored_value::StoredValue;

/// Per-branch shard containing branch's data
///
/// Version chain for MVCC - stores multiple versions of a value
///
/// Versions are stored in descending order (newest first) for efficient
/// snapshot reads - we typically want the most recent version <= snapshot_version.
///
/// # Performance
///
/// Uses VecDeque for O(1) push_front instead of SmallVec's O(n) insert(0, ...).
/// This is critical for workloads that repeatedly update the same key (like CAS).
#[derive(Debug, Clone)]
pub struct VersionChain {
    /// Versions stored newest-first for efficient MVCC reads
    /// VecDeque provides O(1) push_front for new versions
    /// Uses StoredValue to include TTL information
    versions: VecDeque<StoredValue>,
}

impl VersionChain {
    /// Create a new version chain with a single version
    pub fn new(value: StoredValue) -> Self {
        let mut versions = VecDeque::with_capacity(4);
        versions.push_front(value);
        Self { versions }
    }

    /// Add a new version (must be newer than existing versions)
    ///
    /// O(1) operation using VecDeque::push_front
    #[inline]
    pub fn push(&mut self, value: StoredValue) {
        // O(1) insert at front (newest first)
        self.versions.push_front(value);
    }

    /// Get the version at or before the given max_version
    ///
    /// Note: Uses raw u64 comparison since all storage versions are TxnId variants.
    /// Debug assertions verify this invariant.
    pub fn get_at_version(&self, max_version: u64) -> Option<&StoredValue> {
        // Debug assertion: all versions should be Txn variants
        debug_assert!(
            self.versions.iter().all(|sv| sv.version().is_txn()),
            "Storage layer should only contain Txn versions"
        );
        // Versions are newest-first, so we scan until we find one <= max_version
        self.versions
            .iter()
            .find(|sv| sv.version().as_u64() <= max_version)
    }

    /// Get the latest version
    #[inline]
    pub fn latest(&self) -> Option<&StoredValue> {
        self.versions.front()
    }

    /// Remove versions older than min_version (garbage collection)
    /// Keeps at least one version.
    /// Returns the number of pruned versions.
    pub fn gc(&mut self, min_version: u64) -> usize {
        if self.versions.len() <= 1 {
            return 0;
        }
        let mut pruned = 0;
        // Keep versions >= min_version, but always keep at least the latest
        // Versions are newest-first, so pop from back (oldest)
        while self.versions.len() > 1 {
            if let Some(oldest) = self.versions.back() {
                if oldest.version().as_u64() < min_version {
                    self.versions.pop_back();
                    pruned += 1;
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        pruned
    }

    /// Number of versions stored
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// Get version history (newest first)
    ///
    /// Returns versions in descending order (newest first).
    /// Optionally limited and filtered by `before_version`.
    ///
    /// # Arguments
    /// * `limit` - Maximum versions to return (None = all)
    /// * `before_version` - Only return versions older than this (exclusive, for pagination)
    ///
    /// # Returns
    /// Vector of StoredValue references, newest first
    pub fn history(&self, limit: Option<usize>, before_version: Option<u64>) -> Vec<&StoredValue> {
        // Debug assertion: all versions should be Txn variants
        debug_assert!(
            self.versions.iter().all(|sv| sv.version().is_txn()),
            "Storage layer should only contain Txn versions"
        );

        let iter = self.versions.iter();

        // Filter by before_version if specified (only versions < before)
        let filtered: Vec<&StoredValue> = match before_version {
            Some(before) => iter.filter(|sv| sv.version().as_u64() < before).collect(),
            None => iter.collect(),
        };

        // Apply limit if specified
        match limit {
            Some(n) => filtered.into_iter().take(n).collect(),
            None => filtered,
        }
    }

    /// Check if the version chain is empty
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Each BranchId gets its own shard with an FxHashMap for O(1) lookups.
/// This ensures different branches never contend with each other.
///
/// Uses VersionChain for MVCC - multiple versions per key for snapshot isolation.
#[derive(Debug)]
pub struct Shard {
    /// HashMap with FxHash for O(1) lookups, storing version chains
    pub(crate) data: FxHashMap<Key, VersionChain>,
    /// Sorted index of all keys for O(log n + k) prefix scans
    pub(crate) ordered_keys: BTreeSet<Key>,
}

impl Shard {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self {
            data: FxHashMap::default(),
            ordered_keys: BTreeSet::new(),
        }
    }

    /// Create a shard with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            ordered_keys: BTreeSet::new(),
        }
    }

    /// Iterate keys matching a prefix using BTreeSet range scan.
    ///
    /// O(log n) seek + O(k) iteration where k = number of matching keys.
    fn keys_with_prefix<'a>(&'a self, prefix: &'a Key) -> impl Iterator<Item = &'a Key> {
        self.ordered_keys
            .range::<Key, _>(prefix..)
            .take_while(move |k| k.starts_with(prefix))
    }

    /// Get number of keys in this shard
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if shard is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for Shard {
    fn default() -> Self {
        Self::new()
    }
}

/// Sharded storage - DashMap by BranchId, HashMap within
///
/// # Design
///
/// - DashMap: 16-way sharded by default, lock-free reads
/// - FxHashMap: O(1) lookups, fast non-crypto hash
/// - Per-BranchId: Natural agent partitioning, no cross-branch contention
///
/// # Thread Safety
///
/// All operations are thread-safe:
/// - get(): Lock-free read via DashMap
/// - put(): Only locks the target branch's shard
/// - Different branches never contend
///
/// # Example
///
/// ```ignore
/// use meridian_storage::ShardedStore;
/// use std::sync::Arc;
///
/// let store = Arc::new(ShardedStore::new());
/// let snapshot = store.snapshot();
/// ```
pub struct ShardedStore {
    /// Per-branch shards using DashMap
    shards: DashMap<BranchId, Shard>,
    /// Global version for snapshots
    version: AtomicU64,
}

impl ShardedStore {
    /// Create new sharded store
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
            version: AtomicU64::new(0),
        }
    }

    /// Create with expected number of branches
    pub fn with_capacity(num_branches: usize) -> Self {
        Self {
            shards: DashMap::with_capacity(num_branches),
            version: AtomicU64::new(0),
        }
    }

    /// Get current version
    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Increment version and return new value
    ///
    /// Uses wrapping arithmetic to prevent panic at u64::MAX.
    /// In practice, overflow is extremely unlikely (~584 years at 1B versions/sec).
    #[inline]
    pub fn next_version(&self) -> u64 {
        // Use fetch_update with wrapping_add to prevent overflow panic in debug mode
        self.version
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.wrapping_add(1))
            })
            .unwrap() // fetch_update with Some always succeeds
            .wrapping_add(1)
    }

    /// Set version (used during recovery)
    pub fn set_version(&self, version: u64) {
        self.version.store(version, Ordering::Release);
    }

    /// Get number of shards (branches)
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Check if a branch exists
    pub fn has_branch(&self, branch_id: &BranchId) -> bool {
        self.shards.contains_key(branch_id)
    }

    /// Get total number of entries across all shards
    pub fn total_entries(&self) -> usize {
        self.shards.iter().map(|entry| entry.value().len()).sum()
    }

    // ========================================================================
    // Get/Put/Delete Operations
    // ========================================================================

    // NOTE: `get()` is provided by the Storage trait implementation,
    // which includes proper TTL expiration checks.
    // Use `Storage::get()` trait method instead of an inherent method
    // to ensure consistent behavior across all callers.

    /// Put a value for a key (adds to version chain for MVCC)
    ///
    /// Sharded write - only locks this branch's shard.
    /// Other branches can read/write concurrently without contention.
    ///
    /// # Arguments
    ///
    /// * `key` - Key to store (contains BranchId)
    /// * `value` - StoredValue to store (includes TTL)
    ///
    /// # Performance
    ///
    /// - O(1) insert via FxHashMap
    /// - Only locks the target branch's shard
    #[inline]
    pub fn put(&self, key: Key, value: StoredValue) {
        let branch_id = key.namespace.branch_id;
        let mut shard = self.shards.entry(branch_id).or_default();

        if let Some(chain) = shard.data.get_mut(&key) {
            // Add new version to existing chain
            chain.push(value);
        } else {
            // Create new chain — also add to BTreeSet index
            shard.ordered_keys.insert(key.clone());
            shard.data.insert(key, VersionChain::new(value));
        }
    }

    /// Delete a key by adding a tombstone
    ///
    /// MVCC-safe delete: adds a tombstone (Value::Null) at a new version
    /// instead of removing all versions. This preserves old versions for
    /// snapshots that may still need them.
    ///
    /// # Arguments
    ///
    /// * `key` - Key to delete (contains BranchId)
    ///
    /// # Returns
    /// The previous value if it existed and wasn't already deleted
    #[inline]
    pub fn delete(&self, key: &Key) -> Option<VersionedValue> {
        let delete_version = self.next_version();
        // delete_with_version always succeeds, unwrap is safe
        self.delete_with_version(key, delete_version).unwrap()
    }

    /// Delete a key with a specific version (for batched deletes)
    ///
    /// Adds a tombstone at the specified version. Old versions are preserved
    /// for MVCC snapshot isolation.
    #[inline]
    pub fn delete_with_version(
        &self,
        key: &Key,
        version: u64,
    ) -> MeridianResult<Option<VersionedValue>> {
        use meridian_core::Version;

        let branch_id = key.namespace.branch_id;

        // Get the previous value before adding tombstone
        let previous = self.shards.get(&branch_id).and_then(|shard| {
            shard.data.get(key).and_then(|chain| {
                chain.latest().and_then(|sv| {
                    // Don't return tombstones as "previous value"
                    if sv.is_tombstone() {
                        None
                    } else {
                        Some(sv.versioned().clone())
                    }
                })
            })
        });

        // Add tombstone to version chain
        let tombstone = StoredValue::tombstone(Version::txn(version));
        self.put(key.clone(), tombstone);

        Ok(previous)
    }

    /// Check if a key exists (excluding tombstones)
    ///
    /// Lock-free check via DashMap read guard.
    /// Returns false for deleted keys (tombstones).
    #[inline]
    pub fn contains(&self, key: &Key) -> bool {
        let branch_id = key.namespace.branch_id;
        self.shards
            .get(&branch_id)
            .map(|shard| {
                shard.data.get(key).map_or(false, |chain| {
                    chain.latest().map_or(false, |sv| !sv.is_tombstone())
                })
            })
            .unwrap_or(false)
    }

    /// Apply a batch of writes and deletes atomically
    ///
    /// All operations in the batch are applied with the given version.
    ///
    /// # Arguments
    ///
    /// * `writes` - Key-value pairs to write
    /// * `deletes` - Keys to delete
    /// * `version` - Version to assign to all writes
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Always succeeds (for API compatibility with UnifiedStore)
    ///
    /// # Performance
    ///
    /// Captures timestamp once per batch instead of per-write to avoid
    /// repeated syscalls. All writes in a transaction share the same timestamp.
    pub fn apply_batch(
        &self,
        writes: &[(Key, meridian_core::value::Value)],
        deletes: &[Key],
        version: u64,
    ) -> meridian_core::MeridianResult<()> {
        use std::sync::atomic::Ordering;

        // Capture timestamp once for entire batch
        let timestamp = Timestamp::now();

        // Group writes and deletes by branch_id to apply atomically per branch.
        // This ensures concurrent readers never see partial transaction state
        // within a branch, since we hold the shard lock for the entire branch batch.
        let mut branch_ops: FxHashMap<BranchId, (Vec<(Key, StoredValue)>, Vec<Key>)> =
            FxHashMap::default();

        for (key, value) in writes {
            let stored =
                StoredValue::with_timestamp(value.clone(), Version::txn(version), timestamp, None);
            branch_ops
                .entry(key.namespace.branch_id)
                .or_insert_with(|| (Vec::new(), Vec::new()))
                .0
                .push((key.clone(), stored));
        }

        for key in deletes {
            branch_ops
                .entry(key.namespace.branch_id)
                .or_insert_with(|| (Vec::new(), Vec::new()))
                .1
                .push(key.clone());
        }

        // Apply atomically per branch (hold shard lock for entire branch batch)
        for (branch_id, (branch_writes, branch_deletes)) in branch_ops {
            let mut shard = self.shards.entry(branch_id).or_default();

            for (key, stored) in branch_writes {
                if let Some(chain) = shard.data.get_mut(&key) {
                    chain.push(stored);
                } else {
                    shard.ordered_keys.insert(key.clone());
                    shard.data.insert(key, VersionChain::new(stored));
                }
            }

            for key in branch_deletes {
                let tombstone = StoredValue::tombstone(Version::txn(version));
                if let Some(chain) = shard.data.get_mut(&key) {
                    chain.push(tombstone);
                } else {
                    shard.ordered_keys.insert(key.clone());
                    shard.data.insert(key, VersionChain::new(tombstone));
                }
            }
        }

        // Update global version to be at least this version
        // This ensures subsequent snapshots can see the committed data
        self.version.fetch_max(version, Ordering::AcqRel);

        Ok(())
    }

    /// Get count of entries for a specific branch
    pub fn branch_entry_count(&self, branch_id: &BranchId) -> usize {
        self.shards
            .get(branch_id)
            .map(|shard| shard.len())
            .unwrap_or(0)
    }

    /// Garbage-collect old versions from all entries for a given branch.
    ///
    /// Calls `VersionChain::gc(min_version)` on each entry in the branch's shard.
    /// Returns the total number of pruned versions.
    pub fn gc_branch(&self, branch_id: BranchId, min_version: u64) -> usize {
        let mut pruned = 0;
        if let Some(mut shard) = self.shards.get_mut(&branch_id) {
            for chain in shard.data.values_mut() {
                pruned += chain.gc(min_version);
            }
        }
        pruned
    }

    // ========================================================================
    // List Operations
    // ========================================================================

    /// List all entries for a branch
    ///
    /// Uses a two-phase approach to minimize shard lock hold time:
    /// 1. Collect matching keys under a brief shard read lock
    /// 2. Read values individually, allowing writers to interleave
    ///
    /// # Arguments
    ///
    /// * `branch_id` - The branch to list entries for
    ///
    /// # Returns
    ///
    /// Vector of (Key, VersionedValue) pairs, sorted by key
    pub fn list_branch(&self, branch_id: &BranchId) -> Vec<(Key, VersionedValue)> {
        // Phase 1: Collect matching keys from BTreeSet (already sorted)
        let keys: Vec<Key> = self
            .shards
            .get(branch_id)
            .map(|shard| {
                shard
                    .ordered_keys
                    .iter()
                    .filter(|k| {
                        shard
                            .data
                            .get(*k)
                            .and_then(|chain| chain.latest())
                            .map_or(false, |sv| !sv.is_tombstone())
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Shard lock released here

        // Phase 2: Read values individually (brief lock per read)
        // Results are already sorted — BTreeSet iteration order
        keys.into_iter()
            .filter_map(|key| {
                self.shards.get(branch_id).and_then(|shard| {
                    shard.data.get(&key).and_then(|chain| {
                        chain.latest().and_then(|sv| {
                            if !sv.is_tombstone() {
                                Some((key, sv.versioned().clone()))
                            } else {
                                None
                            }
                        })
                    })
                })
            })
            .collect()
    }

    /// List entries matching a key prefix
    ///
    /// Returns all entries where `key.starts_with(prefix)`.
    /// The prefix key determines namespace, type_tag, and user_key prefix.
    ///
    /// NOTE: Requires filter + sort, O(n) where n = shard size.
    /// Use sparingly; not for hot path operations.
    ///
    /// # Arguments
    ///
    /// * `prefix` - Prefix key to match (namespace + type_tag + user_key prefix)
    ///
    /// # Returns
    ///
    /// Vector of (Key, VersionedValue) pairs matching prefix, sorted by key
    pub fn list_by_prefix(&self, prefix: &Key) -> Vec<(Key, VersionedValue)> {
        let branch_id = prefix.namespace.branch_id;

        // Phase 1: Collect matching keys via BTreeSet range scan (already sorted)
        let keys: Vec<Key> = self
            .shards
            .get(&branch_id)
            .map(|shard| {
                shard
                    .keys_with_prefix(prefix)
                    .filter(|k| {
                        shard
                            .data
                            .get(*k)
                            .and_then(|chain| chain.latest())
                            .map_or(false, |sv| !sv.is_tombstone())
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Shard lock released here

        // Phase 2: Read values individually (brief lock per read)
        // Results are already sorted — BTreeSet iteration order
        keys.into_iter()
            .filter_map(|key| {
                self.shards.get(&branch_id).and_then(|shard| {
                    shard.data.get(&key).and_then(|chain| {
                        chain.latest().and_then(|sv| {
                            if !sv.is_tombstone() {
                                Some((key, sv.versioned().clone()))
                            } else {
                                None
                            }
                        })
                    })
                })
            })
            .collect()
    }

    /// List entries of a specific type for a branch
    ///
    /// Filters by TypeTag within a branch's shard.
    ///
    /// # Arguments
    ///
    /// * `branch_id` - The branch to query
    /// * `type_tag` - The type to filter by (KV, Event, State, etc.)
    ///
    /// # Returns
    ///
    /// Vector of (Key, VersionedValue) pairs of the specified type, sorted
    pub fn list_by_type(
        &self,
        branch_id: &BranchId,
        type_tag: meridian_core::types::TypeTag,
    ) -> Vec<(Key, VersionedValue)> {
        // Phase 1: Collect matching keys from BTreeSet (already sorted)
        let keys: Vec<Key> = self
            .shards
            .get(branch_id)
            .map(|shard| {
                shard
                    .ordered_keys
                    .iter()
                    .filter(|k| k.type_tag == type_tag)
                    .filter(|k| {
                        shard
                            .data
                            .get(*k)
                            .and_then(|chain| chain.latest())
                            .map_or(false, |sv| !sv.is_tombstone())
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Shard lock released here

        // Phase 2: Read values individually (brief lock per read)
        // Results are already sorted — BTreeSet iteration order
        keys.into_iter()
            .filter_map(|key| {
                self.shards.get(branch_id).and_then(|shard| {
                    shard.data.get(&key).and_then(|chain| {
                        chain.latest().and_then(|sv| {
                            if !sv.is_tombstone() {
                                Some((key, sv.versioned().clone()))
                            } else {
                                None
                            }
                        })
                    })
                })
            })
            .collect()
    }

    /// Count entries of a specific type for a branch (excludes tombstones)
    pub fn count_by_type(
        &self,
        branch_id: &BranchId,
        type_tag: meridian_core::types::TypeTag,
    ) -> usize {
        self.shards
            .get(branch_id)
            .map(|shard| {
                shard
                    .ordered_keys
                    .iter()
                    .filter(|k| {
                        k.type_tag == type_tag
                            && shard
                                .data
                                .get(*k)
                                .and_then(|chain| chain.latest())
                                .map_or(false, |sv| !sv.is_tombstone())
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// Iterate over all branches
    ///
    /// Returns an iterator over all BranchIds that have data
    pub fn branch_ids(&self) -> Vec<BranchId> {
        self.shards.iter().map(|entry| *entry.key()).collect()
    }

    /// Clear all data for a branch
    ///
    /// Removes the entire shard for the given branch.
    /// Returns true if the branch existed and was removed.
    pub fn clear_branch(&self, branch_id: &BranchId) -> bool {
        self.shards.remove(branch_id).is_some()
    }

    // ========================================================================
    // Snapshot Acquisition
    // ========================================================================

    /// Create a snapshot of the current store state
    ///
    /// FAST PATH: This is O(1) and < 500ns!
    ///
    /// Snapshot acquisition is:
    /// - Allocation-free (Arc reference count bump only)
    /// - Lock-free (atomic version load)
    /// - O(1) (no data structure scanning)
    ///
    /// The snapshot captures the current version and holds an Arc reference
    /// to the store, allowing reads at the captured version point.
    ///
    /// # Performance Contract
    ///
    /// - Must complete in < 500ns (RED FLAG if > 2µs)
    /// - Only operations: Arc::clone + atomic load
    ///
    /// # Example
    ///
    /// ```ignore
    /// use std::sync::Arc;
    /// use meridian_storage::ShardedStore;
    ///
    /// let store = Arc::new(ShardedStore::new());
    /// let snapshot = store.snapshot();
    ///
    /// // Reads through snapshot see store state at snapshot time
    /// let value = snapshot.get(&key);
    /// ```
    #[inline]
    pub fn snapshot(self: &Arc<Self>) -> ShardedSnapshot {
        ShardedSnapshot {
            version: self.version.load(Ordering::Acquire),
            store: Arc::clone(self),
        }
    }

    /// Create a snapshot - API compatibility method
    ///
    /// This method provides API compatibility with `UnifiedStore::create_snapshot()`.
    /// It returns the same `ShardedSnapshot` as `snapshot()` but with a name that
    /// matches the legacy API.
    ///
    /// # Performance
    ///
    /// Same as `snapshot()` - O(1), < 500ns, allocation-free.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use std::sync::Arc;
    /// use meridian_storage::ShardedStore;
    ///
    /// let store = Arc::new(ShardedStore::new());
    /// let snapshot = store.create_snapshot();  // Same as store.snapshot()
    /// ```
    #[inline]
    pub fn create_snapshot(self: &Arc<Self>) -> ShardedSnapshot {
        self.snapshot()
    }
}

impl Default for ShardedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShardedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedStore")
            .field("shard_count", &self.shard_count())
            .field("version", &self.version())
            .field("total_entries", &self.total_entries())
            .finish()
    }
}

// ============================================================================
// ShardedSnapshot
// ============================================================================

/// Lightweight snapshot view for MVCC reads
///
/// ShardedSnapshot is a thin wrapper that captures:
/// - The version number at snapshot time
/// - An Arc reference to the underlying store
///
/// All reads delegate to `store.get_versioned(key, version)`, which walks
/// the version chain to find the correct value. This provides:
/// - O(1) snapshot creation (just capture version + Arc clone)
/// - O(1) snapshot cloning (derive Clone)
/// - No unbounded memory growth (no per-snapshot cache)
/// - MVCC isolation via the store's version chain
///
/// # Performance
///
/// Snapshot acquisition is O(1) and < 500ns:
/// - Arc::clone: ~20-30ns (atomic increment)
/// - Atomic load: ~1-5ns
/// - Total: well under 500ns
///
/// # Thread Safety
///
/// ShardedSnapshot is Send + Sync since it only holds Arc<ShardedStore>.
/// Multiple snapshots can exist concurrently without blocking.
#[derive(Clone)]
pub struct ShardedSnapshot {
    /// Version captured at snapshot time
    version: u64,
    /// Reference to the underlying store
    store: Arc<ShardedStore>,
}

impl ShardedSnapshot {
    /// Get the snapshot version
    ///
    /// This is the version of the store at the time the snapshot was created.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    // NOTE: `get()` is provided by the SnapshotView trait implementation,
    // which includes proper MVCC version filtering and TTL expiration checks.
    // Use `SnapshotView::get()` directly instead of an inherent method.

    /// Check if a key exists at or before the snapshot version
    #[inline]
    pub fn contains(&self, key: &Key) -> bool {
        // Use the SnapshotView trait method for proper version filtering
        use meridian_core::traits::SnapshotView;
        SnapshotView::get(self, key).ok().flatten().is_some()
    }

    /// List all entries for a branch at snapshot version
    ///
    /// Returns entries as they existed at the snapshot version,
    /// filtering out expired values and tombstones.
    /// Results are sorted by key (BTreeSet iteration order).
    pub fn list_branch(&self, branch_id: &BranchId) -> Vec<(Key, VersionedValue)> {
        self.store
            .shards
            .get(branch_id)
            .map(|shard| {
                shard
                    .ordered_keys
                    .iter()
                    .filter_map(|k| {
                        shard.data.get(k).and_then(|chain| {
                            chain.get_at_version(self.version).and_then(|sv| {
                                if !sv.is_expired() && !sv.is_tombstone() {
                                    Some((k.clone(), sv.versioned().clone()))
                                } else {
                                    None
                                }
                            })
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// List entries matching a prefix at snapshot version
    ///
    /// Returns entries as they existed at the snapshot version,
    /// filtering out expired values and tombstones.
    /// Uses BTreeSet range scan for O(log n + k) performance.
    pub fn list_by_prefix(&self, prefix: &Key) -> Vec<(Key, VersionedValue)> {
        let branch_id = prefix.namespace.branch_id;
        self.store
            .shards
            .get(&branch_id)
            .map(|shard| {
                shard
                    .keys_with_prefix(prefix)
                    .filter_map(|k| {
                        shard.data.get(k).and_then(|chain| {
                            chain.get_at_version(self.version).and_then(|sv| {
                                if !sv.is_expired() && !sv.is_tombstone() {
                                    Some((k.clone(), sv.versioned().clone()))
                                } else {
                                    None
                                }
                            })
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// List entries of a specific type at snapshot version
    ///
    /// Returns entries as they existed at the snapshot version,
    /// filtering out expired values and tombstones.
    /// Results are sorted by key (BTreeSet iteration order).
    pub fn list_by_type(
        &self,
        branch_id: &BranchId,
        type_tag: meridian_core::types::TypeTag,
    ) -> Vec<(Key, VersionedValue)> {
        self.store
            .shards
            .get(branch_id)
            .map(|shard| {
                shard
                    .ordered_keys
                    .iter()
                    .filter(|k| k.type_tag == type_tag)
                    .filter_map(|k| {
                        shard.data.get(k).and_then(|chain| {
                            chain.get_at_version(self.version).and_then(|sv| {
                                if !sv.is_expired() && !sv.is_tombstone() {
                                    Some((k.clone(), sv.versioned().clone()))
                                } else {
                                    None
                                }
                            })
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get count of entries for a branch at snapshot version
    ///
    /// Counts only entries that existed at the snapshot version
    /// (excludes tombstones and expired values).
    pub fn branch_entry_count(&self, branch_id: &BranchId) -> usize {
        self.store
            .shards
            .get(branch_id)
            .map(|shard| {
                shard
                    .data
                    .iter()
                    .filter(|(_, chain)| {
                        chain
                            .get_at_version(self.version)
                            .is_some_and(|sv| !sv.is_expired() && !sv.is_tombstone())
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// Get total entries across all branches at snapshot version
    ///
    /// Counts only entries that existed at the snapshot version
    /// (excludes tombstones and expired values).
    pub fn total_entries(&self) -> usize {
        self.store
            .shards
            .iter()
            .map(|entry| {
                entry
                    .value()
                    .data
                    .iter()
                    .filter(|(_, chain)| {
                        chain
                            .get_at_version(self.version)
                            .is_some_and(|sv| !sv.is_expired() && !sv.is_tombstone())
                    })
                    .count()
            })
            .sum()
    }

    /// Get number of branches (shards)
    pub fn shard_count(&self) -> usize {
        self.store.shard_count()
    }
}

impl std::fmt::Debug for ShardedSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedSnapshot")
            .field("version", &self.version)
            .field("shard_count", &self.store.shard_count())
            .field("total_entries", &self.store.total_entries())
            .finish()
    }
}

// ============================================================================
// Storage Trait Implementation
// ============================================================================

use std::time::Duration;
use meridian_core::traits::Storage;
use meridian_core::value::Value;
use meridian_core::MeridianResult;

impl Storage for ShardedStore {
    /// Get current value for key (latest version)
    ///
    /// Returns None if key doesn't exist, is expired, or is a tombstone.
    fn get(&self, key: &Key) -> MeridianResult<Option<VersionedValue>> {
        let branch_id = key.namespace.branch_id;
        Ok(self.shards.get(&branch_id).and_then(|shard| {
            shard.data.get(key).and_then(|chain| {
                chain.latest().and_then(|sv| {
                    // Filter out expired values and tombstones
                    if !sv.is_expired() && !sv.is_tombstone() {
                        Some(sv.versioned().clone())
                    } else {
                        None
                    }
                })
            })
        }))
    }

    /// Get value at or before specified version (for snapshot isolation)
    ///
    /// Returns the value if version <= max_version, not expired, and not a tombstone.
    fn get_versioned(&self, key: &Key, max_version: u64) -> MeridianResult<Option<VersionedValue>> {
        let branch_id = key.namespace.branch_id;
        Ok(self.shards.get(&branch_id).and_then(|shard| {
            shard.data.get(key).and_then(|chain| {
                chain.get_at_version(max_version).and_then(|sv| {
                    // Filter out expired values and tombstones
                    if !sv.is_expired() && !sv.is_tombstone() {
                        Some(sv.versioned().clone())
                    } else {
                        None
                    }
                })
            })
        }))
    }

    /// Get version history for a key
    ///
    /// Returns historical versions newest first, filtered by limit and before_version.
    fn get_history(
        &self,
        key: &Key,
        limit: Option<usize>,
        before_version: Option<u64>,
    ) -> MeridianResult<Vec<VersionedValue>> {
        let branch_id = key.namespace.branch_id;

        // Get the shard and extract history within the same scope to avoid lifetime issues
        let result = match self.shards.get(&branch_id) {
            Some(shard) => match shard.data.get(key) {
                Some(chain) => chain
                    .history(limit, before_version)
                    .into_iter()
                    .filter(|sv| !sv.is_expired())
                    .map(|sv| sv.versioned().clone())
                    .collect(),
                None => Vec::new(),
            },
            None => Vec::new(),
        };

        Ok(result)
    }

    /// Put key-value pair with optional TTL
    ///
    /// Allocates a new version and returns it.
    fn put(&self, key: Key, value: Value, ttl: Option<Duration>) -> MeridianResult<u64> {
        let version = self.next_version();
        let stored = StoredValue::new(value, Version::txn(version), ttl);

        // Use the inherent put method which handles version chain
        ShardedStore::put(self, key, stored);

        Ok(version)
    }

    /// Delete key
    ///
    /// Returns the latest version's value if it existed.
    fn delete(&self, key: &Key) -> MeridianResult<Option<VersionedValue>> {
        Ok(ShardedStore::delete(self, key))
    }

    /// Scan keys with given prefix at or before max_version
    ///
    /// Uses BTreeSet range scan for O(log n + k) performance.
    /// Results are sorted by key order (BTreeSet iteration is ordered).
    fn scan_prefix(
        &self,
        prefix: &Key,
        max_version: u64,
    ) -> MeridianResult<Vec<(Key, VersionedValue)>> {
        let branch_id = prefix.namespace.branch_id;
        Ok(self
            .shards
            .get(&branch_id)
            .map(|shard| {
                shard
                    .keys_with_prefix(prefix)
                    .filter_map(|k| {
                        shard.data.get(k).and_then(|chain| {
                            chain.get_at_version(max_version).and_then(|sv| {
                                if !sv.is_expired() && !sv.is_tombstone() {
                                    Some((k.clone(), sv.versioned().clone()))
                                } else {
                                    None
                                }
                            })
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Scan all keys for a given branch_id at or before max_version
    ///
    /// Returns all entries for the branch, filtered by version.
    fn scan_by_branch(
        &self,
        branch_id: BranchId,
        max_version: u64,
    ) -> MeridianResult<Vec<(Key, VersionedValue)>> {
        Ok(self
            .shards
            .get(&branch_id)
            .map(|shard| {
                let mut results: Vec<_> = shard
                    .data
                    .iter()
                    .filter_map(|(k, chain)| {
                        chain.get_at_version(max_version).and_then(|sv| {
                            // Filter out expired values and tombstones
                            if !sv.is_expired() && !sv.is_tombstone() {
                                Some((k.clone(), sv.versioned().clone()))
                            } else {
                                None
                            }
                        })
                    })
                    .collect();

                results.sort_by(|(a, _), (b, _)| a.cmp(b));
                results
            })
            .unwrap_or_default())
    }

    /// Get current global version
    fn current_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Put a value with a specific version
    ///
    /// Used by transaction commit to apply writes with the commit version.
    fn put_with_version(
        &self,
        key: Key,
        value: Value,
        version: u64,
        ttl: Option<Duration>,
    ) -> MeridianResult<()> {
        let stored = StoredValue::new(value, Version::txn(version), ttl);

        // Use the inherent put method which handles version chain
        ShardedStore::put(self, key, stored);

        // Update global version to be at least this version
        self.version.fetch_max(version, Ordering::AcqRel);

        Ok(())
    }

    /// Delete a key with a specific version (creates tombstone)
    ///
    /// Used by transaction commit to apply deletes.
    fn delete_with_version(&self, key: &Key, version: u64) -> MeridianResult<Option<VersionedValue>> {
        let result = ShardedStore::delete_with_version(self, key, version);

        // Update global version to be at least this version
        self.version.fetch_max(version, Ordering::AcqRel);

        result
    }
}

// ============================================================================
// SnapshotView Trait Implementation
// ============================================================================

use meridian_core::traits::SnapshotView;

impl SnapshotView for ShardedSnapshot {
    /// Get value from snapshot with MVCC version filtering
    ///
    /// Delegates to `store.get_versioned(key, version)` which walks the
    /// version chain to find the correct value at the snapshot version.
    fn get(&self, key: &Key) -> MeridianResult<Option<VersionedValue>> {
        // Delegate to Storage::get_versioned for MVCC lookup
        Storage::get_versioned(&*self.store, key, self.version)
    }

    /// Scan keys with prefix from snapshot
    ///
    /// Uses BTreeSet range scan for O(log n + k) performance.
    /// Returns all matching keys at or before snapshot version.
    fn scan_prefix(&self, prefix: &Key) -> MeridianResult<Vec<(Key, VersionedValue)>> {
        let branch_id = prefix.namespace.branch_id;
        Ok(self
            .store
            .shards
            .get(&branch_id)
            .map(|shard| {
                shard
                    .keys_with_prefix(prefix)
                    .filter_map(|k| {
                        shard.data.get(k).and_then(|chain| {
                            chain.get_at_version(self.version).and_then(|sv| {
                                if !sv.is_expired() && !sv.is_tombstone() {
                                    Some((k.clone(), sv.versioned().clone()))
                                } else {
                                    None
                                }
                            })
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Get snapshot version
    fn version(&self) -> u64 {
        self.version
    }
}
