//! Secondary indices for efficient query patterns
//!
//! This module provides secondary indices that enable efficient queries
//! without scanning the entire BTreeMap:
//! - RunIndex: Maps RunId → Set<Key> for fast run-scoped queries (critical for replay)
//! - TypeIndex: Maps TypeTag → Set<Key> for primitive-specific queries

use meridian_core::{Key, RunId, TypeTag};
use std::collections::{HashMap, HashSet};

/// Secondary index: RunId → Keys
///
/// Enables efficient scan_by_run queries for replay by maintaining
/// a mapping from each RunId to all keys belonging to that run.
/// This changes scan_by_run from O(total data) to O(run size).
#[derive(Debug, Default)]
pub struct RunIndex {
    index: HashMap<RunId, HashSet<Key>>,
}

impl RunIndex {
    /// Create a new empty RunIndex
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
        }
    }

    /// Add key to run's index
    ///
    /// Inserts the key into the set of keys for the given run_id.
    /// If the run_id doesn't exist yet, creates a new entry.
    pub fn insert(&mut self, run_id: RunId, key: Key) {
        self.index.entry(run_id).or_default().insert(key);
    }

    /// Remove key from run's index
    ///
    /// Removes the key from the set for the given run_id.
    /// If the set becomes empty, removes the run_id entry entirely
    /// to avoid accumulating empty sets.
    pub fn remove(&mut self, run_id: RunId, key: &Key) {
        if let Some(keys) = self.index.get_mut(&run_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.index.remove(&run_id);
            }
        }
    }

    /// Get all keys for a run
    ///
    /// Returns a reference to the set of keys for the given run_id,
    /// or None if no keys exist for that run.
    pub fn get(&self, run_id: &RunId) -> Option<&HashSet<Key>> {
        self.index.get(run_id)
    }

    /// Remove all keys for a run (for cleanup)
    ///
    /// Removes the entire entry for a run_id, useful for
    /// cleaning up after a run is complete.
    pub fn remove_run(&mut self, run_id: &RunId) {
        self.index.remove(run_id);
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Get the number of runs in the index
    pub fn len(&self) -> usize {
        self.index.len()
    }
}

/// Secondary index: TypeTag → Keys
///
/// Enables efficient queries by primitive type by maintaining
/// a mapping from each TypeTag to all keys of that type.
/// Useful for queries like "all events" or "all KV entries".
#[derive(Debug, Default)]
pub struct TypeIndex {
    index: HashMap<TypeTag, HashSet<Key>>,
}

impl TypeIndex {
    /// Create a new empty TypeIndex
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
        }
    }

    /// Add key to type's index
    ///
    /// Inserts the key into the set of keys for the given type_tag.
    /// If the type_tag doesn't exist yet, creates a new entry.
    pub fn insert(&mut self, type_tag: TypeTag, key: Key) {
        self.index.entry(type_tag).or_default().insert(key);
    }

    /// Remove key from type's index
    ///
    /// Removes the key from the set for the given type_tag.
    /// If the set becomes empty, removes the type_tag entry entirely.
    pub fn remove(&mut self, type_tag: TypeTag, key: &Key) {
        if let Some(keys) = self.index.get_mut(&type_tag) {
            keys.remove(key);
            if keys.is_empty() {
                self.index.remove(&type_tag);
            }
        }
    }

    /// Get all keys for a type
    ///
    /// Returns a reference to the set of keys for the given type_tag,
    /// or None if no keys exist for that type.
    pub fn get(&self, type_tag: &TypeTag) -> Option<&HashSet<Key>> {
        self.index.get(type_tag)
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Get the number of types in the index
    pub fn len(&self) -> usize {
        self.index.len()
    }
}
