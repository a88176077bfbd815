//! Errors surfaced by the batched indexer.

use meridian_storage::KvError;
use thiserror::Error;

/// Errors the indexer can report. Most failure modes inside the worker loop
/// are logged and skipped rather than propagated — this type covers the
/// remaining cases that callers (snapshot save/load, enqueue) must react to.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The underlying KV store failed.
    #[error("kv store error: {0}")]
    Store(#[from] KvError),
    /// Snapshot (de)serialization failed.
    #[error("snapshot (de)serialization error: {0}")]
    Snapshot(#[from] serde_json::Error),
    /// A replay barrier could not be resolved because a referenced
    /// collection was never created.
    #[error("collection {referenced:?} referenced by {dependent:?} was never created")]
    DanglingReference {
        /// The collection that made the reference.
        dependent: String,
        /// The collection it referenced but could not find.
        referenced: String,
    },
}

/// Result alias for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;
