//! Data model for the batched indexer: WAL-persisted request chunks, the
//! in-memory in-flight map, and the skip-index set.

use std::collections::HashSet;

use meridian_core::{LogIndex, RouteKind, StartTs};
use serde::{Deserialize, Serialize};

/// Fixed prefix for WAL request-chunk keys.
pub const WAL_REQUEST_PREFIX: &[u8] = b"$RL_";

/// Prefix for the skip-index key space (`<skip_indices_prefix>_<log_index>`).
pub const SKIP_INDEX_PREFIX: &[u8] = b"$SKIP_";

/// Key under which the indexer's in-flight state is serialized at snapshot
/// time (`<batched_indexer_state_key>`).
pub const INDEXER_STATE_KEY: &[u8] = b"$BI_STATE";

/// Build the WAL key for one chunk of a request: `$RL_<start_ts>_<chunk_index>`,
/// with `start_ts` and `chunk_index` encoded big-endian so that
/// lexicographic byte order matches numeric order.
pub fn request_chunk_key(start_ts: StartTs, chunk_index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(WAL_REQUEST_PREFIX.len() + 8 + 1 + 4);
    key.extend_from_slice(WAL_REQUEST_PREFIX);
    key.extend_from_slice(&start_ts.to_be_bytes());
    key.push(b'_');
    key.extend_from_slice(&chunk_index.to_be_bytes());
    key
}

/// Lower bound (inclusive) for scanning all chunks of `start_ts`.
pub fn request_prefix_lo(start_ts: StartTs) -> Vec<u8> {
    let mut key = Vec::with_capacity(WAL_REQUEST_PREFIX.len() + 8 + 1);
    key.extend_from_slice(WAL_REQUEST_PREFIX);
    key.extend_from_slice(&start_ts.to_be_bytes());
    key.push(b'_');
    key
}

/// Upper bound (exclusive) for scanning all chunks of `start_ts` — one past
/// the maximum possible chunk index.
pub fn request_prefix_hi(start_ts: StartTs) -> Vec<u8> {
    let mut key = request_prefix_lo(start_ts);
    key.extend_from_slice(&u32::MAX.to_be_bytes());
    key.push(0xFF);
    key
}

/// The key recording which log index is currently applying, read back on
/// restart to detect a crash mid-apply.
pub fn skip_index_key(log_index: LogIndex) -> Vec<u8> {
    let mut key = Vec::with_capacity(SKIP_INDEX_PREFIX.len() + 8);
    key.extend_from_slice(SKIP_INDEX_PREFIX);
    key.extend_from_slice(&log_index.to_be_bytes());
    key
}

/// A single body chunk of a (possibly multi-chunk) request, as persisted to
/// the WAL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedRequest {
    /// Timestamp the first chunk of this request arrived; shared by every
    /// chunk of the same logical request.
    pub start_ts: StartTs,
    /// A hash identifying the matched route (method + path pattern).
    pub route_hash: u64,
    /// HTTP method, preserved for forwarding/diagnostics.
    pub http_method: String,
    /// Request path.
    pub path: String,
    /// Route/query parameters (already parsed by the transport layer).
    pub params: serde_json::Value,
    /// This chunk's body bytes.
    pub body_chunk: Vec<u8>,
    /// Whether this is the final chunk of the request.
    pub is_last_chunk: bool,
    /// Position of this chunk within the request.
    pub chunk_index: u32,
    /// Consensus log index this request was committed at.
    pub log_index: LogIndex,
}

/// In-memory bookkeeping for a request whose chunks are arriving or being
/// processed. Keyed by `start_ts` in `BatchedIndexer`.
#[derive(Debug, Clone)]
pub struct InFlightRequest {
    /// Route kind, used for resource guarding and metrics labels.
    pub kind: RouteKind,
    /// Name of the collection this request targets, once known.
    pub collection: String,
    /// Wall-clock time (seconds since epoch) this entry was last touched.
    pub last_updated: u64,
    /// Total chunks received so far.
    pub num_chunks: u32,
    /// Index of the next chunk the worker has not yet consumed.
    pub next_chunk_index: u32,
    /// Whether the last chunk has arrived (`is_last_chunk` seen).
    pub is_complete: bool,
    /// Whether the originating client connection is still live; if not, the
    /// handler still runs (for idempotence) but its response is dropped.
    pub is_alive: bool,
}

impl InFlightRequest {
    /// Create the bookkeeping entry for a request's first chunk.
    pub fn first_chunk(kind: RouteKind, collection: impl Into<String>, now: u64) -> Self {
        InFlightRequest {
            kind,
            collection: collection.into(),
            last_updated: now,
            num_chunks: 1,
            next_chunk_index: 0,
            is_complete: false,
            is_alive: true,
        }
    }
}

/// The set of log indices known to have crashed the apply loop previously;
/// entries here are skipped (and removed from the set) on next apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkipIndex {
    indices: HashSet<LogIndex>,
}

impl SkipIndex {
    /// An empty skip-index set.
    pub fn new() -> Self {
        SkipIndex::default()
    }

    /// Record a log index to be skipped on next apply.
    pub fn mark(&mut self, log_index: LogIndex) {
        self.indices.insert(log_index);
    }

    /// Returns true and removes the index if it was marked to be skipped.
    pub fn take(&mut self, log_index: LogIndex) -> bool {
        self.indices.remove(&log_index)
    }

    /// Clear every skip entry — called during snapshot save once the meta
    /// store reflecting them has been flushed.
    pub fn clear(&mut self) {
        self.indices.clear();
    }

    /// Number of currently-marked indices.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Per-request state captured in a snapshot — complete or not — with enough
/// to resume at the persisted `next_chunk_index` instead of reprocessing a
/// multi-chunk request from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerSnapshotEntry {
    /// `start_ts` identifying the request.
    pub start_ts: StartTs,
    /// Collection the request targets.
    pub collection: String,
    /// Total chunks received so far.
    pub num_chunks: u32,
    /// Index of the next chunk the worker has not yet consumed.
    pub next_chunk_index: u32,
    /// Whether the last chunk had arrived before the snapshot was taken.
    pub is_complete: bool,
}

/// Serializable snapshot of the indexer's in-flight state, written under
/// [`INDEXER_STATE_KEY`] while the pause-mutex is held exclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexerSnapshot {
    /// Every in-flight request at snapshot time, in `start_ts` order,
    /// complete or not.
    pub in_flight: Vec<IndexerSnapshotEntry>,
    /// Queued writes counter at the time of the snapshot.
    pub queued_writes: i64,
}
