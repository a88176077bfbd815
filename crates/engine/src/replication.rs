//! `ReplicationState`: wraps the opaque `ConsensusEngine` to present a
//! single write/apply interface, forwards writes to the leader when local,
//! and drives snapshot save/load against the `BatchedIndexer` and the KV
//! store.
//!
//! Grounded on `crates/engine/src/coordinator.rs`'s `TransactionCoordinator`
//! (atomic counters for lifecycle bookkeeping, a thin wrapper that owns the
//! thing it coordinates rather than being it) and on `raft_server.h`'s
//! write-path contract.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meridian_core::{LogIndex, RouteKind, StartTs};
use meridian_durability::SnapshotStore;
use meridian_indexer::{BatchedIndexer, HandlerRequest, HandlerResponse, ResourceCheck, ResourceStatus};
use meridian_storage::KvStore;
use meridian_wire::gzip::GzipChunkReader;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::consensus::{config_is_safe, ConsensusEngine, ConsensusError, NodeStatus, PeerConfig, PeerId};

/// Why a write was rejected before it could reach consensus (or before a
/// leader could be found), per spec.md §7's status-code table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRejection {
    /// `shutting_down` is set — 503.
    ShuttingDown,
    /// Resource monitor reports pressure on a guarded route — 422.
    ResourceExhausted(ResourceStatus),
    /// Skip-writes mode is active and this route is not exempt — 422.
    SkipWrites,
    /// A collection-update conflicts with an alter already in progress — 422.
    AlterInProgress,
    /// Not leader, and no leader could be found to forward to — 500.
    NoLeader,
}

/// What became of a write that passed all local checks.
#[derive(Debug)]
pub enum WriteDisposition {
    /// Forwarded to the leader; this is the leader's verbatim response.
    Forwarded(HandlerResponse),
    /// Proposed to the local consensus log at this index. The client
    /// response is emitted later, from the indexer worker, once applied.
    Proposed {
        /// The log index the write was proposed at.
        log_index: LogIndex,
    },
}

/// Errors surfaced once a write has passed rejection checks.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The consensus engine rejected the proposal.
    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),
    /// Forwarding the request to the leader failed entirely (network error,
    /// leader unknown, etc).
    #[error("forward to leader failed: {0}")]
    Forward(String),
    /// A snapshot operation failed.
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

/// Forwards a write to the current leader verbatim and relays its
/// response. The real HTTP transport is out of scope; implemented by the
/// API layer in a full deployment.
pub trait LeaderForwarder: Send + Sync {
    /// Forward `req` to `leader` and return its response unchanged.
    fn forward(&self, leader: &PeerId, req: &HandlerRequest) -> Result<HandlerResponse, ReplicationError>;
}

/// A forwarder that always fails, useful for single-node deployments and
/// tests where forwarding should never be exercised.
pub struct NoForwarder;

impl LeaderForwarder for NoForwarder {
    fn forward(&self, _leader: &PeerId, _req: &HandlerRequest) -> Result<HandlerResponse, ReplicationError> {
        Err(ReplicationError::Forward("no forwarder configured".into()))
    }
}

/// The wire form of a write proposed to the consensus log. The real codec
/// is opaque per spec.md §6 ("serialize the request ... as an opaque byte
/// buffer"); this is this implementation's choice of that buffer's shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProposedWrite {
    start_ts: StartTs,
    route_hash: u64,
    method: String,
    path: String,
    params: serde_json::Value,
    body: Vec<u8>,
    is_last_chunk: bool,
    kind: RouteKindWire,
    collection: String,
}

/// `RouteKind` is not itself `Serialize`; mirror it with a wire-safe copy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum RouteKindWire {
    Search,
    Import,
    DocWrite,
    DocDelete,
    CollectionCreate,
    CollectionUpdate,
    ConfigWrite,
    Health,
    Other,
}

impl From<RouteKind> for RouteKindWire {
    fn from(k: RouteKind) -> Self {
        match k {
            RouteKind::Search => RouteKindWire::Search,
            RouteKind::Import => RouteKindWire::Import,
            RouteKind::DocWrite => RouteKindWire::DocWrite,
            RouteKind::DocDelete => RouteKindWire::DocDelete,
            RouteKind::CollectionCreate => RouteKindWire::CollectionCreate,
            RouteKind::CollectionUpdate => RouteKindWire::CollectionUpdate,
            RouteKind::ConfigWrite => RouteKindWire::ConfigWrite,
            RouteKind::Health => RouteKindWire::Health,
            RouteKind::Other => RouteKindWire::Other,
        }
    }
}

impl From<RouteKindWire> for RouteKind {
    fn from(k: RouteKindWire) -> Self {
        match k {
            RouteKindWire::Search => RouteKind::Search,
            RouteKindWire::Import => RouteKind::Import,
            RouteKindWire::DocWrite => RouteKind::DocWrite,
            RouteKindWire::DocDelete => RouteKind::DocDelete,
            RouteKindWire::CollectionCreate => RouteKind::CollectionCreate,
            RouteKindWire::CollectionUpdate => RouteKind::CollectionUpdate,
            RouteKindWire::ConfigWrite => RouteKind::ConfigWrite,
            RouteKindWire::Health => RouteKind::Health,
            RouteKindWire::Other => RouteKind::Other,
        }
    }
}

fn looks_like_gzip(chunk: &[u8]) -> bool {
    chunk.len() >= 2 && chunk[0] == 0x1f && chunk[1] == 0x8b
}

/// Configurable catch-up thresholds for `refresh_catchup_status`.
#[derive(Debug, Clone, Copy)]
pub struct CatchupThresholds {
    /// Maximum apply lag (log entries) before a replica is considered not
    /// caught up for reads.
    pub healthy_read_lag: u64,
    /// Maximum queued-writes count before a replica is considered not
    /// caught up for writes.
    pub healthy_write_lag: u64,
}

impl Default for CatchupThresholds {
    fn default() -> Self {
        CatchupThresholds {
            healthy_read_lag: 1000,
            healthy_write_lag: 1000,
        }
    }
}

/// Wraps the opaque `ConsensusEngine` to present a single write/apply
/// interface to the rest of the system.
pub struct ReplicationState {
    consensus: Arc<dyn ConsensusEngine>,
    indexer: Arc<BatchedIndexer>,
    kv: Arc<dyn KvStore>,
    snapshot_store: Mutex<SnapshotStore>,
    forwarder: Arc<dyn LeaderForwarder>,
    resource: Arc<dyn ResourceCheck>,
    skip_writes: Arc<AtomicBool>,
    shutting_down: AtomicBool,
    pending_writes: AtomicI64,
    cached_leader_term: AtomicU64,
    alter_in_progress: Mutex<HashSet<String>>,
    read_caught_up: AtomicBool,
    write_caught_up: AtomicBool,
    snapshot_in_progress: AtomicBool,
    thresholds: CatchupThresholds,
    /// Per-request streaming gzip decompressor state, keyed by `start_ts`.
    /// A chunk boundary can fall mid-deflate-block, so the decoder for a
    /// request must survive across `write` calls until its last chunk.
    gzip_readers: Mutex<HashMap<StartTs, GzipChunkReader>>,
}

impl ReplicationState {
    /// Construct a `ReplicationState` over an already-configured consensus
    /// engine, indexer, KV store, and snapshot store.
    pub fn new(
        consensus: Arc<dyn ConsensusEngine>,
        indexer: Arc<BatchedIndexer>,
        kv: Arc<dyn KvStore>,
        snapshot_store: SnapshotStore,
        forwarder: Arc<dyn LeaderForwarder>,
        resource: Arc<dyn ResourceCheck>,
        skip_writes: Arc<AtomicBool>,
        thresholds: CatchupThresholds,
    ) -> Arc<Self> {
        Arc::new(ReplicationState {
            consensus,
            indexer,
            kv,
            snapshot_store: Mutex::new(snapshot_store),
            forwarder,
            resource,
            skip_writes,
            shutting_down: AtomicBool::new(false),
            pending_writes: AtomicI64::new(0),
            cached_leader_term: AtomicU64::new(0),
            alter_in_progress: Mutex::new(HashSet::new()),
            read_caught_up: AtomicBool::new(false),
            write_caught_up: AtomicBool::new(false),
            snapshot_in_progress: AtomicBool::new(false),
            thresholds,
            gzip_readers: Mutex::new(HashMap::new()),
        })
    }

    /// Inflate one request chunk, carrying decompressor state across calls
    /// for the same `start_ts` so a chunk boundary mid-deflate-block does
    /// not lose data. Non-gzip chunks pass through unchanged. On the last
    /// chunk, drains and appends any remaining buffered output and forgets
    /// the decoder; on a stream error, logs and proposes the chunk as-is.
    fn inflate_chunk(&self, start_ts: StartTs, chunk: Vec<u8>, is_last_chunk: bool) -> Vec<u8> {
        let mut readers = self.gzip_readers.lock().unwrap();
        if !readers.contains_key(&start_ts) && !looks_like_gzip(&chunk) {
            return chunk;
        }

        let mut reader = readers.remove(&start_ts).unwrap_or_default();
        match reader.push(&chunk) {
            Ok(mut out) => {
                if is_last_chunk {
                    match reader.finish() {
                        Ok(rest) => out.extend(rest),
                        Err(e) => warn!(error = %e, start_ts, "failed to finish gzip stream, using partial output"),
                    }
                } else {
                    readers.insert(start_ts, reader);
                }
                out
            }
            Err(e) => {
                warn!(error = %e, start_ts, "gzip chunk failed to inflate, proposing chunk as-is");
                chunk
            }
        }
    }

    /// Register the apply callback with the consensus engine and mark this
    /// node ready to accept local proposals. Call once, on startup, after
    /// `init_db`-equivalent state has been loaded.
    pub fn start(self: &Arc<Self>, config: &PeerConfig) -> Result<(), ConsensusError> {
        let replication = Arc::clone(self);
        self.consensus.init(
            config,
            Arc::new(move |log_index, bytes| replication.apply(log_index, bytes)),
        )
    }

    /// Mark an alter (collection-update) as in progress; subsequent
    /// collection-update writes for the same name are rejected with
    /// [`WriteRejection::AlterInProgress`] until [`end_alter`] is called.
    pub fn begin_alter(&self, collection: &str) -> bool {
        self.alter_in_progress.lock().unwrap().insert(collection.to_string())
    }

    /// Clear an in-progress alter.
    pub fn end_alter(&self, collection: &str) {
        self.alter_in_progress.lock().unwrap().remove(collection);
    }

    /// The 8-step write path: local rejection checks, leader forwarding,
    /// gzip inflation, and proposal to the consensus log.
    pub fn write(
        &self,
        mut req: HandlerRequest,
        kind: RouteKind,
        collection: String,
        is_collection_update: bool,
    ) -> Result<WriteDisposition, WriteRejection> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(WriteRejection::ShuttingDown);
        }

        if kind.is_resource_guarded() {
            let status = self.resource.status();
            if status != meridian_indexer::ResourceStatus::Ok {
                return Err(WriteRejection::ResourceExhausted(status));
            }
        }

        if self.skip_writes.load(Ordering::SeqCst) && !kind.passes_skip_writes() {
            return Err(WriteRejection::SkipWrites);
        }

        if is_collection_update && self.alter_in_progress.lock().unwrap().contains(&collection) {
            return Err(WriteRejection::AlterInProgress);
        }

        if !self.consensus.is_leader() {
            let leader = self.consensus.leader_id().ok_or(WriteRejection::NoLeader)?;
            return match self.forwarder.forward(&leader, &req) {
                Ok(resp) => Ok(WriteDisposition::Forwarded(resp)),
                Err(_) => Err(WriteRejection::NoLeader),
            };
        }

        req.body = self.inflate_chunk(req.start_ts, req.body, req.last_chunk_aggregate);

        let wire = ProposedWrite {
            start_ts: req.start_ts,
            route_hash: req.route_hash,
            method: req.method.clone(),
            path: req.path.clone(),
            params: req.params.clone(),
            body: req.body.clone(),
            is_last_chunk: req.last_chunk_aggregate,
            kind: kind.into(),
            collection,
        };
        let bytes = bincode::serialize(&wire).map_err(|_| WriteRejection::NoLeader)?;

        let expected_term = self.cached_leader_term.load(Ordering::SeqCst);
        self.pending_writes.fetch_add(1, Ordering::SeqCst);
        match self.consensus.propose(bytes, expected_term) {
            Ok(log_index) => Ok(WriteDisposition::Proposed { log_index }),
            Err(_) => {
                self.pending_writes.fetch_sub(1, Ordering::SeqCst);
                Err(WriteRejection::NoLeader)
            }
        }
    }

    /// The apply callback: decode a committed entry and hand it to the
    /// indexer. Runs on the consensus engine's single apply thread and
    /// must never block on user work.
    fn apply(&self, log_index: LogIndex, bytes: &[u8]) {
        let wire: ProposedWrite = match bincode::deserialize(bytes) {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, log_index, "failed to decode committed entry, dropping");
                return;
            }
        };

        if let Err(e) = self.indexer.persist_applying_index(log_index) {
            warn!(error = %e, log_index, "failed to persist applying index");
        }

        let req = HandlerRequest {
            method: wire.method,
            path: wire.path,
            params: wire.params,
            body: wire.body,
            log_index,
            start_ts: wire.start_ts,
            last_chunk_aggregate: wire.is_last_chunk,
            route_hash: wire.route_hash,
        };
        let kind: RouteKind = wire.kind.into();

        // Only the node that originally accepted this write (the leader at
        // propose time) has a live client waiting on it; every other
        // replica applies the same entry purely to advance its own state.
        let is_alive = self.consensus.is_leader();
        self.indexer.enqueue(req, kind, wire.collection, is_alive);
        self.pending_writes.fetch_sub(1, Ordering::SeqCst);
    }

    /// Acquire the indexer's pause-mutex exclusive, serialize in-flight
    /// state, flush skip indices, checkpoint the KV store, and register
    /// the snapshot with the snapshot store. Returns the created snapshot
    /// directory.
    pub fn do_snapshot(&self) -> Result<std::path::PathBuf, ReplicationError> {
        if self
            .snapshot_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ReplicationError::Snapshot("snapshot already in progress".into()));
        }

        let result = (|| {
            let _quiesce = self.indexer.pause_mutex().quiesce();
            let state_bytes = self
                .indexer
                .serialize_state()
                .map_err(|e| ReplicationError::Snapshot(e.to_string()))?;
            self.indexer
                .clear_skip_indices()
                .map_err(|e| ReplicationError::Snapshot(e.to_string()))?;

            let checkpoint_dir = self.kv.state_dir_path().join("checkpoint-tmp");
            self.kv
                .create_checkpoint(&checkpoint_dir)
                .map_err(|e| ReplicationError::Snapshot(e.to_string()))?;

            let log_index = self.consensus.status().last_index;
            let snapshot_dir = self
                .snapshot_store
                .lock()
                .unwrap()
                .create_snapshot(log_index, &state_bytes, &checkpoint_dir)
                .map_err(|e| ReplicationError::Snapshot(e.to_string()))?;
            Ok(snapshot_dir)
        })();

        self.snapshot_in_progress.store(false, Ordering::SeqCst);
        info!(ok = result.is_ok(), "snapshot attempt finished");
        result
    }

    /// Reload the KV store and indexer in-flight state from the latest
    /// snapshot. Resets the catch-up flags until the reload completes.
    pub fn load_latest_snapshot(&self) -> Result<(), ReplicationError> {
        self.read_caught_up.store(false, Ordering::SeqCst);
        self.write_caught_up.store(false, Ordering::SeqCst);

        let Some(dir) = self
            .snapshot_store
            .lock()
            .unwrap()
            .latest_snapshot()
            .map_err(|e| ReplicationError::Snapshot(e.to_string()))?
        else {
            return Ok(());
        };
        let (_meta, state_bytes) = self
            .snapshot_store
            .lock()
            .unwrap()
            .load_snapshot(&dir)
            .map_err(|e| ReplicationError::Snapshot(e.to_string()))?;

        let checkpoint_dir = dir.join("checkpoint");
        self.kv
            .reload(&checkpoint_dir)
            .map_err(|e| ReplicationError::Snapshot(e.to_string()))?;
        self.indexer
            .load_state(&state_bytes)
            .map_err(|e| ReplicationError::Snapshot(e.to_string()))?;
        Ok(())
    }

    /// Whether this node currently believes it is the leader.
    pub fn is_leader(&self) -> bool {
        self.consensus.is_leader()
    }

    /// True iff this replica is caught up on reads.
    pub fn is_alive(&self) -> bool {
        self.read_caught_up.load(Ordering::SeqCst)
    }

    /// True iff this replica is caught up on writes.
    pub fn is_write_caught_up(&self) -> bool {
        self.write_caught_up.load(Ordering::SeqCst)
    }

    /// A snapshot of consensus-internal counters, for external status
    /// reporting (delegates straight through, per `raft_server.h`'s
    /// "complete delegation" accessors).
    pub fn status(&self) -> NodeStatus {
        self.consensus.status()
    }

    /// The current leader, if known.
    pub fn leader_id(&self) -> Option<PeerId> {
        self.consensus.leader_id()
    }

    /// Count of writes accepted but not yet applied.
    pub fn queued_writes(&self) -> i64 {
        self.indexer.get_queued_writes()
    }

    /// Recompute `read_caught_up`/`write_caught_up` against the configured
    /// lag thresholds. `leader_status`, if given, is the leader's own
    /// status fetched over the network for a follower cross-check — a
    /// single failed fetch must not regress the flag.
    pub fn refresh_catchup_status(&self, leader_last_index: Option<u64>) {
        let status = self.consensus.status();
        let apply_lag = status
            .last_index
            .saturating_sub(status.applying_index.max(status.known_applied_index));

        let read_ok = apply_lag <= self.thresholds.healthy_read_lag;
        let write_ok = (self.indexer.get_queued_writes() as u64) <= self.thresholds.healthy_write_lag;

        if let Some(leader_last) = leader_last_index {
            let behind_leader = leader_last.saturating_sub(status.last_index);
            if behind_leader > self.thresholds.healthy_read_lag {
                // A single network blip reporting a stale leader index must
                // not regress an already-caught-up flag; only tighten it
                // when we have current information showing real lag.
                self.read_caught_up.store(false, Ordering::SeqCst);
                return;
            }
        }

        self.read_caught_up.store(read_ok, Ordering::SeqCst);
        self.write_caught_up.store(write_ok, Ordering::SeqCst);
    }

    /// Begin a graceful shutdown: stop accepting new writes, wait for
    /// pending proposals to drain, then shut down consensus.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let deadline = std::time::Instant::now() + Duration::from_secs(30);
        while self.pending_writes.load(Ordering::SeqCst) > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        self.consensus.shutdown();
        self.consensus.join();
    }

    /// Reconfigure peers. On the leader, goes through `change_peers` after
    /// checking [`config_is_safe`] against the currently active
    /// configuration; after `max_consecutive_failures` failures (or on a
    /// leaderless single node), falls back to `reset_peers` as a last
    /// resort.
    pub fn refresh_nodes(
        &self,
        current: &PeerConfig,
        target: &PeerConfig,
        consecutive_failures: &mut u32,
        max_consecutive_failures: u32,
    ) {
        if !config_is_safe(current, target) {
            warn!(
                current = ?current.peers,
                target = ?target.peers,
                "refusing unsafe peer reconfiguration (more than one member added/removed at once)"
            );
            return;
        }
        if self.consensus.is_leader() || self.consensus.leader_id().is_none() {
            match self.consensus.change_peers(target) {
                Ok(()) => *consecutive_failures = 0,
                Err(e) => {
                    warn!(error = %e, "change_peers failed");
                    *consecutive_failures += 1;
                    if *consecutive_failures >= max_consecutive_failures {
                        warn!("falling back to reset_peers after repeated change_peers failures");
                        self.consensus.reset_peers(target);
                        *consecutive_failures = 0;
                    }
                }
            }
        }
    }
}
