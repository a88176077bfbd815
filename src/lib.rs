//! # Meridian
//!
//! The replicated write-path and request-processing core of a distributed
//! search engine: API-key authentication and scoped-key derivation, rate
//! limiting, a per-collection FIFO write indexer, and leader-forwarded
//! replicated writes over an opaque consensus engine.
//!
//! The [`Server`] struct is the main entry point. It composes
//! [`ReplicationState`] (consensus, snapshotting, leader status) with the
//! auth/rate-limit/collection-store plane bundled in [`AppContext`], mirroring
//! the delegation shape of a thin orchestration facade over an otherwise
//! self-contained state machine: own both, delegate to both, and add no
//! consensus logic of its own.
//!
//! Internal crates (storage, concurrency, durability, indexer) are not
//! re-exported here; only the facade and the types a caller needs to build
//! one are public.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Arc;

use meridian_api::{dispatch, AppContext, ApiError, DispatchRequest};
use meridian_engine::consensus::{NodeStatus, PeerConfig, PeerId};
use meridian_engine::replication::{ReplicationError, WriteDisposition};

pub use meridian_api::{AppContext as ServerContext, HttpLeaderForwarder};
pub use meridian_engine::consensus::ConsensusError;
pub use meridian_engine::replication::{ReplicationState, WriteRejection};

/// A point-in-time view of this node's replication status, the fields
/// `get_status` exposes over the (out-of-scope) admin HTTP surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerStatus {
    /// Consensus term, log indices, and role.
    pub node: NodeStatus,
    /// Writes accepted but not yet applied.
    pub queued_writes: i64,
    /// Whether this replica is caught up on reads.
    pub is_alive: bool,
    /// Whether this replica is caught up on writes.
    pub is_write_caught_up: bool,
}

/// Composes [`ReplicationState`] with the auth/rate-limit/collection-store
/// plane, exposing the forwarded-write entrypoint, status accessors, and
/// graceful shutdown a deployment's HTTP layer drives.
///
/// `Server` never implements consensus itself — every method here either
/// delegates straight to `ReplicationState` or runs the dispatch pipeline
/// in `meridian-api` ahead of it.
pub struct Server {
    context: AppContext,
}

impl Server {
    /// Wrap an already-assembled [`AppContext`] (auth manager, rate-limit
    /// manager, replication state, collection store, metrics) as a `Server`.
    pub fn new(context: AppContext) -> Self {
        Server { context }
    }

    /// Start consensus with the given peer set. Must be called once before
    /// any write is accepted.
    pub fn start(&self, config: &PeerConfig) -> Result<(), ConsensusError> {
        self.context.replication.start(config)
    }

    /// The bundled subsystems, for callers that need direct access (e.g. to
    /// register routes against `context.collections`).
    pub fn context(&self) -> &AppContext {
        &self.context
    }

    /// Run the full write path: authenticate, rate-limit, then propose to
    /// consensus or forward to the leader.
    pub fn write(&self, req: DispatchRequest) -> Result<WriteDisposition, ApiError> {
        dispatch(&self.context, req)
    }

    /// Whether this node currently believes it is the leader.
    pub fn is_leader(&self) -> bool {
        self.context.replication.is_leader()
    }

    /// Whether this node is alive and caught up enough to serve reads.
    pub fn is_alive(&self) -> bool {
        self.context.replication.is_alive()
    }

    /// A snapshot of consensus and indexer counters for health/status
    /// endpoints.
    pub fn get_status(&self) -> ServerStatus {
        ServerStatus {
            node: self.context.replication.status(),
            queued_writes: self.context.replication.queued_writes(),
            is_alive: self.context.replication.is_alive(),
            is_write_caught_up: self.context.replication.is_write_caught_up(),
        }
    }

    /// The current leader's peer id, if known.
    pub fn get_leader_id(&self) -> Option<PeerId> {
        self.context.replication.leader_id()
    }

    /// Take an on-demand snapshot of replication state.
    pub fn do_snapshot(&self) -> Result<std::path::PathBuf, ReplicationError> {
        self.context.replication.do_snapshot()
    }

    /// Begin a graceful shutdown: stop accepting new writes, drain pending
    /// proposals, then shut down consensus.
    pub fn shutdown(&self) {
        self.context.replication.shutdown();
    }
}

/// Build a `PeerConfig` for a single-node deployment where this node is its
/// own (and only) peer.
pub fn single_node_peer_config(self_id: impl Into<PeerId>) -> PeerConfig {
    PeerConfig {
        peers: vec![self_id.into()],
    }
}

/// Convenience alias matching the `Arc<Server>` shape callers typically hold
/// (routes and background threads all need a cloneable handle).
pub type SharedServer = Arc<Server>;
