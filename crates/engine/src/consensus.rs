//! The opaque consensus interface `ReplicationState` drives.
//!
//! The real consensus protocol (leader election, log replication, vote
//! counting) is out of scope: `ConsensusEngine` fixes the boundary spec.md
//! §6 describes, and [`SingleNodeConsensus`] is a reference implementation
//! sufficient for a one-node deployment and for driving `ReplicationState`
//! in tests — it applies every proposal immediately and is always its own
//! leader, matching the "single-node is immediately ready" note in §4.2.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meridian_core::LogIndex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies a peer node (host:port or a logical id, depending on
/// deployment).
pub type PeerId = String;

/// Coarse node role, exposed through [`NodeStatus::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// This node is the leader.
    Leader,
    /// This node is a follower of some leader.
    Follower,
    /// This node is running a leader election.
    Candidate,
    /// This node has not yet joined the cluster.
    Joining,
}

/// A snapshot of consensus-internal counters, per spec.md §6's
/// `status()` contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Current term.
    pub term: u64,
    /// Index of the last log entry.
    pub last_index: u64,
    /// Index known to be committed.
    pub committed_index: u64,
    /// Highest index this node has finished applying.
    pub known_applied_index: u64,
    /// Index currently being applied, if any.
    pub applying_index: u64,
    /// Node role.
    pub state: NodeRole,
    /// Entries proposed but not yet committed.
    pub pending_queue_size: u64,
}

/// The peer set a consensus engine is configured (or reconfigured) with.
#[derive(Debug, Clone, Default)]
pub struct PeerConfig {
    /// Every peer in the cluster, including self.
    pub peers: Vec<PeerId>,
}

impl PeerConfig {
    /// Simple-majority quorum size for this peer set.
    pub fn quorum_size(&self) -> usize {
        self.peers.len() / 2 + 1
    }
}

/// Whether reconfiguring from `old` to `new` is safe for a simple-majority
/// consensus protocol: any majority under `old` and any majority under
/// `new` must overlap in at least one member, which a single-server change
/// guarantees automatically. Membership changes that add or remove more
/// than one peer at once are rejected here rather than silently assumed
/// safe, per the source's TLA+-checked invariant.
pub fn config_is_safe(old: &PeerConfig, new: &PeerConfig) -> bool {
    let old_set: std::collections::HashSet<&PeerId> = old.peers.iter().collect();
    let new_set: std::collections::HashSet<&PeerId> = new.peers.iter().collect();
    let added = new_set.difference(&old_set).count();
    let removed = old_set.difference(&new_set).count();
    added + removed <= 1
}

/// Errors a `ConsensusEngine` implementation may report.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The proposal's expected term did not match the current term — a
    /// stale-leader ABA guard tripped.
    #[error("stale term: expected {expected}, current {current}")]
    StaleTerm {
        /// The caller's expected term.
        expected: u64,
        /// The engine's current term.
        current: u64,
    },
    /// This node is not the leader and cannot accept proposals.
    #[error("not leader")]
    NotLeader,
    /// The engine has not finished initializing.
    #[error("consensus engine not ready")]
    NotReady,
    /// A snapshot operation failed.
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

/// Callback invoked once per committed log entry, in commit order, on the
/// engine's single apply thread.
pub type ApplyCallback = Arc<dyn Fn(LogIndex, &[u8]) + Send + Sync>;

/// The consensus protocol `ReplicationState` is built on top of. Mirrors
/// spec.md §6's consumed interface (`init`/`propose`/`apply`/
/// `snapshot_save`/`snapshot_load`/`change_peers`/`reset_peers`/`vote`/
/// `is_leader`/`leader_id`/`status`/`shutdown`/`join`), collapsed from
/// callback-based completions to direct `Result` returns since a real
/// implementation's I/O is already hidden behind this trait.
pub trait ConsensusEngine: Send + Sync {
    /// Initialize the node with the given peer set and register the apply
    /// callback. Must be called exactly once before any other method.
    fn init(&self, config: &PeerConfig, on_apply: ApplyCallback) -> Result<(), ConsensusError>;

    /// Propose `bytes` to the log. `expected_term` guards against a stale
    /// leader committing after a term change. Returns the assigned log
    /// index once durably proposed (not necessarily yet committed).
    fn propose(&self, bytes: Vec<u8>, expected_term: u64) -> Result<LogIndex, ConsensusError>;

    /// Serialize consensus-internal state needed to resume after a
    /// snapshot load (e.g. the log position the snapshot covers).
    fn snapshot_save(&self, out: &mut Vec<u8>) -> Result<(), ConsensusError>;

    /// Restore consensus-internal state from a prior `snapshot_save`.
    /// Returns the log index the snapshot covers.
    fn snapshot_load(&self, data: &[u8]) -> Result<LogIndex, ConsensusError>;

    /// Reconfigure the peer set via the consensus protocol's normal
    /// membership-change path. Only valid on the leader.
    fn change_peers(&self, config: &PeerConfig) -> Result<(), ConsensusError>;

    /// Force the peer set directly, bypassing consensus. Documented as
    /// unsafe for multi-node clusters; used as a last resort after
    /// `change_peers` fails repeatedly.
    fn reset_peers(&self, config: &PeerConfig);

    /// Trigger a leader election, waiting up to `timeout` for it to
    /// resolve. Returns whether this node became leader.
    fn vote(&self, timeout: Duration) -> bool;

    /// Whether this node currently believes it is the leader.
    fn is_leader(&self) -> bool;

    /// The current leader, if known.
    fn leader_id(&self) -> Option<PeerId>;

    /// A snapshot of internal counters.
    fn status(&self) -> NodeStatus;

    /// Number of peers in the currently active configuration, including
    /// self.
    fn cluster_size(&self) -> usize;

    /// Simple-majority quorum size of the currently active configuration.
    fn quorum_size(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    /// Begin a graceful shutdown; does not block.
    fn shutdown(&self);

    /// Block until shutdown has completed.
    fn join(&self);
}

/// A single-node reference `ConsensusEngine`: every proposal is
/// immediately "committed" and applied inline, and this node is always
/// its own leader. Useful for tests and for standalone (non-clustered)
/// deployments.
pub struct SingleNodeConsensus {
    on_apply: Mutex<Option<ApplyCallback>>,
    last_index: AtomicU64,
    term: AtomicU64,
    shutting_down: AtomicBool,
}

impl SingleNodeConsensus {
    /// A fresh, uninitialized single-node engine.
    pub fn new() -> Arc<Self> {
        Arc::new(SingleNodeConsensus {
            on_apply: Mutex::new(None),
            last_index: AtomicU64::new(0),
            term: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        })
    }
}

impl ConsensusEngine for SingleNodeConsensus {
    fn init(&self, _config: &PeerConfig, on_apply: ApplyCallback) -> Result<(), ConsensusError> {
        *self.on_apply.lock().unwrap() = Some(on_apply);
        Ok(())
    }

    fn propose(&self, bytes: Vec<u8>, expected_term: u64) -> Result<LogIndex, ConsensusError> {
        let current = self.term.load(Ordering::SeqCst);
        if expected_term != 0 && expected_term != current {
            return Err(ConsensusError::StaleTerm {
                expected: expected_term,
                current,
            });
        }
        let index = self.last_index.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(cb) = self.on_apply.lock().unwrap().as_ref() {
            cb(index, &bytes);
        }
        Ok(index)
    }

    fn snapshot_save(&self, out: &mut Vec<u8>) -> Result<(), ConsensusError> {
        out.extend_from_slice(&self.last_index.load(Ordering::SeqCst).to_be_bytes());
        Ok(())
    }

    fn snapshot_load(&self, data: &[u8]) -> Result<LogIndex, ConsensusError> {
        if data.len() < 8 {
            return Err(ConsensusError::Snapshot("short snapshot buffer".into()));
        }
        let index = u64::from_be_bytes(data[..8].try_into().unwrap());
        self.last_index.store(index, Ordering::SeqCst);
        Ok(index)
    }

    fn change_peers(&self, _config: &PeerConfig) -> Result<(), ConsensusError> {
        Ok(())
    }

    fn reset_peers(&self, _config: &PeerConfig) {}

    fn vote(&self, _timeout: Duration) -> bool {
        true
    }

    fn is_leader(&self) -> bool {
        !self.shutting_down.load(Ordering::SeqCst)
    }

    fn leader_id(&self) -> Option<PeerId> {
        Some("self".to_string())
    }

    fn status(&self) -> NodeStatus {
        let idx = self.last_index.load(Ordering::SeqCst);
        NodeStatus {
            term: self.term.load(Ordering::SeqCst),
            last_index: idx,
            committed_index: idx,
            known_applied_index: idx,
            applying_index: idx,
            state: NodeRole::Leader,
            pending_queue_size: 0,
        }
    }

    fn cluster_size(&self) -> usize {
        1
    }

    fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    fn join(&self) {}
}
