//! Snapshot persistence for `ReplicationState`.
//!
//! A snapshot consists of an opaque serialized blob (the batched indexer's
//! in-flight state) plus a hard-linked copy of the storage engine's
//! checkpoint directory. Grounded on the watermark/hard-link design of
//! `disk_snapshot::checkpoint::CheckpointCoordinator`, simplified from that
//! module's per-primitive sections down to a single opaque section, since
//! the storage engine itself is out of scope here.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from snapshot creation or restoration.
#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    /// Underlying filesystem operation failed.
    #[error("snapshot io error: {0}")]
    Io(#[from] io::Error),
    /// The metadata blob failed to (de)serialize.
    #[error("snapshot metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Result alias for snapshot store operations.
pub type SnapshotStoreResult<T> = Result<T, SnapshotStoreError>;

/// Metadata persisted alongside each snapshot: the consensus log index the
/// snapshot covers, and a monotonic sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Highest consensus log index reflected in this snapshot.
    pub log_index: u64,
    /// Monotonic snapshot sequence number.
    pub sequence: u64,
}

/// Coordinates on-disk snapshot directories under a root path, named
/// `snapshot-<sequence>`.
pub struct SnapshotStore {
    root: PathBuf,
    next_sequence: u64,
}

impl SnapshotStore {
    /// Open a snapshot store rooted at `root`, scanning any existing
    /// `snapshot-*` directories so `next_sequence` resumes one past the
    /// highest sequence already on disk rather than restarting at 0 — which
    /// would otherwise overwrite the first pre-restart snapshot and leave
    /// `latest_snapshot` permanently preferring stale, higher-numbered data.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let next_sequence = Self::highest_sequence_on_disk(&root).map(|s| s + 1).unwrap_or(0);
        SnapshotStore { root, next_sequence }
    }

    fn highest_sequence_on_disk(root: &Path) -> Option<u64> {
        let entries = fs::read_dir(root).ok()?;
        let mut highest = None;
        for entry in entries.flatten() {
            let meta_path = entry.path().join("meta.json");
            if let Ok(bytes) = fs::read(&meta_path) {
                if let Ok(meta) = serde_json::from_slice::<SnapshotMeta>(&bytes) {
                    highest = Some(highest.map_or(meta.sequence, |h: u64| h.max(meta.sequence)));
                }
            }
        }
        highest
    }

    fn snapshot_dir(&self, sequence: u64) -> PathBuf {
        self.root.join(format!("snapshot-{sequence:020}"))
    }

    /// Create a new snapshot directory, write `meta` and the in-flight state
    /// blob, and hard-link every file under `source_checkpoint_dir` into it.
    /// Returns the path of the new snapshot directory.
    pub fn create_snapshot(
        &mut self,
        log_index: u64,
        in_flight_state: &[u8],
        source_checkpoint_dir: &Path,
    ) -> SnapshotStoreResult<PathBuf> {
        let sequence = self.next_sequence;
        let dir = self.snapshot_dir(sequence);
        fs::create_dir_all(&dir)?;

        let meta = SnapshotMeta { log_index, sequence };
        fs::write(dir.join("meta.json"), serde_json::to_vec(&meta)?)?;
        fs::write(dir.join("indexer_state.bin"), in_flight_state)?;

        let checkpoint_dest = dir.join("checkpoint");
        fs::create_dir_all(&checkpoint_dest)?;
        if source_checkpoint_dir.exists() {
            for entry in fs::read_dir(source_checkpoint_dir)? {
                let entry = entry?;
                let dest = checkpoint_dest.join(entry.file_name());
                if fs::hard_link(entry.path(), &dest).is_err() {
                    // Cross-device or unsupported; fall back to a copy.
                    fs::copy(entry.path(), &dest)?;
                }
            }
        }

        self.next_sequence += 1;
        Ok(dir)
    }

    /// Locate the most recent snapshot directory, if any.
    pub fn latest_snapshot(&self) -> SnapshotStoreResult<Option<PathBuf>> {
        if !self.root.exists() {
            return Ok(None);
        }
        let mut best: Option<(u64, PathBuf)> = None;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            let meta_path = path.join("meta.json");
            if let Ok(bytes) = fs::read(&meta_path) {
                if let Ok(meta) = serde_json::from_slice::<SnapshotMeta>(&bytes) {
                    if best.as_ref().map(|(seq, _)| meta.sequence > *seq).unwrap_or(true) {
                        best = Some((meta.sequence, path));
                    }
                }
            }
        }
        Ok(best.map(|(_, p)| p))
    }

    /// Read the in-flight state blob and metadata out of a snapshot
    /// directory produced by `create_snapshot`.
    pub fn load_snapshot(&self, dir: &Path) -> SnapshotStoreResult<(SnapshotMeta, Vec<u8>)> {
        let meta: SnapshotMeta = serde_json::from_slice(&fs::read(dir.join("meta.json"))?)?;
        let state = fs::read(dir.join("indexer_state.bin"))?;
        Ok((meta, state))
    }
}
