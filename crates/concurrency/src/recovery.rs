//! Recovery infrastructure for transaction-aware database recovery
//!
//! Per spec Section 5 (Replay Semantics):
//! - Replays do NOT re-run conflict detection
//! - Replays apply commit decisions, not re-execute logic
//! - Replays are single-threaded
//! - Versions are preserved exactly
//!
//! ## Recovery Procedure
//!
//! 1. Load snapshot (if exists) - not implemented in M2
//! 2. Scan segmented WAL directory for records
//! 3. Each WalRecord = one committed transaction (TransactionPayload)
//! 4. Apply all records in order
//! 5. Initialize TransactionManager with final version

use crate::payload::TransactionPayload;
use crate::TransactionManager;
use std::path::PathBuf;
use meridian_core::traits::Storage;
use meridian_core::MeridianResult;
use meridian_durability::codec::IdentityCodec;
use meridian_durability::wal::WalReader;
use meridian_storage::ShardedStore;

/// Coordinates database recovery after crash or restart
///
/// Per spec Section 5.4:
/// 1. Loads checkpoint (if exists) - not implemented in M2
/// 2. Reads all WAL records from the segmented WAL directory
/// 3. Each record is a committed transaction (one WalRecord per txn)
/// 4. Applies all writes/deletes with version preservation
/// 5. Initializes TransactionManager with final version
pub struct RecoveryCoordinator {
    /// Path to WAL directory (contains wal-NNNNNN.seg files)
    wal_dir: PathBuf,
    /// Path to snapshot directory (optional, not used in M2)
    #[allow(dead_code)]
    snapshot_path: Option<PathBuf>,
}

impl RecoveryCoordinator {
    /// Create a new recovery coordinator
    ///
    /// # Arguments
    /// * `wal_dir` - Path to the segmented WAL directory
    pub fn new(wal_dir: PathBuf) -> Self {
        RecoveryCoordinator {
            wal_dir,
            snapshot_path: None,
        }
    }

    /// Set snapshot path for checkpoint-based recovery (M3+ feature)
    ///
    /// Note: Snapshot-based recovery is not implemented in M2.
    /// This method is provided for future extensibility.
    #[allow(dead_code)]
    pub(crate) fn with_snapshot_path(mut self, path: PathBuf) -> Self {
        self.snapshot_path = Some(path);
        self
    }

    /// Perform recovery and return initialized components
    ///
    /// Each WalRecord in the segmented WAL represents a single committed
    /// transaction. The writeset field contains a serialized TransactionPayload
    /// with the version, puts, and deletes.
    ///
    /// # Returns
    /// - `RecoveryResult` containing storage, transaction manager, and stats
    ///
    /// # Errors
    /// - If WAL directory cannot be read
    /// - If record deserialization fails
    pub fn recover(&self) -> MeridianResult<RecoveryResult> {
        let storage = ShardedStore::new();
        let mut max_version = 0u64;
        let mut max_txn_id = 0u64;
        let mut stats = RecoveryStats::default();

        // If WAL dir doesn't exist, return empty result
        if !self.wal_dir.exists() {
            return Ok(RecoveryResult {
                storage,
                txn_manager: TransactionManager::new(0),
                stats,
            });
        }

        // Read all records from segmented WAL
        let reader = WalReader::new(Box::new(IdentityCodec));
        let read_result = reader
            .read_all(&self.wal_dir)
            .map_err(|e| meridian_core::MeridianError::storage(format!("WAL read failed: {}", e)))?;

        for record in &read_result.records {
            max_txn_id = max_txn_id.max(record.txn_id);

            let payload = TransactionPayload::from_bytes(&record.writeset).map_err(|e| {
                meridian_core::MeridianError::storage(format!(
                    "Failed to decode transaction payload for txn {}: {}",
                    record.txn_id, e
                ))
            })?;

            max_version = max_version.max(payload.version);

            // Apply puts
            for (key, value) in &payload.puts {
                storage.put_with_version(key.clone(), value.clone(), payload.version, None)?;
                stats.writes_applied += 1;
            }

            // Apply deletes — use trait method explicitly so Storage::version is updated
            for key in &payload.deletes {
                Storage::delete_with_version(&storage, key, payload.version)?;
                stats.deletes_applied += 1;
            }

            stats.txns_replayed += 1;
        }

        stats.final_version = max_version;
        stats.max_txn_id = max_txn_id;

        let txn_manager = TransactionManager::with_txn_id(max_version, max_txn_id);

        Ok(RecoveryResult {
            storage,
            txn_manager,
            stats,
        })
    }
}

/// Result of recovery operation
pub struct RecoveryResult {
    /// Recovered storage with all committed transactions applied
    pub storage: ShardedStore,
    /// Transaction manager initialized with recovered version
    ///
    /// Per spec Section 6.1: The global version counter is set to the
    /// highest version seen in the WAL, ensuring new transactions get
    /// monotonically increasing versions.
    pub txn_manager: TransactionManager,
    /// Statistics about the recovery process
    pub stats: RecoveryStats,
}

impl RecoveryResult {
    /// Create an empty recovery result with fresh storage and zero stats.
    ///
    /// Used as a fallback when recovery fails (e.g., corrupted snapshot or
    /// unreadable WAL), allowing the database to start with a clean state
    /// rather than refusing to open.
    pub fn empty() -> Self {
        RecoveryResult {
            storage: ShardedStore::new(),
            txn_manager: TransactionManager::new(0),
            stats: RecoveryStats::default(),
        }
    }
}

/// Statistics from recovery
///
/// Provides detailed information about what happened during recovery,
/// useful for debugging, monitoring, and verification.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Number of committed transactions replayed
    ///
    /// Each WalRecord = one committed transaction.
    pub txns_replayed: usize,

    /// Number of incomplete transactions discarded
    ///
    /// With the segmented WAL, incomplete transactions never produce a
    /// WalRecord (the record is only written after commit), so this is
    /// always 0. Partial records are silently skipped by the reader.
    pub incomplete_txns: usize,

    /// Number of aborted transactions discarded
    ///
    /// With the segmented WAL, aborted transactions never produce a
    /// WalRecord, so this is always 0.
    pub aborted_txns: usize,

    /// Number of write operations applied
    pub writes_applied: usize,

    /// Number of delete operations applied
    pub deletes_applied: usize,

    /// Final version after recovery
    ///
    /// This is the highest version seen in the WAL, used to initialize
    /// the TransactionManager's version counter.
    pub final_version: u64,

    /// Maximum transaction ID seen in WAL
    ///
    /// This is used to initialize the TransactionManager's next_txn_id counter
    /// to ensure new transactions get unique IDs that don't conflict with
    /// transactions already in the WAL.
    pub max_txn_id: u64,

    /// Whether recovery was from checkpoint
    ///
    /// In M2, this is always false as checkpoint-based recovery is not implemented.
    pub from_checkpoint: bool,
}

impl RecoveryStats {
    /// Total operations applied (writes + deletes)
    pub fn total_operations(&self) -> usize {
        self.writes_applied + self.deletes_applied
    }

    /// Total transactions found (replayed + incomplete + aborted)
    pub fn total_transactions(&self) -> usize {
        self.txns_replayed + self.incomplete_txns + self.aborted_txns
    }
}
