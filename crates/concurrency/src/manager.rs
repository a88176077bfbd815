//! Transaction manager for coordinating commit operations
//!
//! Provides atomic commit by orchestrating:
//! 1. Validation (first-committer-wins)
//! 2. WAL writing (durability)
//! 3. Storage application (visibility)
//!
//! Per spec Core Invariants:
//! - All-or-nothing commit: transaction writes either ALL succeed or ALL fail
//! - WAL before storage: durability requires WAL to be written first
//! - CommitTxn = durable: transaction is only durable when CommitTxn is in WAL
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. begin_validation() - Change state to Validating
//! 2. validate_transaction() - Check for conflicts
//! 3. IF conflicts: abort() and return error
//! 4. mark_committed() - Change state to Committed
//! 5. Allocate commit_version (increment global version)
//! 6. Build TransactionPayload from write/delete/cas sets
//! 7. Append single WalRecord to segmented WAL (DURABILITY POINT)
//! 8. apply_writes() to storage - Apply to in-memory storage
//! 9. Return Ok(commit_version)
//! ```
//!
//! If crash occurs before step 7: Transaction is not durable, discarded on recovery.
//! If crash occurs after step 7: Transaction is durable, replayed on recovery.

use crate::payload::TransactionPayload;
use crate::{CommitError, TransactionContext, TransactionStatus};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use meridian_core::traits::Storage;
use meridian_core::types::BranchId;
use meridian_durability::format::WalRecord;
use meridian_durability::now_micros;
use meridian_durability::wal::WalWriter;

/// Manages transaction lifecycle and atomic commits
///
/// TransactionManager coordinates the commit protocol:
/// - Validation against current storage state
/// - WAL writing for durability
/// - Storage application for visibility
///
/// Per spec Section 6.1: Global version counter is incremented once per transaction.
/// All keys in a transaction get the same commit version.
///
/// # Thread Safety
///
/// Commits are serialized per-branch via internal locks to prevent TOCTOU
/// (time-of-check-to-time-of-use) races between validation and storage application.
/// This ensures that no other transaction on the same branch can modify storage
/// between the time we validate and the time we apply our writes.
///
/// Transactions on different branches can commit in parallel, as ShardedStore
/// maintains per-branch shards and there's no cross-branch conflict.
pub struct TransactionManager {
    /// Global version counter
    ///
    /// Monotonically increasing. Each committed transaction increments by 1.
    /// Shared across all branches for consistent MVCC ordering.
    version: AtomicU64,

    /// Next transaction ID
    ///
    /// Unique identifier for transactions. Used in WAL entries.
    next_txn_id: AtomicU64,

    /// Per-branch commit locks
    ///
    /// Prevents TOCTOU race between validation and apply within the same branch.
    /// Without this lock, the following race can occur:
    /// 1. T1 validates (succeeds, storage at v1)
    /// 2. T2 validates (succeeds, storage still at v1)
    /// 3. T1 applies (storage now at v2)
    /// 4. T2 applies (uses stale validation from step 2)
    ///
    /// Using per-branch locks allows parallel commits for different branches while
    /// still preventing TOCTOU within each branch.
    commit_locks: DashMap<BranchId, Mutex<()>>,
}

impl TransactionManager {
    /// Create a new transaction manager
    ///
    /// # Arguments
    /// * `initial_version` - Starting version (typically from recovery's final_version)
    pub fn new(initial_version: u64) -> Self {
        Self::with_txn_id(initial_version, 0)
    }

    /// Create a new transaction manager with specific starting txn_id
    ///
    /// This is used during recovery to ensure new transactions get unique IDs
    /// that don't conflict with transactions already in the WAL.
    ///
    /// # Arguments
    /// * `initial_version` - Starting version (from recovery's final_version)
    /// * `max_txn_id` - Maximum txn_id seen in WAL (new transactions start at max_txn_id + 1)
    pub fn with_txn_id(initial_version: u64, max_txn_id: u64) -> Self {
        TransactionManager {
            version: AtomicU64::new(initial_version),
            // Start next_txn_id at max_txn_id + 1 to avoid conflicts
            next_txn_id: AtomicU64::new(max_txn_id + 1),
            commit_locks: DashMap::new(),
        }
    }

    /// Get current global version
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Allocate next transaction ID
    ///
    /// # Panics
    ///
    /// Panics if the transaction ID counter reaches `u64::MAX` (overflow).
    pub fn next_txn_id(&self) -> u64 {
        self.next_txn_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
            .expect("transaction ID overflow: u64::MAX reached")
    }

    /// Allocate next commit version (increment global version)
    ///
    /// Per spec Section 6.1: Version incremented ONCE for the whole transaction.
    ///
    /// # Version Gaps
    ///
    /// Version gaps may occur if a transaction fails after version allocation
    /// but before successful commit (e.g., WAL write failure). Consumers should
    /// not assume version numbers are contiguous. A gap means the version was
    /// allocated but no data was committed with that version.
    ///
    /// This is by design - version allocation is atomic and non-blocking,
    /// while failure handling during commit does not attempt to "return"
    /// the allocated version.
    ///
    /// # Panics
    ///
    /// Panics if the version counter reaches `u64::MAX` (overflow).
    pub fn allocate_version(&self) -> u64 {
        self.version
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
            .expect("version counter overflow: u64::MAX reached")
            + 1
    }

    /// Commit a transaction atomically
    ///
    /// Per spec Core Invariants:
    /// - Validates transaction (first-committer-wins)
    /// - Writes to WAL for durability (when WAL is provided)
    /// - Applies to storage only after WAL is durable
    /// - All-or-nothing: either all writes succeed or transaction aborts
    ///
    /// # Arguments
    /// * `txn` - Transaction to commit (must be in Active state)
    /// * `store` - Storage to validate against and apply writes to
    /// * `wal` - Optional WAL for durability. Pass `None` for ephemeral databases
    ///           or when durability is not required (DurabilityMode::Cache).
    ///
    /// # Returns
    /// - Ok(commit_version) on success
    /// - Err(CommitError) if validation fails or WAL write fails
    ///
    /// # Commit Sequence
    ///
    /// 1. Acquire per-branch commit lock (prevents TOCTOU race within same branch)
    /// 2. Validate and mark committed (in-memory state transition)
    /// 3. Allocate commit version
    /// 4. Write to WAL if provided (BeginTxn, operations, CommitTxn)
    /// 5. Apply writes to storage
    /// 6. Release commit lock
    /// 7. Return commit version
    ///
    /// When `wal` is `None`, steps 4 is skipped entirely. The transaction is
    /// still validated and applied to storage, but without durability guarantees.
    ///
    /// # Thread Safety
    ///
    /// Per-branch commit locks ensure that validation and apply happen atomically
    /// with respect to other transactions on the same branch. This prevents the
    /// TOCTOU race where validation passes but storage changes before apply.
    ///
    /// Transactions on different branches can commit in parallel.
    pub fn commit<S: Storage>(
        &self,
        txn: &mut TransactionContext,
        store: &S,
        mut wal: Option<&mut WalWriter>,
    ) -> std::result::Result<u64, CommitError> {
        // Acquire per-branch commit lock to prevent TOCTOU race between validation and apply
        // This ensures no other transaction on the same branch can modify storage between
        // our validation check and our apply_writes call.
        // Transactions on different branches can proceed in parallel.
        let branch_lock = self
            .commit_locks
            .entry(txn.branch_id)
            .or_insert_with(|| Mutex::new(()));
        let _commit_guard = branch_lock.lock();

        // Step 1: Validate and mark committed (in-memory)
        // This performs: Active → Validating → Committed
        // Or: Active → Validating → Aborted (if conflicts detected)
        txn.commit(store)?;

        // At this point, transaction is in Committed state
        // but NOT yet durable (not in WAL)

        // Step 2: Allocate commit version
        let commit_version = self.allocate_version();

        // Step 3: Write to WAL (durability) - only for transactions with mutations
        // Skip WAL for read-only transactions (no writes, deletes, CAS ops, or JSON patches)
        let has_mutations = !txn.is_read_only() || !txn.json_writes().is_empty();
        if has_mutations {
            if let Some(wal) = wal.as_mut() {
                let payload = TransactionPayload::from_transaction(txn, commit_version);
                let record = WalRecord::new(
                    txn.txn_id,
                    *txn.branch_id.as_bytes(),
                    now_micros(),
                    payload.to_bytes(),
                );

                if let Err(e) = wal.append(&record) {
                    txn.status = TransactionStatus::Aborted {
                        reason: format!("WAL write failed: {}", e),
                    };
                    return Err(CommitError::WALError(e.to_string()));
                }

                // DURABILITY POINT: Transaction is now durable
                // Even if we crash after this, recovery will replay from WAL
            }
        }

        // Step 4: Apply to storage
        if let Err(e) = txn.apply_writes(store, commit_version) {
            if wal.is_some() {
                // WAL says committed but storage failed - serious error
                // Log error but return success since WAL is authoritative
                // Recovery will replay the transaction anyway
                tracing::error!(
                    txn_id = txn.txn_id,
                    commit_version = commit_version,
                    error = %e,
                    "Storage application failed after WAL commit - will be recovered on restart"
                );
            } else {
                // No WAL - storage failure means data loss, return error
                txn.status = TransactionStatus::Aborted {
                    reason: format!("Storage application failed: {}", e),
                };
                return Err(CommitError::WALError(format!(
                    "Storage application failed (no WAL): {}",
                    e
                )));
            }
        }

        // Step 5: Return commit version
        Ok(commit_version)
    }

    /// Remove the per-branch commit lock for a deleted branch.
    ///
    /// Called during branch deletion to prevent unbounded growth of the
    /// `commit_locks` map. Safe to call even if no lock exists for the branch.
    ///
    /// # Safety
    ///
    /// This should only be called after the branch has been fully deleted
    /// and no further transactions will target it. If a concurrent transaction
    /// is in-flight for this branch, the lock will be lazily re-created on
    /// next commit (via `or_insert_with` in `commit()`).
    pub fn remove_branch_lock(&self, branch_id: &BranchId) {
        self.commit_locks.remove(branch_id);
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(0)
    }
}
