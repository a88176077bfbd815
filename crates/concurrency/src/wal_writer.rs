//! WAL writer for transactions
//!
//! Writes transaction entries to WAL for durability.
//! Per spec Section 5:
//! - BeginTxn written at transaction start
//! - Write/Delete entries written during commit
//! - CommitTxn written to finalize (marks transaction durable)
//!
//! ## Usage
//!
//! ```ignore
//! let writer = TransactionWALWriter::new(&mut wal, txn_id, run_id);
//! writer.write_begin()?;
//! // ... write operations via TransactionContext.write_to_wal() ...
//! writer.write_commit()?;
//! ```

use chrono::Utc;
use meridian_core::error::Result;
use meridian_core::types::{Key, RunId};
use meridian_core::value::Value;
use meridian_durability::wal::{WALEntry, WAL};

/// Writes transaction operations to WAL
///
/// This is a convenience wrapper that handles creating properly formatted
/// WAL entries for a transaction. It tracks the transaction ID and run ID
/// so individual write operations don't need to specify them.
///
/// Per spec Section 5.3:
/// - BeginTxn: Written when transaction starts commit process
/// - Write/Delete: Written for each operation in the transaction
/// - CommitTxn: Written to mark transaction as durable (DURABILITY POINT)
pub struct TransactionWALWriter<'a> {
    wal: &'a mut WAL,
    txn_id: u64,
    run_id: RunId,
}

impl<'a> TransactionWALWriter<'a> {
    /// Create a new WAL writer for a transaction
    ///
    /// # Arguments
    /// * `wal` - WAL to write to
    /// * `txn_id` - Unique transaction ID
    /// * `run_id` - Run ID for this transaction
    pub fn new(wal: &'a mut WAL, txn_id: u64, run_id: RunId) -> Self {
        TransactionWALWriter {
            wal,
            txn_id,
            run_id,
        }
    }

    /// Write BeginTxn entry
    ///
    /// Should be called at the start of the commit process.
    pub fn write_begin(&mut self) -> Result<()> {
        let entry = WALEntry::BeginTxn {
            txn_id: self.txn_id,
            run_id: self.run_id,
            timestamp: Utc::now().timestamp(),
        };
        self.wal.append(&entry)?;
        Ok(())
    }

    /// Write a put operation
    ///
    /// # Arguments
    /// * `key` - Key being written
    /// * `value` - Value being written
    /// * `version` - Commit version for this write
    pub fn write_put(&mut self, key: Key, value: Value, version: u64) -> Result<()> {
        let entry = WALEntry::Write {
            run_id: self.run_id,
            key,
            value,
            version,
        };
        self.wal.append(&entry)?;
        Ok(())
    }

    /// Write a delete operation
    ///
    /// # Arguments
    /// * `key` - Key being deleted
    /// * `version` - Commit version for this delete
    pub fn write_delete(&mut self, key: Key, version: u64) -> Result<()> {
        let entry = WALEntry::Delete {
            run_id: self.run_id,
            key,
            version,
        };
        self.wal.append(&entry)?;
        Ok(())
    }

    /// Write CommitTxn entry (marks transaction as durable)
    ///
    /// Per spec Section 5: This is the DURABILITY POINT.
    /// Once this entry is written and flushed, the transaction is durable.
    /// If crash occurs after this, recovery will replay the transaction.
    pub fn write_commit(&mut self) -> Result<()> {
        let entry = WALEntry::CommitTxn {
            txn_id: self.txn_id,
            run_id: self.run_id,
        };
        self.wal.append(&entry)?;

        // Ensure commit marker is flushed to disk
        self.wal.flush()?;

        Ok(())
    }

    /// Write AbortTxn entry (optional for M2, but supported)
    ///
    /// Per spec Appendix A.3: Aborted transactions don't need WAL entries
    /// because they never applied anything. However, we support this for
    /// explicit abort tracking if needed.
    pub fn write_abort(&mut self) -> Result<()> {
        let entry = WALEntry::AbortTxn {
            txn_id: self.txn_id,
            run_id: self.run_id,
        };
        self.wal.append(&entry)?;
        Ok(())
    }

    /// Get the transaction ID
    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    /// Get the run ID
    pub fn run_id(&self) -> RunId {
        self.run_id
    }
}
