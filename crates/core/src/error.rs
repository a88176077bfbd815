//! Error types for Meridian database
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## M9 Error Model
//!
//! The `MeridianError` type is the unified error type for all Meridian APIs.
//! It provides consistent error handling across all primitives.
//!
//! ### Error Categories
//!
//! - **Not Found**: Entity doesn't exist
//! - **Conflict**: Version mismatch or concurrent modification
//! - **Transaction**: Transaction-level failures
//! - **Validation**: Invalid input or operation
//! - **Storage**: Low-level storage failures
//!
//! ### Usage
//!
//! ```ignore
//! match result {
//!     Err(MeridianError::NotFound { entity_ref }) => {
//!         println!("Entity not found: {}", entity_ref);
//!     }
//!     Err(MeridianError::VersionConflict { expected, actual, .. }) => {
//!         println!("Conflict: expected {:?}, got {:?}", expected, actual);
//!     }
//!     Err(e) if e.is_retryable() => {
//!         // Retry the operation
//!     }
//!     Err(e) => {
//!         println!("Other error: {}", e);
//!     }
//!     Ok(value) => { /* success */ }
//! }
//! ```

use crate::contract::{EntityRef, Version};
use crate::types::{Key, RunId};
use std::io;
use thiserror::Error;

/// Result type alias for Meridian operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Meridian database
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, network, etc.)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Key not found in storage
    #[error("Key not found: {0:?}")]
    KeyNotFound(Key),

    /// Version mismatch (for CAS operations)
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version
        expected: u64,
        /// Actual version found
        actual: u64,
    },

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Transaction aborted due to conflict (M2)
    #[error("Transaction aborted for run {0:?}")]
    TransactionAborted(RunId),

    /// Storage layer error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid state transition (M2 transactions)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Transaction conflict detected during commit (M2)
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// Transaction exceeded timeout (M2)
    #[error("Transaction timeout: {0}")]
    TransactionTimeout(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl Error {
    /// Check if this error is a transaction conflict
    ///
    /// Used for retry logic - only conflict errors should be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::TransactionConflict(_))
    }

    /// Check if this error is a transaction timeout
    ///
    /// Used to identify when a transaction was aborted due to exceeding
    /// its time limit.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TransactionTimeout(_))
    }
}


// =============================================================================
// MeridianError - Unified Error Type (M9)
// =============================================================================

/// Unified error type for all Meridian operations (M9)
///
/// This is the canonical error type returned by all Meridian APIs.
/// It provides consistent error handling across all primitives.
///
/// ## Error Categories
///
/// - **Not Found**: Entity doesn't exist (`NotFound`, `RunNotFound`, `PathNotFound`)
/// - **Conflict**: Version mismatch or concurrent modification (`VersionConflict`, `WriteConflict`)
/// - **Transaction**: Transaction-level failures (`TransactionAborted`, `TransactionTimeout`, `TransactionNotActive`)
/// - **Validation**: Invalid input or operation (`InvalidOperation`, `InvalidInput`, `DimensionMismatch`)
/// - **Storage**: Low-level storage failures (`Storage`, `Serialization`, `Corruption`)
/// - **Resource**: Resource limits exceeded (`CapacityExceeded`, `BudgetExceeded`)
/// - **Internal**: Unexpected internal errors (`Internal`)
///
/// ## Usage
///
/// ```ignore
/// use meridian_core::{MeridianError, MeridianResult, EntityRef, Version};
///
/// fn example_operation() -> MeridianResult<String> {
///     // Use ? operator naturally
///     let value = some_db_operation()?;
///     Ok(value)
/// }
///
/// // Match on specific variants
/// match result {
///     Err(MeridianError::NotFound { entity_ref }) => {
///         println!("Entity not found: {}", entity_ref);
///     }
///     Err(e) if e.is_retryable() => {
///         // Retry the operation
///     }
///     Err(e) if e.is_serious() => {
///         // Log and alert
///     }
///     Err(e) => { /* handle other errors */ }
///     Ok(value) => { /* success */ }
/// }
/// ```
#[derive(Debug, Error)]
pub enum MeridianError {
    // =========================================================================
    // Not Found Errors
    // =========================================================================

    /// Entity not found
    ///
    /// The referenced entity does not exist. This could be a key, document,
    /// event, state cell, or any other entity type.
    ///
    /// ## Example
    /// ```ignore
    /// // KV key not found
    /// MeridianError::not_found(EntityRef::kv(run_id, "missing-key"))
    /// ```
    #[error("not found: {entity_ref}")]
    NotFound {
        /// Reference to the entity that was not found
        entity_ref: EntityRef,
    },

    /// Run not found
    ///
    /// The specified run does not exist. This is separate from `NotFound`
    /// because runs are meta-level entities that scope all other data.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::run_not_found(run_id)
    /// ```
    #[error("run not found: {run_id}")]
    RunNotFound {
        /// ID of the run that was not found
        run_id: RunId,
    },

    // =========================================================================
    // Conflict Errors
    // =========================================================================

    /// Version conflict
    ///
    /// The operation failed because the entity's version doesn't match
    /// the expected version. This typically happens with:
    /// - Compare-and-swap (CAS) operations
    /// - Optimistic concurrency control conflicts
    ///
    /// This error is **retryable** - the operation can be retried after
    /// re-reading the current version.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::version_conflict(
    ///     EntityRef::state(run_id, "counter"),
    ///     Version::Counter(5),  // expected
    ///     Version::Counter(6),  // actual
    /// )
    /// ```
    #[error("version conflict on {entity_ref}: expected {expected}, got {actual}")]
    VersionConflict {
        /// Reference to the conflicted entity
        entity_ref: EntityRef,
        /// The version that was expected
        expected: Version,
        /// The actual version found
        actual: Version,
    },

    /// Write conflict
    ///
    /// Two transactions attempted to modify the same entity concurrently.
    /// This error is **retryable** - the transaction can be retried.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::write_conflict(EntityRef::kv(run_id, "shared-key"))
    /// ```
    #[error("write conflict on {entity_ref}")]
    WriteConflict {
        /// Reference to the conflicted entity
        entity_ref: EntityRef,
    },

    // =========================================================================
    // Transaction Errors
    // =========================================================================

    /// Transaction aborted
    ///
    /// The transaction was aborted due to a conflict, timeout, or other
    /// transactional failure. This error is **retryable**.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::TransactionAborted {
    ///     reason: "Conflict on key 'counter'".to_string(),
    /// }
    /// ```
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for the abort
        reason: String,
    },

    /// Transaction timeout
    ///
    /// The transaction exceeded the maximum allowed duration.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::TransactionTimeout { duration_ms: 5000 }
    /// ```
    #[error("transaction timeout after {duration_ms}ms")]
    TransactionTimeout {
        /// How long the transaction ran before timing out
        duration_ms: u64,
    },

    /// Transaction not active
    ///
    /// An operation was attempted on a transaction that has already
    /// been committed or rolled back.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::TransactionNotActive {
    ///     state: "committed".to_string(),
    /// }
    /// ```
    #[error("transaction not active (already {state})")]
    TransactionNotActive {
        /// Current state of the transaction
        state: String,
    },

    // =========================================================================
    // Validation Errors
    // =========================================================================

    /// Invalid operation
    ///
    /// The operation is not valid for the current state of the entity.
    /// Examples: creating a document that exists, deleting a required entity,
    /// invalid state transition.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::invalid_operation(
    ///     EntityRef::json(run_id, doc_id),
    ///     "Document already exists",
    /// )
    /// ```
    #[error("invalid operation on {entity_ref}: {reason}")]
    InvalidOperation {
        /// Reference to the entity
        entity_ref: EntityRef,
        /// Why the operation is invalid
        reason: String,
    },

    /// Invalid input
    ///
    /// The input parameters are invalid. This is a validation error that
    /// cannot be fixed by retrying - the input must be corrected.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::invalid_input("Key cannot be empty")
    /// ```
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of what's wrong with the input
        message: String,
    },

    /// Dimension mismatch (Vector-specific)
    ///
    /// The vector dimension doesn't match the collection's configured dimension.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::dimension_mismatch(384, 768)
    /// ```
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension provided
        got: usize,
    },

    /// Path not found (JSON-specific)
    ///
    /// The specified path doesn't exist in the JSON document.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::PathNotFound {
    ///     entity_ref: EntityRef::json(run_id, doc_id),
    ///     path: "/data/items/0/name".to_string(),
    /// }
    /// ```
    #[error("path not found in {entity_ref}: {path}")]
    PathNotFound {
        /// Reference to the JSON document
        entity_ref: EntityRef,
        /// The path that wasn't found
        path: String,
    },

    // =========================================================================
    // Storage Errors
    // =========================================================================

    /// Storage error
    ///
    /// Low-level storage operation failed.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::storage("Disk write failed")
    /// ```
    #[error("storage error: {message}")]
    Storage {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization error
    ///
    /// Failed to serialize or deserialize data.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::serialization("Invalid UTF-8 in key")
    /// ```
    #[error("serialization error: {message}")]
    Serialization {
        /// What went wrong
        message: String,
    },

    /// Corruption detected
    ///
    /// Data integrity check failed. This is a **serious** error that may
    /// require recovery from backup.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::Corruption {
    ///     message: "CRC mismatch in event log".to_string(),
    /// }
    /// ```
    #[error("corruption detected: {message}")]
    Corruption {
        /// Description of the corruption
        message: String,
    },

    // =========================================================================
    // Resource Errors
    // =========================================================================

    /// Capacity exceeded
    ///
    /// A resource limit was exceeded.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::CapacityExceeded {
    ///     resource: "event log".to_string(),
    ///     limit: 1_000_000,
    ///     requested: 1_000_001,
    /// }
    /// ```
    #[error("capacity exceeded: {resource} (limit: {limit}, requested: {requested})")]
    CapacityExceeded {
        /// What resource was exceeded
        resource: String,
        /// The limit
        limit: usize,
        /// What was requested
        requested: usize,
    },

    /// Budget exceeded
    ///
    /// The operation exceeded its computational budget.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::BudgetExceeded {
    ///     operation: "vector search".to_string(),
    /// }
    /// ```
    #[error("budget exceeded: {operation}")]
    BudgetExceeded {
        /// What operation exceeded its budget
        operation: String,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================

    /// Internal error
    ///
    /// An unexpected internal error occurred. This is a **serious** error
    /// that indicates a bug in the system.
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::internal("Unexpected state in transaction manager")
    /// ```
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl MeridianError {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a NotFound error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::not_found(EntityRef::kv(run_id, "missing-key"))
    /// ```
    pub fn not_found(entity_ref: EntityRef) -> Self {
        MeridianError::NotFound { entity_ref }
    }

    /// Create a RunNotFound error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::run_not_found(run_id)
    /// ```
    pub fn run_not_found(run_id: RunId) -> Self {
        MeridianError::RunNotFound { run_id }
    }

    /// Create a VersionConflict error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::version_conflict(
    ///     EntityRef::state(run_id, "counter"),
    ///     Version::Counter(5),
    ///     Version::Counter(6),
    /// )
    /// ```
    pub fn version_conflict(entity_ref: EntityRef, expected: Version, actual: Version) -> Self {
        MeridianError::VersionConflict {
            entity_ref,
            expected,
            actual,
        }
    }

    /// Create a WriteConflict error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::write_conflict(EntityRef::kv(run_id, "shared-key"))
    /// ```
    pub fn write_conflict(entity_ref: EntityRef) -> Self {
        MeridianError::WriteConflict { entity_ref }
    }

    /// Create a TransactionAborted error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::transaction_aborted("Conflict on key 'counter'")
    /// ```
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        MeridianError::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Create a TransactionTimeout error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::transaction_timeout(5000)
    /// ```
    pub fn transaction_timeout(duration_ms: u64) -> Self {
        MeridianError::TransactionTimeout { duration_ms }
    }

    /// Create a TransactionNotActive error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::transaction_not_active("committed")
    /// ```
    pub fn transaction_not_active(state: impl Into<String>) -> Self {
        MeridianError::TransactionNotActive {
            state: state.into(),
        }
    }

    /// Create an InvalidOperation error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::invalid_operation(
    ///     EntityRef::json(run_id, doc_id),
    ///     "Document already exists",
    /// )
    /// ```
    pub fn invalid_operation(entity_ref: EntityRef, reason: impl Into<String>) -> Self {
        MeridianError::InvalidOperation {
            entity_ref,
            reason: reason.into(),
        }
    }

    /// Create an InvalidInput error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::invalid_input("Key cannot be empty")
    /// ```
    pub fn invalid_input(message: impl Into<String>) -> Self {
        MeridianError::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a DimensionMismatch error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::dimension_mismatch(384, 768)
    /// ```
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        MeridianError::DimensionMismatch { expected, got }
    }

    /// Create a PathNotFound error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::path_not_found(
    ///     EntityRef::json(run_id, doc_id),
    ///     "/data/items/0",
    /// )
    /// ```
    pub fn path_not_found(entity_ref: EntityRef, path: impl Into<String>) -> Self {
        MeridianError::PathNotFound {
            entity_ref,
            path: path.into(),
        }
    }

    /// Create a Storage error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::storage("Disk write failed")
    /// ```
    pub fn storage(message: impl Into<String>) -> Self {
        MeridianError::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a Storage error with source
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::storage_with_source("Failed to write", io_error)
    /// ```
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        MeridianError::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a Serialization error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::serialization("Invalid UTF-8 in key")
    /// ```
    pub fn serialization(message: impl Into<String>) -> Self {
        MeridianError::Serialization {
            message: message.into(),
        }
    }

    /// Create a Corruption error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::corruption("CRC mismatch")
    /// ```
    pub fn corruption(message: impl Into<String>) -> Self {
        MeridianError::Corruption {
            message: message.into(),
        }
    }

    /// Create a CapacityExceeded error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::capacity_exceeded("event log", 1_000_000, 1_000_001)
    /// ```
    pub fn capacity_exceeded(resource: impl Into<String>, limit: usize, requested: usize) -> Self {
        MeridianError::CapacityExceeded {
            resource: resource.into(),
            limit,
            requested,
        }
    }

    /// Create a BudgetExceeded error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::budget_exceeded("vector search")
    /// ```
    pub fn budget_exceeded(operation: impl Into<String>) -> Self {
        MeridianError::BudgetExceeded {
            operation: operation.into(),
        }
    }

    /// Create an Internal error
    ///
    /// ## Example
    /// ```ignore
    /// MeridianError::internal("Unexpected state")
    /// ```
    pub fn internal(message: impl Into<String>) -> Self {
        MeridianError::Internal {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification Methods
    // =========================================================================

    /// Check if this is a "not found" type error
    ///
    /// Returns true for: `NotFound`, `RunNotFound`, `PathNotFound`
    ///
    /// ## Example
    /// ```ignore
    /// if error.is_not_found() {
    ///     // Handle missing entity
    /// }
    /// ```
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MeridianError::NotFound { .. }
                | MeridianError::RunNotFound { .. }
                | MeridianError::PathNotFound { .. }
        )
    }

    /// Check if this is a conflict error
    ///
    /// Returns true for: `VersionConflict`, `WriteConflict`
    ///
    /// ## Example
    /// ```ignore
    /// if error.is_conflict() {
    ///     // Retry with fresh data
    /// }
    /// ```
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            MeridianError::VersionConflict { .. } | MeridianError::WriteConflict { .. }
        )
    }

    /// Check if this is a transaction error
    ///
    /// Returns true for: `TransactionAborted`, `TransactionTimeout`, `TransactionNotActive`
    ///
    /// ## Example
    /// ```ignore
    /// if error.is_transaction_error() {
    ///     // Handle transaction failure
    /// }
    /// ```
    pub fn is_transaction_error(&self) -> bool {
        matches!(
            self,
            MeridianError::TransactionAborted { .. }
                | MeridianError::TransactionTimeout { .. }
                | MeridianError::TransactionNotActive { .. }
        )
    }

    /// Check if this is a validation error
    ///
    /// Returns true for: `InvalidOperation`, `InvalidInput`, `DimensionMismatch`
    ///
    /// Validation errors indicate bad input - don't retry, fix the input.
    ///
    /// ## Example
    /// ```ignore
    /// if error.is_validation_error() {
    ///     // Report to user, don't retry
    /// }
    /// ```
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            MeridianError::InvalidOperation { .. }
                | MeridianError::InvalidInput { .. }
                | MeridianError::DimensionMismatch { .. }
        )
    }

    /// Check if this is a storage error
    ///
    /// Returns true for: `Storage`, `Serialization`, `Corruption`
    ///
    /// ## Example
    /// ```ignore
    /// if error.is_storage_error() {
    ///     // Check disk/IO
    /// }
    /// ```
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            MeridianError::Storage { .. }
                | MeridianError::Serialization { .. }
                | MeridianError::Corruption { .. }
        )
    }

    /// Check if this error is retryable
    ///
    /// Retryable errors may succeed on retry:
    /// - `VersionConflict`: Re-read current version and retry
    /// - `WriteConflict`: Retry the transaction
    /// - `TransactionAborted`: Retry the transaction
    ///
    /// ## Example
    /// ```ignore
    /// loop {
    ///     match operation() {
    ///         Ok(result) => return Ok(result),
    ///         Err(e) if e.is_retryable() => continue,
    ///         Err(e) => return Err(e),
    ///     }
    /// }
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MeridianError::VersionConflict { .. }
                | MeridianError::WriteConflict { .. }
                | MeridianError::TransactionAborted { .. }
        )
    }

    /// Check if this is a serious/unrecoverable error
    ///
    /// Serious errors indicate potential data corruption or bugs:
    /// - `Corruption`: Data integrity failure
    /// - `Internal`: Unexpected system state (bug)
    ///
    /// These should be logged, alerted, and investigated.
    ///
    /// ## Example
    /// ```ignore
    /// if error.is_serious() {
    ///     log::error!("SERIOUS ERROR: {}", error);
    ///     alert_oncall();
    /// }
    /// ```
    pub fn is_serious(&self) -> bool {
        matches!(
            self,
            MeridianError::Corruption { .. } | MeridianError::Internal { .. }
        )
    }

    /// Check if this is a resource error
    ///
    /// Returns true for: `CapacityExceeded`, `BudgetExceeded`
    ///
    /// ## Example
    /// ```ignore
    /// if error.is_resource_error() {
    ///     // Reduce batch size or implement backpressure
    /// }
    /// ```
    pub fn is_resource_error(&self) -> bool {
        matches!(
            self,
            MeridianError::CapacityExceeded { .. } | MeridianError::BudgetExceeded { .. }
        )
    }

    /// Get the entity reference if this error is about a specific entity
    ///
    /// Returns `Some(&EntityRef)` for errors that reference an entity:
    /// - `NotFound`
    /// - `VersionConflict`
    /// - `WriteConflict`
    /// - `InvalidOperation`
    /// - `PathNotFound`
    ///
    /// Returns `None` for errors without entity context.
    ///
    /// ## Example
    /// ```ignore
    /// if let Some(entity) = error.entity_ref() {
    ///     println!("Error on entity: {}", entity);
    /// }
    /// ```
    pub fn entity_ref(&self) -> Option<&EntityRef> {
        match self {
            MeridianError::NotFound { entity_ref } => Some(entity_ref),
            MeridianError::VersionConflict { entity_ref, .. } => Some(entity_ref),
            MeridianError::WriteConflict { entity_ref } => Some(entity_ref),
            MeridianError::InvalidOperation { entity_ref, .. } => Some(entity_ref),
            MeridianError::PathNotFound { entity_ref, .. } => Some(entity_ref),
            _ => None,
        }
    }

    /// Get the run ID if this error is about a specific run
    ///
    /// Returns the RunId from:
    /// - `RunNotFound`: The missing run
    /// - Entity-related errors: The run from the EntityRef
    ///
    /// ## Example
    /// ```ignore
    /// if let Some(run_id) = error.run_id() {
    ///     println!("Error in run: {}", run_id);
    /// }
    /// ```
    pub fn run_id(&self) -> Option<RunId> {
        match self {
            MeridianError::RunNotFound { run_id } => Some(*run_id),
            _ => self.entity_ref().map(|e| e.run_id()),
        }
    }
}

// =============================================================================
// MeridianResult Type Alias
// =============================================================================

/// Result type alias for Meridian operations
///
/// All Meridian API methods return `MeridianResult<T>`.
///
/// ## Example
/// ```ignore
/// fn get_value(run_id: RunId, key: &str) -> MeridianResult<String> {
///     let value = db.kv().get(&run_id, key)?;
///     match value {
///         Some(v) => Ok(v),
///         None => Err(MeridianError::not_found(EntityRef::kv(run_id, key))),
///     }
/// }
/// ```
pub type MeridianResult<T> = std::result::Result<T, MeridianError>;

// =============================================================================
// Conversions from Legacy Error
// =============================================================================

impl From<Error> for MeridianError {
    fn from(e: Error) -> Self {
        match e {
            Error::IoError(io_err) => MeridianError::Storage {
                message: io_err.to_string(),
                source: Some(Box::new(io_err)),
            },
            Error::SerializationError(msg) => MeridianError::Serialization { message: msg },
            Error::KeyNotFound(key) => MeridianError::NotFound {
                entity_ref: EntityRef::kv(key.namespace.run_id, format!("{:?}", key)),
            },
            Error::VersionMismatch { expected, actual } => MeridianError::VersionConflict {
                entity_ref: EntityRef::kv(RunId::new(), "unknown"),
                expected: Version::TxnId(expected),
                actual: Version::TxnId(actual),
            },
            Error::Corruption(msg) => MeridianError::Corruption { message: msg },
            Error::InvalidOperation(msg) => MeridianError::InvalidInput { message: msg },
            Error::TransactionAborted(run_id) => MeridianError::TransactionAborted {
                reason: format!("Transaction aborted for run {}", run_id),
            },
            Error::StorageError(msg) => MeridianError::Storage {
                message: msg,
                source: None,
            },
            Error::InvalidState(msg) => MeridianError::InvalidInput { message: msg },
            Error::TransactionConflict(msg) => MeridianError::WriteConflict {
                entity_ref: EntityRef::kv(RunId::new(), msg),
            },
            Error::TransactionTimeout(_msg) => {
                // Legacy error doesn't have duration, default to 0
                MeridianError::TransactionTimeout { duration_ms: 0 }
            }
        }
    }
}

// =============================================================================
// Conversions from Standard Library Types
// =============================================================================

impl From<io::Error> for MeridianError {
    fn from(e: io::Error) -> Self {
        MeridianError::Storage {
            message: format!("IO error: {}", e),
            source: Some(Box::new(e)),
        }
    }
}

impl From<bincode::Error> for MeridianError {
    fn from(e: bincode::Error) -> Self {
        MeridianError::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for MeridianError {
    fn from(e: serde_json::Error) -> Self {
        MeridianError::Serialization {
            message: format!("JSON error: {}", e),
        }
    }
}

// =============================================================================
// MeridianError Tests
// =============================================================================
