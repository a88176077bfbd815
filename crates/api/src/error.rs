//! `ApiError`: the category → status-code mapping from spec.md §7.
//!
//! Errors are categorized, not individually typed — each variant carries
//! just enough to render the fixed surface behavior its category defines.

use meridian_engine::replication::{ReplicationError, WriteRejection};
use meridian_indexer::ResourceStatus;
use meridian_security::AuthError;
use thiserror::Error;

/// A dispatch-time error, already mapped to its HTTP status contract.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed JSON, missing required fields, bad parameter types — 400.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// No key presented at all — 401.
    #[error("missing API key")]
    Unauthorized,
    /// A key was presented but is not permitted for this action/collection,
    /// or scoped-key verification failed — 403. Body is always the generic
    /// "Forbidden." to avoid giving an oracle to scoped-key guessers.
    #[error("forbidden")]
    Forbidden,
    /// A rate-limit rule denied the request — 429.
    #[error("rate limited")]
    RateLimited,
    /// Disk or memory pressure on a resource-guarded write — 422.
    #[error("resource exhausted: {0:?}")]
    ResourceExhausted(ResourceStatus),
    /// Skip-writes mode is active — 422.
    #[error("writes are currently disabled")]
    SkipWrites,
    /// A collection-update conflicts with one already in progress — 422.
    #[error("alter already in progress for this collection")]
    AlterInProgress,
    /// An API-key value collides with an existing key or the bootstrap
    /// key — 409.
    #[error("conflict: {0}")]
    Conflict(String),
    /// A second on-demand snapshot was requested while one is running — 409.
    #[error("snapshot already in progress")]
    SnapshotInProgress,
    /// Not leader, and no leader could be found to forward to — 500.
    #[error("could not find a leader")]
    NoLeader,
    /// KV-store failures and other unhandled errors — 500.
    #[error("internal error: {0}")]
    Internal(String),
    /// The node is shutting down — 503.
    #[error("shutting down")]
    ShuttingDown,
}

impl ApiError {
    /// The HTTP status code this error's category maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized => 401,
            ApiError::Forbidden => 403,
            ApiError::RateLimited => 429,
            ApiError::ResourceExhausted(_) => 422,
            ApiError::SkipWrites => 422,
            ApiError::AlterInProgress => 422,
            ApiError::Conflict(_) => 409,
            ApiError::SnapshotInProgress => 409,
            ApiError::NoLeader => 500,
            ApiError::Internal(_) => 500,
            ApiError::ShuttingDown => 503,
        }
    }

    /// Whether this category should be logged at error level. Validation
    /// failures are expected client behavior and are not.
    pub fn is_loggable(&self) -> bool {
        !matches!(self, ApiError::BadRequest(_) | ApiError::Forbidden | ApiError::RateLimited)
    }
}

impl From<WriteRejection> for ApiError {
    fn from(rejection: WriteRejection) -> Self {
        match rejection {
            WriteRejection::ShuttingDown => ApiError::ShuttingDown,
            WriteRejection::ResourceExhausted(status) => ApiError::ResourceExhausted(status),
            WriteRejection::SkipWrites => ApiError::SkipWrites,
            WriteRejection::AlterInProgress => ApiError::AlterInProgress,
            WriteRejection::NoLeader => ApiError::NoLeader,
        }
    }
}

impl From<ReplicationError> for ApiError {
    fn from(err: ReplicationError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::DuplicateValue => ApiError::Conflict(err.to_string()),
            AuthError::NotFound(_) => ApiError::BadRequest(err.to_string()),
            AuthError::Corrupt(_) | AuthError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}
