//! Errors surfaced by metrics and resource-monitoring components.

use thiserror::Error;

/// Errors the metrics subsystem can report. Resource and latency
/// aggregation themselves cannot fail; this covers only the snapshot
/// serialization boundary.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A `get()` snapshot could not be serialized.
    #[error("metrics snapshot serialization error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Result alias for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;
