//! `AppContext`: the process-wide state the source accesses through
//! singletons (`AuthManager`, `RateLimitManager`, `AppMetrics`,
//! `ResourceMonitor`), re-expressed as a single value threaded through
//! constructors, per spec.md §9's design note. Tests build a fresh
//! `AppContext` per case rather than sharing global state.

use std::sync::Arc;

use meridian_engine::replication::ReplicationState;
use meridian_metrics::AppMetrics;
use meridian_search::CollectionStore;
use meridian_security::{ApiKey, AuthManager, RateLimitManager};

use crate::error::ApiError;

/// Everything a request handler needs, bundled into one value instead of
/// reached for through singletons.
pub struct AppContext {
    /// API-key CRUD and authentication.
    pub auth: Arc<AuthManager>,
    /// Rate-limit rule evaluation.
    pub rate_limit: Arc<RateLimitManager>,
    /// The write path: admission, forwarding, and proposal to consensus.
    pub replication: Arc<ReplicationState>,
    /// Document storage and search.
    pub collections: Arc<dyn CollectionStore>,
    /// Request-count and latency aggregation.
    pub metrics: Arc<AppMetrics>,
}

impl AppContext {
    /// Bundle an already-constructed set of subsystems into one context.
    pub fn new(
        auth: Arc<AuthManager>,
        rate_limit: Arc<RateLimitManager>,
        replication: Arc<ReplicationState>,
        collections: Arc<dyn CollectionStore>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        AppContext {
            auth,
            rate_limit,
            replication,
            collections,
            metrics,
        }
    }

    /// Create and persist a new API key, mapping a value collision onto the
    /// same 409 `Conflict` a real admin-key-creation surface (out of scope
    /// here) would return. The one caller of `AuthManager::create_key`
    /// outside of tests.
    pub fn create_key(
        &self,
        description: String,
        actions: Vec<String>,
        collections: Vec<String>,
        expires_at: Option<u64>,
        autodelete: bool,
        value: Option<String>,
    ) -> Result<ApiKey, ApiError> {
        self.auth
            .create_key(description, actions, collections, expires_at, autodelete, value)
            .map_err(ApiError::from)
    }
}
