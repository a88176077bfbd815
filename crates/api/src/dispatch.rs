//! The request dispatch pipeline: auth + rate-limit gate, then handoff to
//! the write path, per spec.md §2's dataflow line:
//! `request → auth + rate-limit gate → resource-pressure check →
//! if leader: propose to consensus; else forward to leader → ...`
//!
//! The resource-pressure check and the leader-forward-or-propose decision
//! both live inside `ReplicationState::write`; this module owns the two
//! gates that run before it ever sees the request.

use meridian_core::{LogIndex, RouteKind, StartTs};
use meridian_engine::replication::WriteDisposition;
use meridian_indexer::HandlerRequest;
use meridian_security::{merge_embedded_params, EntityType};

use crate::app_context::AppContext;
use crate::error::ApiError;

/// Everything the dispatch pipeline needs for one incoming request. The
/// HTTP framing and route resolution that produce this value are out of
/// scope (spec.md §1's "out of scope" list); this is the parsed result.
pub struct DispatchRequest {
    /// HTTP method.
    pub method: String,
    /// Request path, including query string.
    pub path: String,
    /// Parsed parameters; scoped-key embedded params are merged into this.
    pub params: serde_json::Value,
    /// Full request body (possibly gzip-compressed; decompression happens
    /// inside `ReplicationState::write` only once this node is confirmed
    /// leader).
    pub body: Vec<u8>,
    /// Target collection, or empty for collection-agnostic routes.
    pub collection: String,
    /// The action string checked against API-key `actions`
    /// (e.g. `"documents:search"`).
    pub action: String,
    /// Coarse route classification.
    pub kind: RouteKind,
    /// Whether this is a collection-update route (checked against
    /// in-progress alters).
    pub is_collection_update: bool,
    /// `(collection, presented_key)` pairs to authenticate. Most requests
    /// carry exactly one; multi-collection search carries several, and
    /// every pair must pass.
    pub auth_pairs: Vec<(String, String)>,
    /// `(entity_type, value)` pairs checked against rate-limit rules.
    pub rate_limit_entities: Vec<(EntityType, String)>,
    /// The request's chunk-group identifier.
    pub start_ts: StartTs,
    /// Hash identifying the matched route.
    pub route_hash: u64,
    /// Whether `body` is this request's final chunk. The transport layer
    /// (out of scope) sets this from the real chunked-transfer signal;
    /// every intermediate chunk of a multi-chunk request must set it false.
    pub is_last_chunk: bool,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_secs()
}

/// Run the auth and rate-limit gates, then hand the request to the write
/// path. Returns the same `WriteDisposition` `ReplicationState::write`
/// would, or an `ApiError` already mapped to its status-code contract.
pub fn dispatch(ctx: &AppContext, mut req: DispatchRequest) -> Result<WriteDisposition, ApiError> {
    let now = unix_now();

    if req.auth_pairs.iter().any(|(_, key)| key.is_empty()) {
        return Err(ApiError::Unauthorized);
    }

    let outcome = ctx.auth.authenticate(&req.action, &req.auth_pairs, now);
    if !outcome.authenticated {
        return Err(ApiError::Forbidden);
    }

    if let Some(params) = req.params.as_object_mut() {
        for embedded in &outcome.embedded_params {
            merge_embedded_params(params, embedded, false);
        }
    }

    if ctx.rate_limit.check(&req.rate_limit_entities, now) == meridian_security::RateLimitDecision::Deny {
        return Err(ApiError::RateLimited);
    }

    let handler_req = HandlerRequest {
        method: req.method,
        path: req.path,
        params: req.params,
        body: req.body,
        log_index: LogIndex::default(),
        start_ts: req.start_ts,
        last_chunk_aggregate: req.is_last_chunk,
        route_hash: req.route_hash,
    };

    ctx.replication
        .write(handler_req, req.kind, req.collection, req.is_collection_update)
        .map_err(ApiError::from)
}
