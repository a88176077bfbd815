//! The route-handler contract consumed by indexer worker threads.
//!
//! The HTTP server, JSON parsing, and route dispatch table are out of
//! scope; this module only fixes the boundary the worker loop calls across:
//! given a resolved route and a rehydrated request, invoke a handler and
//! emit (or not) a response.

use std::sync::Arc;

use meridian_core::{LogIndex, RouteKind, StartTs};

/// A rehydrated request handed to a route handler.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Parsed parameters (route params merged with query/body params).
    pub params: serde_json::Value,
    /// Full reassembled body.
    pub body: Vec<u8>,
    /// Consensus log index this request was applied at.
    pub log_index: LogIndex,
    /// The request's chunk group identifier.
    pub start_ts: StartTs,
    /// Whether this invocation is the aggregate of the last chunk (always
    /// true by the time a handler runs — chunks are only dispatched once
    /// complete).
    pub last_chunk_aggregate: bool,
    /// Hash identifying the matched route.
    pub route_hash: u64,
}

/// The response a handler populates.
#[derive(Debug, Clone, Default)]
pub struct HandlerResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body.
    pub body: Vec<u8>,
    /// Content-Type header value.
    pub content_type: String,
    /// Whether the originating client connection is still live.
    pub is_alive: bool,
    /// Whether this is the terminal write to the response (set by GC when
    /// force-finalizing a stuck in-flight entry).
    pub is_final: bool,
}

impl HandlerResponse {
    /// A response for a live client, defaulting to empty/200 until the
    /// handler runs.
    pub fn live() -> Self {
        HandlerResponse {
            status_code: 200,
            body: Vec::new(),
            content_type: "application/json".to_string(),
            is_alive: true,
            is_final: false,
        }
    }
}

/// A route handler: given a request, populate the response and report
/// success. Mirrors the external contract's `(req, res) -> bool` signature
/// — a `false` return is the Rust encoding of "the handler threw", and the
/// worker converts it to a 400 response.
pub trait RouteHandler: Send + Sync {
    /// Execute the handler. Returns `true` on success.
    fn handle(&self, req: &HandlerRequest, res: &mut HandlerResponse) -> bool;
}

/// A route resolved from `route_hash`, carrying everything the worker loop
/// needs to decide how to run it.
pub struct ResolvedRoute {
    /// The handler to invoke.
    pub handler: Arc<dyn RouteHandler>,
    /// Coarse classification driving resource guards, skip-writes
    /// exemptions, and metrics labels.
    pub kind: RouteKind,
    /// If true, the handler completes out-of-band; the worker never emits a
    /// response after calling it.
    pub is_async: bool,
}

/// Resolves a `route_hash` (computed by the out-of-scope dispatch layer) to
/// a [`ResolvedRoute`]. Implemented by whatever owns the route table
/// (the API layer in a full deployment).
pub trait RouteRegistry: Send + Sync {
    /// Look up the route matching `route_hash`.
    fn resolve(&self, route_hash: u64) -> Option<ResolvedRoute>;
}
