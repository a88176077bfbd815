//! Request/route metadata shared by the indexer, replication, and API layers.
//!
//! These types describe the shape of an inbound mutating request without
//! depending on any HTTP framing — the transport layer (out of scope) is
//! expected to populate a [`RouteContext`] before handing a request to
//! `ReplicationState::write`.

use std::time::Duration;

/// Coarse classification of a route, used by resource checks, skip-writes
/// mode, and metrics label hoisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    /// A search/read query against a collection.
    Search,
    /// A bulk document import.
    Import,
    /// A single document create/update.
    DocWrite,
    /// A document delete.
    DocDelete,
    /// Collection creation.
    CollectionCreate,
    /// Collection schema update (`update collection`).
    CollectionUpdate,
    /// `/config` writes — always allowed through skip-writes mode.
    ConfigWrite,
    /// Health probe — always allowed through resource checks.
    Health,
    /// Anything else (API keys, analytics rules, etc).
    Other,
}

impl RouteKind {
    /// Whether a resource-pressure rejection applies to this route kind.
    ///
    /// Health probes and deletes are always allowed through, matching the
    /// worker-loop contract: resource exhaustion only blocks writes that
    /// consume storage.
    pub fn is_resource_guarded(self) -> bool {
        !matches!(self, RouteKind::Health | RouteKind::DocDelete)
    }

    /// Whether this route is exempt from skip-writes mode.
    pub fn passes_skip_writes(self) -> bool {
        matches!(self, RouteKind::ConfigWrite | RouteKind::Health)
    }

    /// The metrics label this route kind is hoisted to at the top level.
    pub fn metrics_label(self) -> Option<&'static str> {
        match self {
            RouteKind::Search => Some("search"),
            RouteKind::Import => Some("import"),
            RouteKind::DocWrite => Some("doc_write"),
            RouteKind::DocDelete => Some("doc_delete"),
            _ => None,
        }
    }
}

/// A per-request deadline, threaded through to `CollectionStore` for search
/// cutoff enforcement.
///
/// This is an extension point only: the source's `search_stop_ms` /
/// `search_cutoff` thread-locals are not set anywhere in the code available
/// for grounding, so no cutoff *policy* is implemented here. A reference
/// `CollectionStore` may ignore this value entirely.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    /// Budget remaining when the deadline was constructed.
    pub remaining: Duration,
}

impl Deadline {
    /// Construct a deadline with the given remaining budget.
    pub fn new(remaining: Duration) -> Self {
        Deadline { remaining }
    }
}

/// Identifies a request across chunks, retries, and log replay.
///
/// Mirrors the WAL key layout's `start_ts` component: a monotonically
/// increasing, process-unique timestamp assigned when the first chunk of a
/// request arrives.
pub type StartTs = u64;

/// A consensus log index, assigned once a request is committed.
pub type LogIndex = u64;
