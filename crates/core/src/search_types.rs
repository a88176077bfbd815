//! Core search types for M6 Retrieval Surfaces
//!
//! This module defines the foundational search types used throughout M6:
//! - SearchRequest: Universal request type for all search APIs
//! - SearchBudget: Time and candidate limits for search execution
//! - SearchResponse: Results from any search operation
//! - SearchHit: Individual search result with score and rank
//! - SearchStats: Execution statistics for debugging/monitoring
//! - DocRef: Back-pointer to source record in any primitive
//! - PrimitiveKind: Enumeration of all searchable primitives
//!
//! These types define the interface contracts for search operations.
//! See `docs/architecture/M6_ARCHITECTURE.md` for authoritative specification.

use crate::types::{JsonDocId, Key, RunId};
use std::collections::HashMap;

// ============================================================================
// PrimitiveKind (Story #307)
// ============================================================================

/// Enumeration of all searchable primitives
///
/// This enum identifies which primitive a search result comes from,
/// enabling per-primitive filtering and statistics tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// Key-Value store
    Kv,
    /// JSON document store
    Json,
    /// Event log
    Event,
    /// State cell
    State,
    /// Trace store (reasoning logs)
    Trace,
    /// Run index
    Run,
    /// Vector store (M8)
    Vector,
}

impl PrimitiveKind {
    /// Returns all primitive kinds
    ///
    /// Useful for iterating over all primitives in composite search.
    pub fn all() -> &'static [PrimitiveKind] {
        &[
            PrimitiveKind::Kv,
            PrimitiveKind::Json,
            PrimitiveKind::Event,
            PrimitiveKind::State,
            PrimitiveKind::Trace,
            PrimitiveKind::Run,
            PrimitiveKind::Vector,
        ]
    }
}

impl std::fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimitiveKind::Kv => write!(f, "kv"),
            PrimitiveKind::Json => write!(f, "json"),
            PrimitiveKind::Event => write!(f, "event"),
            PrimitiveKind::State => write!(f, "state"),
            PrimitiveKind::Trace => write!(f, "trace"),
            PrimitiveKind::Run => write!(f, "run"),
            PrimitiveKind::Vector => write!(f, "vector"),
        }
    }
}

// ============================================================================
// DocRef (Story #306)
// ============================================================================

/// Reference back to source record
///
/// Every search hit contains a DocRef that can be used to retrieve
/// the actual data from the appropriate primitive. This is the
/// back-pointer model that avoids data duplication.
///
/// # Invariant
///
/// DocRef MUST have a variant for every searchable primitive.
/// When a new primitive is added, DocRef MUST be extended.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocRef {
    /// KV store entry
    Kv {
        /// Key of the KV entry
        key: Key,
    },

    /// JSON document
    Json {
        /// Key of the JSON collection
        key: Key,
        /// Document ID within the collection
        doc_id: JsonDocId,
    },

    /// Event log entry
    Event {
        /// Key of the event log
        log_key: Key,
        /// Sequence number within the log
        seq: u64,
    },

    /// State cell
    State {
        /// Key of the state cell
        key: Key,
    },

    /// Trace span
    Trace {
        /// Key of the trace store
        key: Key,
        /// Span ID within the trace
        span_id: u64,
    },

    /// Run metadata
    Run {
        /// Run ID
        run_id: RunId,
    },

    /// Vector entry (M8)
    Vector {
        /// Collection name
        collection: String,
        /// Vector key within collection
        key: String,
        /// Run ID for isolation
        run_id: RunId,
    },
}

impl DocRef {
    /// Get the primitive kind for this reference
    pub fn primitive_kind(&self) -> PrimitiveKind {
        match self {
            DocRef::Kv { .. } => PrimitiveKind::Kv,
            DocRef::Json { .. } => PrimitiveKind::Json,
            DocRef::Event { .. } => PrimitiveKind::Event,
            DocRef::State { .. } => PrimitiveKind::State,
            DocRef::Trace { .. } => PrimitiveKind::Trace,
            DocRef::Run { .. } => PrimitiveKind::Run,
            DocRef::Vector { .. } => PrimitiveKind::Vector,
        }
    }

    /// Get the run_id this reference belongs to
    pub fn run_id(&self) -> RunId {
        match self {
            DocRef::Kv { key } => key.namespace.run_id,
            DocRef::Json { key, .. } => key.namespace.run_id,
            DocRef::Event { log_key, .. } => log_key.namespace.run_id,
            DocRef::State { key } => key.namespace.run_id,
            DocRef::Trace { key, .. } => key.namespace.run_id,
            DocRef::Run { run_id } => *run_id,
            DocRef::Vector { run_id, .. } => *run_id,
        }
    }

    /// Create a vector document reference
    pub fn vector(run_id: RunId, collection: impl Into<String>, key: impl Into<String>) -> Self {
        DocRef::Vector {
            collection: collection.into(),
            key: key.into(),
            run_id,
        }
    }

    /// Check if this is a vector reference
    pub fn is_vector(&self) -> bool {
        matches!(self, DocRef::Vector { .. })
    }
}

// ============================================================================
// SearchBudget (Story #303)
// ============================================================================

/// Limits on search execution
///
/// Search operations respect these limits and return truncated
/// results rather than timing out or erroring. This provides
/// predictable latency and graceful degradation.
///
/// # Default Values
///
/// - max_wall_time_micros: 100,000 (100ms)
/// - max_candidates: 10,000
/// - max_candidates_per_primitive: 2,000
#[derive(Debug, Clone, Copy)]
pub struct SearchBudget {
    /// Hard stop on wall time (microseconds)
    pub max_wall_time_micros: u64,

    /// Maximum total candidates to consider
    pub max_candidates: usize,

    /// Maximum candidates per primitive (for composite search)
    pub max_candidates_per_primitive: usize,
}

impl Default for SearchBudget {
    fn default() -> Self {
        SearchBudget {
            max_wall_time_micros: 100_000, // 100ms
            max_candidates: 10_000,
            max_candidates_per_primitive: 2_000,
        }
    }
}

impl SearchBudget {
    /// Create a new SearchBudget with custom limits
    pub fn new(max_time_micros: u64, max_candidates: usize) -> Self {
        SearchBudget {
            max_wall_time_micros: max_time_micros,
            max_candidates,
            max_candidates_per_primitive: max_candidates / 6, // Split across 6 primitives
        }
    }

    /// Builder: set max wall time
    pub fn with_time(mut self, micros: u64) -> Self {
        self.max_wall_time_micros = micros;
        self
    }

    /// Builder: set max candidates
    pub fn with_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }

    /// Builder: set max candidates per primitive
    pub fn with_per_primitive(mut self, max: usize) -> Self {
        self.max_candidates_per_primitive = max;
        self
    }
}

// ============================================================================
// SearchMode (Story #302)
// ============================================================================

/// Search mode - determines the search strategy
///
/// M6 implements Keyword mode. Vector and Hybrid are reserved
/// for future milestones (M9+).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Keyword-based search using BM25-lite (M6 default)
    #[default]
    Keyword,
    /// Reserved for future vector search (M9)
    Vector,
    /// Reserved for future hybrid search (keyword + vector)
    Hybrid,
}

// ============================================================================
// SearchRequest (Story #302)
// ============================================================================

/// Request for search across primitives
///
/// This is the universal search request type used by both
/// primitive-level search (e.g., `kv.search()`) and composite
/// search (e.g., `db.hybrid().search()`).
///
/// # Invariant
///
/// The same SearchRequest type is used for all search operations.
/// This invariant must not change.
///
/// # Examples
///
/// ```
/// use meridian_core::{SearchRequest, SearchBudget, RunId};
///
/// let run_id = RunId::new();
/// let req = SearchRequest::new(run_id, "authentication error")
///     .with_k(20)
///     .with_budget(SearchBudget::default().with_time(50_000));
///
/// assert_eq!(req.query, "authentication error");
/// assert_eq!(req.k, 20);
/// ```
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Run to search within
    pub run_id: RunId,

    /// Query string (interpreted by scorer)
    pub query: String,

    /// Maximum results to return (top-k)
    pub k: usize,

    /// Time and work limits
    pub budget: SearchBudget,

    /// Search mode (Keyword, Vector, Hybrid)
    pub mode: SearchMode,

    /// Optional: limit to specific primitives (for composite search)
    pub primitive_filter: Option<Vec<PrimitiveKind>>,

    /// Optional: time range filter (microseconds since epoch)
    pub time_range: Option<(u64, u64)>,

    /// Optional: tag filter (match any)
    pub tags_any: Vec<String>,
}

impl SearchRequest {
    /// Create a new SearchRequest with defaults
    ///
    /// Default values:
    /// - k: 10
    /// - budget: SearchBudget::default()
    /// - mode: SearchMode::Keyword
    /// - primitive_filter: None (search all primitives)
    /// - time_range: None
    /// - tags_any: empty
    pub fn new(run_id: RunId, query: impl Into<String>) -> Self {
        SearchRequest {
            run_id,
            query: query.into(),
            k: 10,
            budget: SearchBudget::default(),
            mode: SearchMode::default(),
            primitive_filter: None,
            time_range: None,
            tags_any: vec![],
        }
    }

    /// Builder: set top-k results count
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Builder: set search budget
    pub fn with_budget(mut self, budget: SearchBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Builder: set search mode
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder: set primitive filter
    pub fn with_primitive_filter(mut self, filter: Vec<PrimitiveKind>) -> Self {
        self.primitive_filter = Some(filter);
        self
    }

    /// Builder: set time range filter
    pub fn with_time_range(mut self, start: u64, end: u64) -> Self {
        self.time_range = Some((start, end));
        self
    }

    /// Builder: set tags filter
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags_any = tags;
        self
    }

    /// Check if a primitive is included in this request
    pub fn includes_primitive(&self, kind: PrimitiveKind) -> bool {
        match &self.primitive_filter {
            Some(filter) => filter.contains(&kind),
            None => true, // No filter means include all
        }
    }
}

// ============================================================================
// SearchHit (Story #305)
// ============================================================================

/// A single search result
///
/// Contains a back-pointer to the source record (DocRef),
/// the score from the scorer, and the rank in the result set.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Back-pointer to source record
    pub doc_ref: DocRef,

    /// Score from scorer (higher = more relevant)
    pub score: f32,

    /// Rank in result set (1-indexed)
    pub rank: u32,

    /// Optional snippet for display
    pub snippet: Option<String>,
}

impl SearchHit {
    /// Create a new SearchHit
    pub fn new(doc_ref: DocRef, score: f32, rank: u32) -> Self {
        SearchHit {
            doc_ref,
            score,
            rank,
            snippet: None,
        }
    }

    /// Builder: set snippet
    pub fn with_snippet(mut self, snippet: String) -> Self {
        self.snippet = Some(snippet);
        self
    }
}

// ============================================================================
// SearchStats (Story #305)
// ============================================================================

/// Execution statistics for a search
///
/// Provides metadata about how the search was executed,
/// useful for debugging and monitoring.
#[derive(Debug, Clone, Default)]
pub struct SearchStats {
    /// Time spent in search (microseconds)
    pub elapsed_micros: u64,

    /// Total candidates considered
    pub candidates_considered: usize,

    /// Candidates per primitive (for composite search)
    pub candidates_by_primitive: HashMap<PrimitiveKind, usize>,

    /// Whether an index was used (vs. full scan)
    pub index_used: bool,
}

impl SearchStats {
    /// Create new SearchStats
    pub fn new(elapsed_micros: u64, candidates: usize) -> Self {
        SearchStats {
            elapsed_micros,
            candidates_considered: candidates,
            candidates_by_primitive: HashMap::new(),
            index_used: false,
        }
    }

    /// Builder: set index_used flag
    pub fn with_index_used(mut self, used: bool) -> Self {
        self.index_used = used;
        self
    }

    /// Add candidates count for a primitive
    pub fn add_primitive_candidates(&mut self, kind: PrimitiveKind, count: usize) {
        self.candidates_by_primitive.insert(kind, count);
        self.candidates_considered += count;
    }
}

// ============================================================================
// SearchResponse (Story #304)
// ============================================================================

/// Search results
///
/// Returned by both primitive-level and composite search.
/// Contains ranked hits plus execution metadata.
///
/// # Invariant
///
/// All search methods return SearchResponse. No primitive-specific
/// result types. This invariant must not change.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// Ranked hits (highest score first)
    pub hits: Vec<SearchHit>,

    /// True if budget caused early termination
    pub truncated: bool,

    /// Execution statistics
    pub stats: SearchStats,
}

impl SearchResponse {
    /// Create an empty response
    pub fn empty() -> Self {
        SearchResponse {
            hits: vec![],
            truncated: false,
            stats: SearchStats::default(),
        }
    }

    /// Create a new response
    pub fn new(hits: Vec<SearchHit>, truncated: bool, stats: SearchStats) -> Self {
        SearchResponse {
            hits,
            truncated,
            stats,
        }
    }

    /// Check if response has no hits
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Get number of hits
    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
