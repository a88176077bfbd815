//! The document store and search surface route handlers execute against.
//!
//! Deliberately opaque and minimal: the lexical/vector indexes themselves
//! (B-trees, posting lists, HNSW graphs) are out of scope for this crate's
//! responsibility. `CollectionStore` is the seam route handlers call
//! through; [`InMemoryCollectionStore`] is a reference implementation
//! built on the existing [`crate::scorer`]/[`crate::tokenizer`] pieces,
//! sufficient to exercise the write path end to end in tests.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use meridian_core::route::Deadline;
use serde_json::Value;
use thiserror::Error;

use crate::scorer::{BM25LiteScorer, Scorer, ScorerContext, SearchDoc};
use crate::tokenizer::tokenize;

/// Errors a `CollectionStore` implementation may report.
#[derive(Debug, Error)]
pub enum CollectionStoreError {
    /// No collection exists with that name.
    #[error("no such collection: {0}")]
    NoSuchCollection(String),
    /// The collection already exists.
    #[error("collection already exists: {0}")]
    AlreadyExists(String),
    /// The document was missing a usable `id` field or it was not a string.
    #[error("document must have a string \"id\" field")]
    MissingId,
    /// No document exists with that id.
    #[error("no such document: {0}")]
    NoSuchDocument(String),
}

/// Result alias for `CollectionStore` operations.
pub type StoreResult<T> = Result<T, CollectionStoreError>;

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The document's id.
    pub id: String,
    /// The full document.
    pub document: Value,
    /// Relevance score; higher is more relevant. Not normalized across
    /// scorers or queries.
    pub score: f32,
}

/// The result of a `search` call.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    /// Hits, ordered by descending score.
    pub hits: Vec<SearchHit>,
    /// Total matching documents in the collection (before any limit was
    /// applied) — informational only in this reference implementation.
    pub found: usize,
}

/// The opaque interface route handlers execute document operations
/// against. A real deployment plugs in lexical, faceted, numeric,
/// geospatial, and vector indexes behind this trait; none of that is
/// implemented here.
pub trait CollectionStore: Send + Sync {
    /// Create a new, empty collection. Errors if it already exists.
    fn create_collection(&self, name: &str) -> StoreResult<()>;

    /// Drop a collection and every document in it. Returns `true` if it
    /// existed.
    fn drop_collection(&self, name: &str) -> StoreResult<bool>;

    /// Whether a collection with this name currently exists.
    fn has_collection(&self, name: &str) -> bool;

    /// Insert or overwrite a document (keyed by its `id` field). Returns
    /// the id.
    fn upsert_document(&self, collection: &str, doc: Value) -> StoreResult<String>;

    /// Remove a document by id. Returns `true` if it existed.
    fn delete_document(&self, collection: &str, id: &str) -> StoreResult<bool>;

    /// Fetch a single document by id.
    fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Run a free-text query against a collection's documents.
    /// `deadline`, if present, is an extension point only — this
    /// reference implementation does not enforce a search cutoff.
    fn search(&self, collection: &str, query: &str, limit: usize, deadline: Option<Deadline>) -> StoreResult<SearchResults>;
}

/// Extract the searchable text of a document: every string-valued field,
/// concatenated in key order. Good enough for the reference scorer; a
/// real `CollectionStore` would index declared text fields per schema.
fn document_text(doc: &Value) -> String {
    match doc.as_object() {
        Some(map) => map
            .values()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        None => String::new(),
    }
}

fn document_id(doc: &Value) -> Option<String> {
    doc.get("id")?.as_str().map(str::to_string)
}

struct CollectionData {
    docs: DashMap<String, Value>,
}

impl CollectionData {
    fn new() -> Self {
        CollectionData { docs: DashMap::new() }
    }
}

/// A fully in-memory `CollectionStore`, suitable for tests and for wiring
/// the write path end to end without a real storage/search engine.
pub struct InMemoryCollectionStore {
    collections: DashMap<String, CollectionData>,
    scorer: BM25LiteScorer,
    doc_counter: AtomicU64,
}

impl InMemoryCollectionStore {
    /// Create an empty store with no collections.
    pub fn new() -> Self {
        InMemoryCollectionStore {
            collections: DashMap::new(),
            scorer: BM25LiteScorer::default(),
            doc_counter: AtomicU64::new(0),
        }
    }

    fn context_for(&self, data: &CollectionData) -> ScorerContext {
        let mut ctx = ScorerContext::new(data.docs.len());
        let mut total_len = 0usize;
        let mut doc_freqs: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for entry in data.docs.iter() {
            let text = document_text(entry.value());
            let tokens = tokenize(&text);
            total_len += tokens.len();
            for term in tokens.iter().collect::<std::collections::HashSet<_>>() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
        }
        ctx.doc_freqs = doc_freqs;
        ctx.avg_doc_len = if data.docs.is_empty() {
            0.0
        } else {
            total_len as f32 / data.docs.len() as f32
        };
        ctx
    }
}

impl Default for InMemoryCollectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionStore for InMemoryCollectionStore {
    fn create_collection(&self, name: &str) -> StoreResult<()> {
        if self.collections.contains_key(name) {
            return Err(CollectionStoreError::AlreadyExists(name.to_string()));
        }
        self.collections.insert(name.to_string(), CollectionData::new());
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> StoreResult<bool> {
        Ok(self.collections.remove(name).is_some())
    }

    fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    fn upsert_document(&self, collection: &str, mut doc: Value) -> StoreResult<String> {
        let data = self
            .collections
            .get(collection)
            .ok_or_else(|| CollectionStoreError::NoSuchCollection(collection.to_string()))?;
        let id = match document_id(&doc) {
            Some(id) => id,
            None => {
                let id = self.doc_counter.fetch_add(1, Ordering::Relaxed).to_string();
                if let Some(obj) = doc.as_object_mut() {
                    obj.insert("id".to_string(), Value::String(id.clone()));
                }
                id
            }
        };
        data.docs.insert(id.clone(), doc);
        Ok(id)
    }

    fn delete_document(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let data = self
            .collections
            .get(collection)
            .ok_or_else(|| CollectionStoreError::NoSuchCollection(collection.to_string()))?;
        Ok(data.docs.remove(id).is_some())
    }

    fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let data = self
            .collections
            .get(collection)
            .ok_or_else(|| CollectionStoreError::NoSuchCollection(collection.to_string()))?;
        Ok(data.docs.get(id).map(|e| e.value().clone()))
    }

    fn search(&self, collection: &str, query: &str, limit: usize, _deadline: Option<Deadline>) -> StoreResult<SearchResults> {
        let data = self
            .collections
            .get(collection)
            .ok_or_else(|| CollectionStoreError::NoSuchCollection(collection.to_string()))?;
        let ctx = self.context_for(&data);

        let mut scored: Vec<SearchHit> = data
            .docs
            .iter()
            .map(|entry| {
                let search_doc = SearchDoc::new(document_text(entry.value()));
                let score = self.scorer.score(&search_doc, query, &ctx);
                SearchHit {
                    id: entry.key().clone(),
                    document: entry.value().clone(),
                    score,
                }
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let found = scored.len();
        scored.truncate(limit);
        Ok(SearchResults { hits: scored, found })
    }
}
