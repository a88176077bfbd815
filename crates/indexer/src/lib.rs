//! Durable request queuing and per-collection apply threads.
//!
//! This crate sits between `ReplicationState` (which commits a request to
//! the consensus log and calls `enqueue` from the apply thread) and the
//! route-handler layer (owned by the API crate in a full deployment): it
//! persists request chunks to a [`meridian_storage::KvStore`], reassembles
//! them once complete, and dispatches each completed request to one of a
//! fixed pool of per-collection worker threads in arrival order.

pub mod error;
pub mod handler;
pub mod indexer;
pub mod model;

pub use error::{IndexerError, IndexerResult};
pub use handler::{HandlerRequest, HandlerResponse, ResolvedRoute, RouteHandler, RouteRegistry};
pub use indexer::{
    AlwaysOk, BatchedIndexer, IndexerConfig, NullDispatcher, ResourceCheck, ResourceStatus,
    ResponseDispatcher,
};
pub use model::{InFlightRequest, IndexerSnapshot, IndexerSnapshotEntry, LoggedRequest, SkipIndex};
