//! Canonical primitive value types (events, JSON paths/patches, state,
//! vector metadata) shared by any crate that needs to reason about document
//! shape, independent of how it's stored or indexed.

pub mod event;
pub mod state;
pub mod vector;

// JSON path/patch types live at the crate root (`crate::json`), not here —
// they predate this module and external callers already address them as
// `meridian_core::json::*`.

// Re-export all types at module level
pub use event::{ChainVerification, Event};
pub use state::State;
pub use vector::{
    CollectionId, CollectionInfo, DistanceMetric, FilterCondition, FilterOp, JsonScalar,
    MetadataFilter, StorageDtype, VectorConfig, VectorEntry, VectorId, VectorMatch,
};
