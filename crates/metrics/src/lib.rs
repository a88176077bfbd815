//! Windowed request metrics and cached resource-pressure checks.
//!
//! `AppMetrics`/`ResourceMonitor` are process-wide singletons in the
//! source; here they are plain values meant to live behind one
//! `AppContext`, constructed fresh per test and per server instance.

pub mod app_metrics;
pub mod error;
pub mod resource_monitor;

pub use app_metrics::{AppMetrics, WindowedMetrics};
pub use error::{MetricsError, MetricsResult};
pub use resource_monitor::{OsStatSource, ResourceCheck, ResourceMonitor, SystemStatSource};

/// Bridges [`ResourceMonitor`] to the indexer's narrower
/// [`meridian_indexer::ResourceCheck`] predicate trait, so a worker can
/// consult resource pressure without the indexer crate depending on this
/// one.
pub struct IndexerResourceBridge(pub std::sync::Arc<ResourceMonitor>);

impl meridian_indexer::ResourceCheck for IndexerResourceBridge {
    fn status(&self) -> meridian_indexer::ResourceStatus {
        match self.0.has_enough_resources() {
            ResourceCheck::Ok => meridian_indexer::ResourceStatus::Ok,
            ResourceCheck::OutOfDisk => meridian_indexer::ResourceStatus::OutOfDisk,
            ResourceCheck::OutOfMemory => meridian_indexer::ResourceStatus::OutOfMemory,
        }
    }
}
