//! In-memory storage layer for Meridian.
//!
//! - [`UnifiedStore`]: BTreeMap-based storage with RwLock
//! - [`ShardedStore`]: DashMap + HashMap for lock-free reads, per-run sharding
//! - Secondary indices ([`RunIndex`], [`TypeIndex`], [`TTLIndex`])
//! - [`TTLCleaner`] background task for expiration
//! - [`KvStore`]/[`InMemoryKvStore`]: the opaque key-value trait the
//!   write-path indexer and auth/rate-limit managers are built against.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleaner;
pub mod index;
pub mod kv_store; // opaque KvStore trait consumed by the write-path components
pub mod sharded;
pub mod snapshot;
pub mod stored_value;
pub mod ttl;
pub mod unified;

pub use kv_store::{InMemoryKvStore, KvError, KvResult, KvStore, ScanEntry};

pub use cleaner::TTLCleaner;
pub use index::{RunIndex, TypeIndex};
pub use sharded::{Shard, ShardedSnapshot, ShardedStore};
pub use snapshot::ClonedSnapshotView;
pub use ttl::TTLIndex;
pub use unified::UnifiedStore;
