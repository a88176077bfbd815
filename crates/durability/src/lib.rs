//! Snapshot persistence for the write path.
//!
//! [`SnapshotStore`] is what `meridian-engine`'s `ReplicationState` drives
//! for `do_snapshot`/`load_latest_snapshot`: hard-linked checkpoint
//! directories with watermark metadata, independent of whatever on-disk
//! storage format the KV layer itself uses.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod snapshot_store;

pub use snapshot_store::{SnapshotMeta, SnapshotStore, SnapshotStoreError, SnapshotStoreResult};
