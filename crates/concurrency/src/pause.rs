//! The pause-mutex: a reader-writer lock that lets indexer worker threads
//! run freely in the common case, but lets a snapshot task quiesce every
//! worker for the short critical section needed to serialize in-flight
//! state and create a storage checkpoint.
//!
//! Workers acquire [`PauseMutex::run`] (shared) for the duration of a single
//! handler invocation. The snapshot coordinator acquires
//! [`PauseMutex::quiesce`] (exclusive), which blocks until every in-flight
//! handler call returns, and blocks new ones from starting until it is
//! dropped.
//!
//! Grounded on the shard-lock pattern in `TransactionManager`
//! (`crates/concurrency/src/manager.rs`), generalized from per-branch commit
//! locks to a single global quiesce lock.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared/exclusive lock quiescing indexer workers during a snapshot.
#[derive(Default)]
pub struct PauseMutex {
    inner: RwLock<()>,
}

/// RAII guard held by a worker while executing a handler. Dropping it
/// releases the shared lock.
pub struct RunGuard<'a>(#[allow(dead_code)] RwLockReadGuard<'a, ()>);

/// RAII guard held by the snapshot coordinator while all workers are
/// quiesced. Dropping it resumes worker dispatch.
pub struct QuiesceGuard<'a>(#[allow(dead_code)] RwLockWriteGuard<'a, ()>);

impl PauseMutex {
    /// Create a new, unquiesced pause-mutex.
    pub fn new() -> Self {
        PauseMutex::default()
    }

    /// Acquire the lock in shared mode for the duration of one handler call.
    /// Blocks only if a snapshot is currently quiescing workers.
    pub fn run(&self) -> RunGuard<'_> {
        RunGuard(self.inner.read())
    }

    /// Acquire the lock in exclusive mode, blocking until every in-flight
    /// handler call has returned. While held, no new `run()` call can
    /// proceed.
    pub fn quiesce(&self) -> QuiesceGuard<'_> {
        QuiesceGuard(self.inner.write())
    }
}
