//! `BatchedIndexer`: durable request queuing and per-collection apply
//! threads.
//!
//! Grounded on the worker-pool plumbing in `crates/engine/src/background.rs`
//! (condvar-woken workers, careful lock-before-notify to avoid a lost
//! wakeup, an `ActiveTaskGuard`-style completion accounting) generalized
//! from a priority heap shared across all workers to one FIFO queue per
//! collection, and on the request lifecycle described in
//! `batched_indexer.cpp` (chunk persistence, the `waiting_on_ids` replay
//! barrier, the GC loop's stuck-counter heuristic).

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use meridian_concurrency::PauseMutex;
use meridian_core::{RouteKind, StartTs};
use meridian_storage::KvStore;

use crate::error::IndexerResult;
use crate::handler::{HandlerRequest, HandlerResponse, RouteRegistry};
use crate::model::{
    request_chunk_key, request_prefix_hi, request_prefix_lo, skip_index_key, IndexerSnapshot,
    IndexerSnapshotEntry, InFlightRequest, SkipIndex, INDEXER_STATE_KEY,
};

/// Outcome of a resource-pressure check, consulted before running a
/// resource-guarded handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    /// Resources are healthy.
    Ok,
    /// Disk usage exceeds the configured threshold.
    OutOfDisk,
    /// Memory usage exceeds the configured threshold.
    OutOfMemory,
}

/// Resource-pressure predicate consulted by worker threads before running a
/// resource-guarded handler. Implemented by `meridian-metrics`'s
/// `ResourceMonitor`; kept as a trait here so the indexer does not depend on
/// the metrics crate.
pub trait ResourceCheck: Send + Sync {
    /// Current resource status.
    fn status(&self) -> ResourceStatus;
}

/// Delivers a handler's response back to the originating client, or
/// discards it if the client disconnected. The HTTP transport itself is out
/// of scope; this is the dispatcher seam the worker loop calls into.
pub trait ResponseDispatcher: Send + Sync {
    /// Emit `res` for the request identified by `start_ts`.
    fn emit(&self, start_ts: StartTs, res: &HandlerResponse);
}

/// A no-op dispatcher, useful for tests and for log-replay-only nodes where
/// there is no live client to respond to.
pub struct NullDispatcher;

impl ResponseDispatcher for NullDispatcher {
    fn emit(&self, _start_ts: StartTs, _res: &HandlerResponse) {}
}

/// An always-healthy resource check, useful for tests.
pub struct AlwaysOk;

impl ResourceCheck for AlwaysOk {
    fn status(&self) -> ResourceStatus {
        ResourceStatus::Ok
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Tunables for the batched indexer.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Number of per-collection worker threads.
    pub num_workers: usize,
    /// In-flight entries not completed within this many seconds since their
    /// last update are garbage-collected.
    pub gc_prune_max_seconds: u64,
    /// GC loop wake interval.
    pub gc_interval: Duration,
    /// If set, writes other than `/config` are rejected with 422 (the
    /// "skip-writes" maintenance mode).
    pub skip_writes: Arc<AtomicBool>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            num_workers: 4,
            gc_prune_max_seconds: 3600,
            gc_interval: Duration::from_secs(1),
            skip_writes: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// A per-worker FIFO queue of `start_ts` values whose chunks have fully
/// arrived and are ready to apply.
struct WorkerQueue {
    queue: Mutex<VecDeque<StartTs>>,
    cv: Condvar,
}

impl WorkerQueue {
    fn new() -> Self {
        WorkerQueue {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        }
    }

    fn push(&self, start_ts: StartTs) {
        let mut q = self.queue.lock();
        q.push_back(start_ts);
        self.cv.notify_one();
    }
}

/// djb2-derived hash matching the source's `hash_wy` well enough for stable,
/// uniform bucket assignment; the exact hash function is not part of the
/// external contract, only that it is stable per collection name.
fn hash_wy(name: &str) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in name.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

struct SharedState {
    in_flight: Mutex<FxHashMap<StartTs, InFlightRequest>>,
    collection_in_flight: Mutex<HashMap<String, BTreeSet<StartTs>>>,
    drain_cv: Condvar,
    coll_to_references: Mutex<HashMap<String, HashSet<String>>>,
    skip_index: Mutex<SkipIndex>,
    queued_writes: AtomicI64,
    applying_log_index: AtomicU64,
    quit: AtomicBool,
    is_replay: AtomicBool,
}

/// Durable request queuing and per-collection apply threads.
pub struct BatchedIndexer {
    store: Arc<dyn KvStore>,
    registry: Arc<dyn RouteRegistry>,
    dispatcher: Arc<dyn ResponseDispatcher>,
    resource: Arc<dyn ResourceCheck>,
    config: IndexerConfig,
    queues: Vec<Arc<WorkerQueue>>,
    shared: Arc<SharedState>,
    pause: Arc<PauseMutex>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BatchedIndexer {
    /// Construct a new indexer. Worker threads are not started until
    /// [`BatchedIndexer::start`] is called.
    pub fn new(
        store: Arc<dyn KvStore>,
        registry: Arc<dyn RouteRegistry>,
        dispatcher: Arc<dyn ResponseDispatcher>,
        resource: Arc<dyn ResourceCheck>,
        pause: Arc<PauseMutex>,
        config: IndexerConfig,
    ) -> Arc<Self> {
        let queues = (0..config.num_workers.max(1))
            .map(|_| Arc::new(WorkerQueue::new()))
            .collect();
        Arc::new(BatchedIndexer {
            store,
            registry,
            dispatcher,
            resource,
            config,
            queues,
            shared: Arc::new(SharedState {
                in_flight: Mutex::new(FxHashMap::default()),
                collection_in_flight: Mutex::new(HashMap::new()),
                drain_cv: Condvar::new(),
                coll_to_references: Mutex::new(HashMap::new()),
                skip_index: Mutex::new(SkipIndex::new()),
                queued_writes: AtomicI64::new(0),
                applying_log_index: AtomicU64::new(0),
                quit: AtomicBool::new(false),
                is_replay: AtomicBool::new(false),
            }),
            pause,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Mark the indexer as currently replaying the log (enables the
    /// reference-ordering barrier). Cleared once replay catches up to live
    /// traffic.
    pub fn set_replay_mode(&self, replaying: bool) {
        self.shared.is_replay.store(replaying, Ordering::SeqCst);
    }

    /// Spawn the per-collection worker threads. Idempotent only on first
    /// call; calling twice spawns duplicate workers.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        for worker_id in 0..self.queues.len() {
            let indexer = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name(format!("indexer-worker-{worker_id}"))
                .spawn(move || indexer.worker_loop(worker_id))
                .expect("failed to spawn indexer worker thread");
            workers.push(handle);
        }
    }

    /// Signal every worker and the GC loop to stop, and wait for them to
    /// exit.
    pub fn shutdown(&self) {
        self.shared.quit.store(true, Ordering::SeqCst);
        for q in &self.queues {
            let _g = q.queue.lock();
            q.cv.notify_all();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Count of apply-pending chunks, tracked monotonically as chunks are
    /// enqueued and reset as requests drain.
    pub fn get_queued_writes(&self) -> i64 {
        self.shared.queued_writes.load(Ordering::SeqCst)
    }

    /// The shared/exclusive lock worker threads hold while executing a
    /// handler; snapshot code acquires it exclusive to quiesce writers
    /// before serializing in-flight state.
    pub fn pause_mutex(&self) -> &PauseMutex {
        &self.pause
    }

    /// Record that `dependent` references `referenced` collections, so
    /// replay can enforce creation ordering.
    pub fn record_reference(&self, dependent: impl Into<String>, referenced: HashSet<String>) {
        if referenced.is_empty() {
            return;
        }
        self.shared
            .coll_to_references
            .lock()
            .insert(dependent.into(), referenced);
    }

    /// Collections referenced by `collection`, if any were recorded.
    pub fn referenced_by(&self, collection: &str) -> Option<HashSet<String>> {
        self.shared.coll_to_references.lock().get(collection).cloned()
    }

    /// Persist the in-progress log index so a crash mid-apply can be
    /// diagnosed, and so the next apply knows what was being applied.
    pub fn persist_applying_index(&self, log_index: u64) -> IndexerResult<()> {
        self.shared.applying_log_index.store(log_index, Ordering::SeqCst);
        self.store.insert(&skip_index_key(log_index), b"applying")?;
        Ok(())
    }

    /// Remove every skip-index key from the store; called during snapshot
    /// save after the meta store has been flushed.
    pub fn clear_skip_indices(&self) -> IndexerResult<()> {
        self.shared.skip_index.lock().clear();
        let hi = [crate::model::SKIP_INDEX_PREFIX, &[0xFFu8; 8][..]].concat();
        self.store.delete_range(crate::model::SKIP_INDEX_PREFIX, &hi)?;
        Ok(())
    }

    /// Mark a log index to be skipped on next apply (operator-driven
    /// recovery from a crash correlated with a specific index).
    pub fn mark_skip_index(&self, log_index: u64) {
        self.shared.skip_index.lock().mark(log_index);
    }

    /// Called on the consensus apply thread only. Persists the chunk,
    /// updates the in-flight map, and — once the last chunk has arrived —
    /// dispatches `start_ts` to the worker selected by
    /// `hash_wy(collection) mod num_workers`.
    ///
    /// Never blocks on indexing work; failures are logged and the chunk is
    /// dropped rather than propagated, matching the apply thread's
    /// must-never-block contract.
    pub fn enqueue(&self, mut req: HandlerRequest, kind: RouteKind, collection: String, is_alive: bool) {
        let now = now_secs();
        let start_ts = req.start_ts;

        let chunk_sequence = {
            let mut in_flight = self.shared.in_flight.lock();
            match in_flight.get_mut(&start_ts) {
                None => {
                    in_flight.insert(start_ts, InFlightRequest::first_chunk(kind, collection.clone(), now));
                    self.shared
                        .collection_in_flight
                        .lock()
                        .entry(collection.clone())
                        .or_default()
                        .insert(start_ts);
                    0
                }
                Some(entry) => {
                    let seq = entry.num_chunks;
                    entry.num_chunks += 1;
                    entry.last_updated = now;
                    entry.is_alive = entry.is_alive && is_alive;
                    seq
                }
            }
        };

        let chunk_key = request_chunk_key(start_ts, chunk_sequence);
        let logged = crate::model::LoggedRequest {
            start_ts,
            route_hash: req.route_hash,
            http_method: req.method.clone(),
            path: req.path.clone(),
            params: req.params.clone(),
            body_chunk: std::mem::take(&mut req.body),
            is_last_chunk: req.last_chunk_aggregate,
            chunk_index: chunk_sequence,
            log_index: req.log_index,
        };

        match serde_json::to_vec(&logged) {
            Ok(bytes) => {
                if let Err(e) = self.store.insert(&chunk_key, &bytes) {
                    warn!(error = %e, start_ts, "failed to persist WAL chunk, dropping");
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, start_ts, "failed to serialize WAL chunk, dropping");
                return;
            }
        }

        if req.last_chunk_aggregate {
            self.shared
                .queued_writes
                .fetch_add(chunk_sequence as i64 + 1, Ordering::SeqCst);

            {
                let mut in_flight = self.shared.in_flight.lock();
                if let Some(entry) = in_flight.get_mut(&start_ts) {
                    entry.is_complete = true;
                }
            }

            let worker_id = (hash_wy(&collection) as usize) % self.queues.len().max(1);
            self.queues[worker_id].push(start_ts);
            debug!(start_ts, worker_id, collection = %collection, "dispatched request to worker");
        }
    }

    /// Serialize in-flight state for a snapshot. Requires the pause-mutex be
    /// held exclusive by the caller (enforced only by documentation here, as
    /// in the source — the worker loop cooperates by taking `pause.run()`).
    ///
    /// Every in-flight entry is captured, complete or not, along with its
    /// real `next_chunk_index` — an incomplete entry dropped here would be
    /// silently lost on restart, and a complete one restored with
    /// `next_chunk_index` reset to 0 would reprocess already-applied chunks.
    pub fn serialize_state(&self) -> IndexerResult<Vec<u8>> {
        let in_flight = self.shared.in_flight.lock();
        let mut entries: Vec<IndexerSnapshotEntry> = in_flight
            .iter()
            .map(|(start_ts, v)| IndexerSnapshotEntry {
                start_ts: *start_ts,
                collection: v.collection.clone(),
                num_chunks: v.num_chunks,
                next_chunk_index: v.next_chunk_index,
                is_complete: v.is_complete,
            })
            .collect();
        entries.sort_unstable_by_key(|e| e.start_ts);

        let snapshot = IndexerSnapshot {
            in_flight: entries,
            queued_writes: self.shared.queued_writes.load(Ordering::SeqCst),
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        self.store.insert(INDEXER_STATE_KEY, &bytes)?;
        Ok(bytes)
    }

    /// Restore in-flight state from a snapshot, re-enqueuing only the
    /// *complete* entries onto their worker queues (in original `start_ts`
    /// order) *before* returning — callers must start workers only after
    /// this returns, or queue order is not guaranteed. Incomplete entries
    /// are restored into the in-flight map so their remaining chunks append
    /// correctly, but are not queued until their last chunk actually arrives
    /// through [`BatchedIndexer::enqueue`].
    pub fn load_state(&self, bytes: &[u8]) -> IndexerResult<()> {
        let snapshot: IndexerSnapshot = serde_json::from_slice(bytes)?;
        self.shared
            .queued_writes
            .store(snapshot.queued_writes, Ordering::SeqCst);

        for entry in snapshot.in_flight {
            let start_ts = entry.start_ts;
            let lo = request_prefix_lo(start_ts);
            let hi = request_prefix_hi(start_ts);
            let chunks = self.store.scan(&lo, &hi)?;
            if chunks.is_empty() {
                continue;
            }

            // Recover the route kind from the first chunk's route hash so
            // resource-guard/skip-writes checks behave the same as before
            // the restart.
            let kind = chunks
                .first()
                .and_then(|(_, v)| serde_json::from_slice::<crate::model::LoggedRequest>(v).ok())
                .and_then(|r| self.registry.resolve(r.route_hash))
                .map(|route| route.kind)
                .unwrap_or(RouteKind::Other);

            self.shared.in_flight.lock().insert(
                start_ts,
                InFlightRequest {
                    kind,
                    collection: entry.collection.clone(),
                    last_updated: now_secs(),
                    num_chunks: entry.num_chunks,
                    next_chunk_index: entry.next_chunk_index,
                    is_complete: entry.is_complete,
                    is_alive: false,
                },
            );
            self.shared
                .collection_in_flight
                .lock()
                .entry(entry.collection.clone())
                .or_default()
                .insert(start_ts);

            if entry.is_complete {
                let worker_id = (hash_wy(&entry.collection) as usize) % self.queues.len().max(1);
                self.queues[worker_id].push(start_ts);
            }
        }
        Ok(())
    }

    fn wait_for_references(&self, collection: &str, start_ts: StartTs) {
        if !self.shared.is_replay.load(Ordering::SeqCst) {
            return;
        }
        let Some(referenced) = self.referenced_by(collection) else {
            return;
        };
        loop {
            let blocked = {
                let in_flight_by_coll = self.shared.collection_in_flight.lock();
                referenced.iter().any(|r| {
                    in_flight_by_coll
                        .get(r)
                        .map(|set| set.range(..start_ts).next().is_some())
                        .unwrap_or(false)
                })
            };
            if !blocked {
                return;
            }
            if self.shared.quit.load(Ordering::SeqCst) {
                return;
            }
            // Wait on the drain condvar, re-checking on every wakeup.
            let mut guard = self.shared.collection_in_flight.lock();
            self.shared
                .drain_cv
                .wait_for(&mut guard, Duration::from_millis(50));
        }
    }

    fn worker_loop(&self, worker_id: usize) {
        let wq = &self.queues[worker_id];
        info!(worker_id, "indexer worker starting");
        loop {
            if self.shared.quit.load(Ordering::SeqCst) {
                break;
            }

            let start_ts = {
                let mut q = wq.queue.lock();
                if q.is_empty() {
                    wq.cv.wait_for(&mut q, Duration::from_millis(200));
                }
                match q.front().copied() {
                    Some(ts) => ts,
                    None => continue,
                }
            };

            self.process_request(start_ts);

            // Pop only after the request has fully drained.
            let mut q = wq.queue.lock();
            if q.front() == Some(&start_ts) {
                q.pop_front();
            }
        }
        info!(worker_id, "indexer worker stopped");
    }

    fn process_request(&self, start_ts: StartTs) {
        let _run_guard = self.pause.run();

        let collection = self
            .shared
            .in_flight
            .lock()
            .get(&start_ts)
            .map(|e| e.collection.clone())
            .unwrap_or_default();

        self.wait_for_references(&collection, start_ts);

        let next_chunk_index = self
            .shared
            .in_flight
            .lock()
            .get(&start_ts)
            .map(|e| e.next_chunk_index)
            .unwrap_or(0);

        let lo = request_chunk_key(start_ts, next_chunk_index);
        let hi = request_prefix_hi(start_ts);
        let chunks = match self.store.scan(&lo, &hi) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, start_ts, "failed to scan WAL chunks");
                Vec::new()
            }
        };

        for (_, raw) in &chunks {
            let logged: crate::model::LoggedRequest = match serde_json::from_slice(raw) {
                Ok(l) => l,
                Err(e) => {
                    warn!(error = %e, start_ts, "corrupt WAL chunk, skipping");
                    continue;
                }
            };

            if self.shared.skip_index.lock().take(logged.log_index) {
                info!(log_index = logged.log_index, start_ts, "skipping known-bad log index");
                self.advance_next_chunk(start_ts);
                continue;
            }

            let is_alive = self
                .shared
                .in_flight
                .lock()
                .get(&start_ts)
                .map(|e| e.is_alive)
                .unwrap_or(false);
            let kind = self
                .shared
                .in_flight
                .lock()
                .get(&start_ts)
                .map(|e| e.kind)
                .unwrap_or(RouteKind::Other);

            if kind.is_resource_guarded() && self.resource.status() != ResourceStatus::Ok {
                let mut res = HandlerResponse::live();
                res.status_code = 422;
                res.is_alive = is_alive;
                if is_alive {
                    self.dispatcher.emit(start_ts, &res);
                }
                self.advance_next_chunk(start_ts);
                continue;
            }

            if self.config.skip_writes.load(Ordering::SeqCst) && !kind.passes_skip_writes() {
                let mut res = HandlerResponse::live();
                res.status_code = 422;
                res.is_alive = is_alive;
                if is_alive {
                    self.dispatcher.emit(start_ts, &res);
                }
                self.advance_next_chunk(start_ts);
                continue;
            }

            let resolved = self.registry.resolve(logged.route_hash);
            let req = HandlerRequest {
                method: logged.http_method.clone(),
                path: logged.path.clone(),
                params: logged.params.clone(),
                body: logged.body_chunk.clone(),
                log_index: logged.log_index,
                start_ts,
                last_chunk_aggregate: logged.is_last_chunk,
                route_hash: logged.route_hash,
            };

            let mut res = HandlerResponse::live();
            res.is_alive = is_alive;

            match resolved {
                Some(route) => {
                    let ok = route.handler.handle(&req, &mut res);
                    if !ok {
                        res.status_code = 400;
                    }
                    if is_alive && !route.is_async {
                        self.dispatcher.emit(start_ts, &res);
                    }
                }
                None => {
                    warn!(route_hash = logged.route_hash, "no handler registered for route");
                    res.status_code = 400;
                    if is_alive {
                        self.dispatcher.emit(start_ts, &res);
                    }
                }
            }

            self.advance_next_chunk(start_ts);
        }

        // All chunks drained: clear WAL keys and the in-flight entry.
        let lo_all = request_prefix_lo(start_ts);
        let hi_all = request_prefix_hi(start_ts);
        if let Err(e) = self.store.delete_range(&lo_all, &hi_all) {
            warn!(error = %e, start_ts, "failed to delete drained WAL chunks");
        }

        self.shared.in_flight.lock().remove(&start_ts);
        self.shared
            .collection_in_flight
            .lock()
            .get_mut(&collection)
            .map(|set| set.remove(&start_ts));
        self.shared.drain_cv.notify_all();
    }

    fn advance_next_chunk(&self, start_ts: StartTs) {
        if let Some(entry) = self.shared.in_flight.lock().get_mut(&start_ts) {
            entry.next_chunk_index += 1;
        }
    }

    /// Run one GC pass: drop in-flight entries stuck incomplete past the
    /// configured timeout, finalizing a terminal response for live clients.
    /// The "stuck counter" — entries whose count is unchanged across three
    /// consecutive calls — is diagnostic-only and never triggers recovery
    /// action, matching the source.
    pub fn gc_pass(&self, stuck_streak: &mut u32, last_stuck_count: &mut usize) {
        let now = now_secs();
        let mut to_drop = Vec::new();
        {
            let in_flight = self.shared.in_flight.lock();
            for (start_ts, entry) in in_flight.iter() {
                if !entry.is_complete && now.saturating_sub(entry.last_updated) > self.config.gc_prune_max_seconds {
                    to_drop.push((*start_ts, entry.is_alive, entry.collection.clone()));
                }
            }
        }

        for (start_ts, is_alive, collection) in &to_drop {
            let lo = request_prefix_lo(*start_ts);
            let hi = request_prefix_hi(*start_ts);
            if let Err(e) = self.store.delete_range(&lo, &hi) {
                warn!(error = %e, start_ts, "GC failed to delete stuck WAL chunks");
            }
            if *is_alive {
                let mut res = HandlerResponse::live();
                res.status_code = 500;
                res.is_final = true;
                self.dispatcher.emit(*start_ts, &res);
            }
            self.shared.in_flight.lock().remove(start_ts);
            self.shared
                .collection_in_flight
                .lock()
                .get_mut(collection)
                .map(|set| set.remove(start_ts));
        }

        let current_count = self.shared.in_flight.lock().len();
        if current_count > 0 && current_count == *last_stuck_count {
            *stuck_streak += 1;
        } else {
            *stuck_streak = 0;
        }
        *last_stuck_count = current_count;

        if *stuck_streak >= 3 {
            let top: Vec<StartTs> = self.shared.in_flight.lock().keys().take(5).copied().collect();
            warn!(?top, count = current_count, "in-flight count unchanged across 3 GC cycles");
        }
    }

    /// Spawn the GC loop thread, wired to `config.gc_interval`.
    pub fn spawn_gc(self: &Arc<Self>) -> JoinHandle<()> {
        let indexer = Arc::clone(self);
        std::thread::Builder::new()
            .name("indexer-gc".to_string())
            .spawn(move || {
                let mut stuck_streak = 0u32;
                let mut last_stuck_count = 0usize;
                while !indexer.shared.quit.load(Ordering::SeqCst) {
                    std::thread::sleep(indexer.config.gc_interval);
                    indexer.gc_pass(&mut stuck_streak, &mut last_stuck_count);
                }
            })
            .expect("failed to spawn indexer GC thread")
    }
}
