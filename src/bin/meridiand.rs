//! Process entrypoint: wires every subsystem together into a [`Server`] and
//! runs it until interrupted.
//!
//! HTTP framing, route matching, and JSON parsing are an external layer
//! (spec.md §1's out-of-scope list) and are not implemented here — this
//! binary is only responsible for constructing the write path and keeping
//! it alive. A full deployment puts an HTTP server in front that turns
//! incoming requests into [`meridian_api::DispatchRequest`] values and calls
//! [`Server::write`].

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use meridian::{single_node_peer_config, Server};
use meridian_api::AppContext;
use meridian_concurrency::PauseMutex;
use meridian_durability::SnapshotStore;
use meridian_engine::consensus::SingleNodeConsensus;
use meridian_engine::replication::{CatchupThresholds, NoForwarder, ReplicationState};
use meridian_indexer::{AlwaysOk, BatchedIndexer, IndexerConfig, NullDispatcher, ResolvedRoute, RouteHandler, RouteRegistry};
use meridian_metrics::AppMetrics;
use meridian_search::InMemoryCollectionStore;
use meridian_security::{AuthManager, RateLimitManager};
use meridian_storage::InMemoryKvStore;

/// Placeholder route registry: a real deployment wires this to the actual
/// route table; this binary has no HTTP layer to resolve routes for.
struct NoRoutes;

impl RouteRegistry for NoRoutes {
    fn resolve(&self, _route_hash: u64) -> Option<ResolvedRoute> {
        None
    }
}

fn data_dir() -> PathBuf {
    std::env::var_os("MERIDIAN_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./meridian-data"))
}

fn bootstrap_key() -> Option<String> {
    std::env::var("MERIDIAN_BOOTSTRAP_KEY").ok()
}

fn self_peer_id() -> String {
    std::env::var("MERIDIAN_NODE_ID").unwrap_or_else(|_| "self".to_string())
}

fn main() {
    tracing_subscriber::fmt::init();

    let dir = data_dir();
    std::fs::create_dir_all(&dir).expect("failed to create data directory");

    let kv: Arc<dyn meridian_storage::KvStore> = Arc::new(InMemoryKvStore::new(&dir));

    let indexer = BatchedIndexer::new(
        kv.clone(),
        Arc::new(NoRoutes),
        Arc::new(NullDispatcher),
        Arc::new(AlwaysOk),
        Arc::new(PauseMutex::new()),
        IndexerConfig::default(),
    );
    indexer.spawn_gc();

    let consensus = Arc::new(SingleNodeConsensus::new());
    let snapshot_store = SnapshotStore::new(dir.join("snapshots"));
    let replication = ReplicationState::new(
        consensus,
        indexer,
        kv.clone(),
        snapshot_store,
        Arc::new(NoForwarder),
        Arc::new(AlwaysOk),
        Arc::new(AtomicBool::new(false)),
        CatchupThresholds::default(),
    );
    replication
        .load_latest_snapshot()
        .expect("failed to load latest snapshot");

    // Auth/rate-limit state lives in the same KV store the snapshot just
    // restored, so they must be constructed only after the reload above —
    // both load their in-memory index from `kv` at construction time.
    let auth = Arc::new(AuthManager::new(kv.clone(), bootstrap_key()).expect("failed to load API keys"));
    let rate_limit = Arc::new(RateLimitManager::new(kv).expect("failed to load rate-limit rules"));
    let collections: Arc<dyn meridian_search::CollectionStore> = Arc::new(InMemoryCollectionStore::new());
    let metrics = Arc::new(AppMetrics::new());

    let server = Server::new(AppContext::new(auth, rate_limit, replication, collections, metrics));
    server
        .start(&single_node_peer_config(self_peer_id()))
        .expect("failed to start consensus");

    tracing::info!(leader = server.is_leader(), "meridiand started");

    install_shutdown_signal_handler();
    while SHUTDOWN_REQUESTED.load(std::sync::atomic::Ordering::SeqCst) == 0 {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    tracing::info!("meridiand shutting down");
    server.shutdown();
}

/// Set by the SIGINT/SIGTERM handler below; async-signal-safe since it's
/// just an atomic store.
static SHUTDOWN_REQUESTED: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

extern "C" fn request_shutdown(_: libc::c_int) {
    SHUTDOWN_REQUESTED.store(1, std::sync::atomic::Ordering::SeqCst);
}

/// Install SIGINT/SIGTERM handlers, matching this workspace's existing use
/// of `libc` for low-level system calls (disk/memory pressure checks).
fn install_shutdown_signal_handler() {
    unsafe {
        libc::signal(libc::SIGINT, request_shutdown as libc::sighandler_t);
        libc::signal(libc::SIGTERM, request_shutdown as libc::sighandler_t);
    }
}
