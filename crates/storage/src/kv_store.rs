//! The opaque key-value store interface consumed by every component in the
//! write-path: `BatchedIndexer`'s WAL chunks, `AuthManager`'s key records,
//! `RateLimitManager`'s rule store, and `ReplicationState`'s checkpoints all
//! go through this single abstraction.
//!
//! The real storage engine (B-trees, LSM compaction, on-disk formats) is out
//! of scope here; [`InMemoryKvStore`] is a reference implementation suitable
//! for tests and for wiring the rest of the system end to end. Production
//! deployments plug in a real engine behind the same trait, the way the
//! teacher workspace's `sharded`/`unified` stores sit behind `Storage`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

/// Errors a `KvStore` implementation may report.
#[derive(Debug, Error)]
pub enum KvError {
    /// The underlying medium failed (disk I/O, network, etc).
    #[error("kv store io error: {0}")]
    Io(String),
    /// A checkpoint or reload path was invalid.
    #[error("invalid checkpoint path: {0}")]
    InvalidPath(String),
}

/// Result alias for `KvStore` operations.
pub type KvResult<T> = Result<T, KvError>;

/// A single key/value pair returned from a scan.
pub type ScanEntry = (Vec<u8>, Vec<u8>);

/// The ordered key-value interface every component in this crate depends on.
///
/// Keys are raw bytes so that fixed-width big-endian encodings (as used by
/// the WAL key layout `$RL_<start_ts>_<chunk_index>`) sort lexicographically
/// in numeric order.
pub trait KvStore: Send + Sync {
    /// Point lookup. Returns `Ok(None)` if absent, never an error for a
    /// missing key.
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Insert or overwrite. Returns `true` if the key was newly created.
    fn insert(&self, key: &[u8], value: &[u8]) -> KvResult<bool>;

    /// Remove a key. Returns `true` if it existed.
    fn remove(&self, key: &[u8]) -> KvResult<bool>;

    /// Iterate all entries with `lo <= key < hi` in ascending order.
    fn scan(&self, lo: &[u8], hi: &[u8]) -> KvResult<Vec<ScanEntry>>;

    /// Like `scan`, but appends into an existing buffer instead of
    /// allocating a fresh `Vec` — mirrors the source's `scan_fill`, used on
    /// hot paths (worker-loop chunk reassembly) to avoid per-call churn.
    fn scan_fill(&self, lo: &[u8], hi: &[u8], out: &mut Vec<ScanEntry>) -> KvResult<()> {
        out.extend(self.scan(lo, hi)?);
        Ok(())
    }

    /// Delete every key with `lo <= key < hi`. Used to clear a completed
    /// request's WAL chunks in one call.
    fn delete_range(&self, lo: &[u8], hi: &[u8]) -> KvResult<()>;

    /// Atomically add `delta` to the integer stored at `key` (creating it as
    /// `delta` if absent) and return the new value. Used for the API-key
    /// id counter (`$KN`).
    fn increment(&self, key: &[u8], delta: i64) -> KvResult<i64>;

    /// Snapshot the current state to `path` (hard-linked copy where
    /// supported).
    fn create_checkpoint(&self, path: &Path) -> KvResult<()>;

    /// Replace the current contents with whatever is stored at `path`.
    /// Returns the number of entries loaded.
    fn reload(&self, path: &Path) -> KvResult<usize>;

    /// Force any buffered writes to be durable.
    fn flush(&self) -> KvResult<()>;

    /// The directory this store persists its state under.
    fn state_dir_path(&self) -> PathBuf;

    /// The highest internal sequence number assigned so far; used by
    /// `ReplicationState` to detect whether a reload advanced state.
    fn latest_seq_number(&self) -> u64;
}

/// A reference, fully in-memory `KvStore` backed by a sorted map.
///
/// `create_checkpoint`/`reload` serialize the whole map as a flat list of
/// key/value pairs (length-prefixed) rather than hard-linking real SSTables
/// — there is nothing on disk to hard-link for a pure in-memory engine, so
/// this degrades to a full copy, which is the honest behavior for this
/// reference implementation.
pub struct InMemoryKvStore {
    dir: PathBuf,
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    seq: AtomicU64,
}

impl InMemoryKvStore {
    /// Create a store that reports `dir` as its state directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        InMemoryKvStore {
            dir: dir.into(),
            data: RwLock::new(BTreeMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    fn bump_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl KvStore for InMemoryKvStore {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> KvResult<bool> {
        self.bump_seq();
        let mut data = self.data.write();
        Ok(data.insert(key.to_vec(), value.to_vec()).is_none())
    }

    fn remove(&self, key: &[u8]) -> KvResult<bool> {
        self.bump_seq();
        Ok(self.data.write().remove(key).is_some())
    }

    fn scan(&self, lo: &[u8], hi: &[u8]) -> KvResult<Vec<ScanEntry>> {
        let data = self.data.read();
        Ok(data
            .range(lo.to_vec()..hi.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn delete_range(&self, lo: &[u8], hi: &[u8]) -> KvResult<()> {
        self.bump_seq();
        let mut data = self.data.write();
        let keys: Vec<Vec<u8>> = data.range(lo.to_vec()..hi.to_vec()).map(|(k, _)| k.clone()).collect();
        for k in keys {
            data.remove(&k);
        }
        Ok(())
    }

    fn increment(&self, key: &[u8], delta: i64) -> KvResult<i64> {
        self.bump_seq();
        let mut data = self.data.write();
        let current = data
            .get(key)
            .map(|v| {
                let mut buf = [0u8; 8];
                let n = v.len().min(8);
                buf[..n].copy_from_slice(&v[..n]);
                i64::from_be_bytes(buf)
            })
            .unwrap_or(0);
        let next = current + delta;
        data.insert(key.to_vec(), next.to_be_bytes().to_vec());
        Ok(next)
    }

    fn create_checkpoint(&self, path: &Path) -> KvResult<()> {
        std::fs::create_dir_all(path).map_err(|e| KvError::Io(e.to_string()))?;
        let data = self.data.read();
        let mut buf = Vec::new();
        for (k, v) in data.iter() {
            buf.extend_from_slice(&(k.len() as u32).to_be_bytes());
            buf.extend_from_slice(k);
            buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
            buf.extend_from_slice(v);
        }
        std::fs::write(path.join("kv.checkpoint"), buf).map_err(|e| KvError::Io(e.to_string()))
    }

    fn reload(&self, path: &Path) -> KvResult<usize> {
        let file = path.join("kv.checkpoint");
        let buf = std::fs::read(&file).map_err(|e| KvError::Io(e.to_string()))?;
        let mut data = self.data.write();
        data.clear();
        let mut i = 0usize;
        let mut count = 0usize;
        while i + 4 <= buf.len() {
            let klen = u32::from_be_bytes(buf[i..i + 4].try_into().unwrap()) as usize;
            i += 4;
            if i + klen > buf.len() {
                return Err(KvError::InvalidPath("corrupt checkpoint".into()));
            }
            let key = buf[i..i + klen].to_vec();
            i += klen;
            let vlen = u32::from_be_bytes(buf[i..i + 4].try_into().unwrap()) as usize;
            i += 4;
            let value = buf[i..i + vlen].to_vec();
            i += vlen;
            data.insert(key, value);
            count += 1;
        }
        drop(data);
        self.bump_seq();
        Ok(count)
    }

    fn flush(&self) -> KvResult<()> {
        Ok(())
    }

    fn state_dir_path(&self) -> PathBuf {
        self.dir.clone()
    }

    fn latest_seq_number(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}
