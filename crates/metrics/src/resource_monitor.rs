//! Cached disk/memory pressure checks.
//!
//! Grounded on `cached_resource_stat.h`/`.cpp`: a 5-second TTL cache over a
//! `statvfs` disk check and a `/proc/meminfo` memory check, combining RAM
//! and swap pressure into one predicate.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Result of a resource-pressure check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceCheck {
    /// Resources are within configured thresholds.
    Ok,
    /// Disk usage exceeds `disk_used_max_percentage`.
    OutOfDisk,
    /// Combined RAM+swap usage exceeds `memory_used_max_percentage`.
    OutOfMemory,
}

/// Raw system statistics consulted by the predicate. Abstracted behind a
/// trait so tests can supply synthetic figures instead of reading the real
/// filesystem and `/proc`.
pub trait SystemStatSource: Send + Sync {
    /// `(total_bytes, used_bytes)` for the filesystem backing `data_dir`.
    fn disk_stats(&self, data_dir: &Path) -> Option<(u64, u64)>;
    /// `(mem_total, mem_available, swap_total, swap_free)`, all in bytes.
    fn memory_stats(&self) -> Option<(u64, u64, u64, u64)>;
}

/// Reads real disk usage via `statvfs` and real memory usage via
/// `/proc/meminfo`, matching the source's two data sources.
pub struct OsStatSource;

impl SystemStatSource for OsStatSource {
    fn disk_stats(&self, data_dir: &Path) -> Option<(u64, u64)> {
        let c_path = std::ffi::CString::new(data_dir.to_str()?).ok()?;
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
        if rc != 0 {
            return None;
        }
        let total = st.f_blocks as u64 * st.f_frsize as u64;
        let used = (st.f_blocks as u64).saturating_sub(st.f_bavail as u64) * st.f_frsize as u64;
        Some((total, used))
    }

    fn memory_stats(&self) -> Option<(u64, u64, u64, u64)> {
        let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
        let mut mem_total = 0u64;
        let mut mem_available = 0u64;
        let mut swap_total = 0u64;
        let mut swap_free = 0u64;
        for line in contents.lines() {
            let mut parts = line.split_whitespace();
            let key = parts.next().unwrap_or("");
            let value_kb: u64 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            match key {
                "MemTotal:" => mem_total = value_kb * 1024,
                "MemAvailable:" => mem_available = value_kb * 1024,
                "SwapTotal:" => swap_total = value_kb * 1024,
                "SwapFree:" => swap_free = value_kb * 1024,
                _ => {}
            }
        }
        if mem_total == 0 {
            None
        } else {
            Some((mem_total, mem_available, swap_total, swap_free))
        }
    }
}

struct CachedResult {
    status: ResourceCheck,
    checked_at: Instant,
}

/// Caches a system-resource check with a 5-second TTL, matching the
/// source's `REFRESH_INTERVAL_SECS`.
pub struct ResourceMonitor {
    source: Box<dyn SystemStatSource>,
    data_dir: PathBuf,
    disk_used_max_percentage: i32,
    memory_used_max_percentage: i32,
    cached: Mutex<Option<CachedResult>>,
}

const REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const MEMORY_FREE_MIN_FLOOR_BYTES: u64 = 500 * 1024 * 1024;

impl ResourceMonitor {
    /// Construct a monitor over `data_dir`, with both thresholds as
    /// percentages in `[0, 100]`. A threshold of 100 short-circuits that
    /// check to always pass.
    pub fn new(
        source: Box<dyn SystemStatSource>,
        data_dir: impl Into<PathBuf>,
        disk_used_max_percentage: i32,
        memory_used_max_percentage: i32,
    ) -> Self {
        ResourceMonitor {
            source,
            data_dir: data_dir.into(),
            disk_used_max_percentage,
            memory_used_max_percentage,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached check if still within the TTL, else recompute.
    pub fn has_enough_resources(&self) -> ResourceCheck {
        if self.disk_used_max_percentage == 100 && self.memory_used_max_percentage == 100 {
            return ResourceCheck::Ok;
        }

        let mut cached = self.cached.lock();
        if let Some(c) = cached.as_ref() {
            if c.checked_at.elapsed() < REFRESH_INTERVAL {
                return c.status;
            }
        }

        let status = self.compute();
        *cached = Some(CachedResult {
            status,
            checked_at: Instant::now(),
        });
        status
    }

    fn compute(&self) -> ResourceCheck {
        let Some((disk_total, disk_used)) = self.source.disk_stats(&self.data_dir) else {
            return ResourceCheck::Ok;
        };
        let Some((mem_total, mem_available, swap_total, swap_free)) = self.source.memory_stats() else {
            return ResourceCheck::Ok;
        };
        if mem_total == 0 {
            return ResourceCheck::Ok;
        }

        if disk_total > 0 {
            let disk_used_percentage = (disk_used as f64 / disk_total as f64) * 100.0;
            if disk_used_percentage > self.disk_used_max_percentage as f64 {
                return ResourceCheck::OutOfDisk;
            }
        }

        let all_memory_used = (mem_total - mem_available.min(mem_total)) + swap_total.saturating_sub(swap_free);
        if all_memory_used >= mem_total {
            return ResourceCheck::OutOfMemory;
        }

        let memory_free_min_bytes = MEMORY_FREE_MIN_FLOOR_BYTES.min(
            ((100 - self.memory_used_max_percentage as u64) * mem_total) / 100,
        );
        let free_mem = mem_total - all_memory_used;
        if free_mem < memory_free_min_bytes {
            return ResourceCheck::OutOfMemory;
        }

        ResourceCheck::Ok
    }
}
