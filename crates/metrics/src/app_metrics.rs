//! Windowed request-rate and latency aggregation.
//!
//! Grounded on the bounded-memory aggregation approach in
//! `crates/engine/src/instrumentation.rs`'s `PerfStats` (accumulate samples,
//! compute percentiles by sorting on read), generalized from one fixed set
//! of commit-path fields to an open set of string labels, and from an
//! unbounded `Vec` to a fixed-capacity reservoir of the most recent samples
//! so memory use does not grow with request volume.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Labels hoisted to top-level keys in [`AppMetrics::get`], mirroring the
/// route-kind classification in `meridian_core::route::RouteKind`.
const HOISTED_LABELS: &[&str] = &["search", "import", "doc_write", "doc_delete", "overloaded"];

/// Default reservoir capacity per label, per window.
const DEFAULT_RESERVOIR_CAPACITY: usize = 512;

/// Fixed-capacity reservoir of the most recent latency samples for one
/// label. Percentiles are computed by sorting a copy on read; writes are
/// O(1).
#[derive(Debug, Clone)]
struct LatencyDigest {
    samples: Vec<u64>,
    capacity: usize,
    next: usize,
}

impl LatencyDigest {
    fn new(capacity: usize) -> Self {
        LatencyDigest {
            samples: Vec::new(),
            capacity,
            next: 0,
        }
    }

    fn record(&mut self, micros: u64) {
        if self.samples.len() < self.capacity {
            self.samples.push(micros);
        } else {
            self.samples[self.next] = micros;
            self.next = (self.next + 1) % self.capacity;
        }
    }

    fn percentile(&self, p: f64) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

/// Accumulated counts and latencies for one label within a window.
#[derive(Debug, Clone)]
struct LabelStats {
    count: u64,
    duration_count: u64,
    duration_sum_micros: u64,
    min_micros: u64,
    max_micros: u64,
    digest: LatencyDigest,
}

impl LabelStats {
    fn new() -> Self {
        LabelStats {
            count: 0,
            duration_count: 0,
            duration_sum_micros: 0,
            min_micros: u64::MAX,
            max_micros: 0,
            digest: LatencyDigest::new(DEFAULT_RESERVOIR_CAPACITY),
        }
    }

    fn avg_micros(&self) -> f64 {
        if self.duration_count == 0 {
            0.0
        } else {
            self.duration_sum_micros as f64 / self.duration_count as f64
        }
    }

    fn min_micros(&self) -> u64 {
        if self.duration_count == 0 {
            0
        } else {
            self.min_micros
        }
    }
}

/// One aggregation window: per-label counts and latency stats.
#[derive(Debug, Clone, Default)]
pub struct WindowedMetrics {
    labels: FxHashMap<String, LabelStats>,
}

impl WindowedMetrics {
    fn new() -> Self {
        WindowedMetrics::default()
    }

    fn entry(&mut self, label: &str) -> &mut LabelStats {
        self.labels.entry(label.to_string()).or_insert_with(LabelStats::new)
    }

    /// Record `n` occurrences of `label` (O(1) under the caller's lock).
    pub fn increment_count(&mut self, label: &str, n: u64) {
        self.entry(label).count += n;
    }

    /// Record one latency sample of `micros` for `label`.
    pub fn increment_duration(&mut self, label: &str, micros: u64) {
        let stats = self.entry(label);
        stats.duration_count += 1;
        stats.duration_sum_micros += micros;
        stats.min_micros = stats.min_micros.min(micros);
        stats.max_micros = stats.max_micros.max(micros);
        stats.digest.record(micros);
    }

    fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Accumulates request counts and latencies into the current window;
/// rotates into the "last complete" window on a fixed cadence; exposes a
/// JSON snapshot. Intended to be held behind one `AppContext`-owned `Arc`
/// rather than as a process-wide singleton, per the ownership redesign.
pub struct AppMetrics {
    current: Mutex<WindowedMetrics>,
    last: Mutex<WindowedMetrics>,
    window_started: Mutex<Instant>,
}

impl AppMetrics {
    /// A fresh metrics context with an empty current and last window.
    pub fn new() -> Self {
        AppMetrics {
            current: Mutex::new(WindowedMetrics::new()),
            last: Mutex::new(WindowedMetrics::new()),
            window_started: Mutex::new(Instant::now()),
        }
    }

    /// Record `n` occurrences of `label` in the current window.
    pub fn increment_count(&self, label: &str, n: u64) {
        self.current.lock().increment_count(label, n);
    }

    /// Record one latency sample of `micros` for `label` in the current
    /// window.
    pub fn increment_duration(&self, label: &str, micros: u64) {
        self.current.lock().increment_duration(label, micros);
    }

    /// Atomically replace `last = current`, `current = empty`. Must be
    /// called exactly once per window period by the metrics aggregator
    /// timer (every 10 seconds in a full deployment).
    pub fn window_reset(&self) {
        let mut current = self.current.lock();
        let mut last = self.last.lock();
        *last = std::mem::take(&mut *current);
        *self.window_started.lock() = Instant::now();
    }

    /// Seconds since the last `window_reset`, used as the RPS denominator
    /// for whatever window `get` is reporting against.
    fn elapsed_window_seconds(&self) -> f64 {
        self.window_started.lock().elapsed().as_secs_f64().max(f64::EPSILON)
    }

    /// Snapshot the last complete window as a JSON object keyed by
    /// `rps_key`/`latency_key`, with [`HOISTED_LABELS`] promoted to
    /// top-level `<label>_rps` / `<label>_latency` keys.
    pub fn get(&self, rps_key: &str, latency_key: &str, window_seconds: f64) -> serde_json::Value {
        let last = self.last.lock();
        let mut rps_map = serde_json::Map::new();
        let mut latency_map = serde_json::Map::new();
        let mut top_level = serde_json::Map::new();

        for (label, stats) in &last.labels {
            let rps = stats.count as f64 / window_seconds;
            let latency = serde_json::json!({
                "avg": stats.avg_micros(),
                "min": stats.min_micros(),
                "max": stats.max_micros,
                "p70": stats.digest.percentile(0.70),
                "p95": stats.digest.percentile(0.95),
                "p99": stats.digest.percentile(0.99),
            });

            rps_map.insert(label.clone(), serde_json::json!(rps));
            latency_map.insert(label.clone(), latency.clone());

            if HOISTED_LABELS.contains(&label.as_str()) {
                top_level.insert(format!("{label}_rps"), serde_json::json!(rps));
                top_level.insert(format!("{label}_latency"), serde_json::json!(stats.avg_micros()));
            }
        }

        let mut out = serde_json::Map::new();
        out.insert(rps_key.to_string(), serde_json::Value::Object(rps_map));
        out.insert(latency_key.to_string(), serde_json::Value::Object(latency_map));
        out.extend(top_level);
        serde_json::Value::Object(out)
    }

    /// Whether the last complete window recorded anything at all — useful
    /// for tests asserting `window_reset` on an empty window yields zeros.
    pub fn last_window_is_empty(&self) -> bool {
        self.last.lock().is_empty()
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        AppMetrics::new()
    }
}

/// Convenience map of raw label -> `(count, [durations])` for building test
/// fixtures without touching `AppMetrics`'s internals.
pub type LabelFixture = HashMap<&'static str, (u64, Vec<u64>)>;
