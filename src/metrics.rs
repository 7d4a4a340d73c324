use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;

/// Global runtime metrics for the collector.
///
/// Purpose:
/// - Track apps in use and exhausted
/// - Track search / lookup / stream throughput
/// - Track rate limits and API errors
///
/// Design:
/// - Lock-free (Atomics)
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Apps
    pub apps_active: AtomicUsize,
    pub rate_limits: AtomicUsize,
    pub api_errors: AtomicUsize,

    // Search
    pub searches: AtomicUsize,
    pub tweets_fetched: AtomicUsize,
    pub idle_sleeps: AtomicUsize,

    // Lookup
    pub lookups_ok: AtomicUsize,
    pub lookups_failed: AtomicUsize,
    pub backoffs: AtomicUsize,

    // Stream
    pub stream_received: AtomicUsize,
    pub stream_processed: AtomicUsize,
    pub stream_errors: AtomicUsize,
    pub queue_depth: AtomicUsize,
}

impl RuntimeMetrics {
    /// One-line summary for periodic reporting.
    pub fn summary(&self) -> String {
        format!(
            "apps={} searches={} tweets={} idle={} rate_limits={} api_err={} lookup_ok={} lookup_err={} backoffs={} stream_recv={} stream_done={} stream_err={} queue={}",
            self.apps_active.load(Ordering::Relaxed),
            self.searches.load(Ordering::Relaxed),
            self.tweets_fetched.load(Ordering::Relaxed),
            self.idle_sleeps.load(Ordering::Relaxed),
            self.rate_limits.load(Ordering::Relaxed),
            self.api_errors.load(Ordering::Relaxed),
            self.lookups_ok.load(Ordering::Relaxed),
            self.lookups_failed.load(Ordering::Relaxed),
            self.backoffs.load(Ordering::Relaxed),
            self.stream_received.load(Ordering::Relaxed),
            self.stream_processed.load(Ordering::Relaxed),
            self.stream_errors.load(Ordering::Relaxed),
            self.queue_depth.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> = Lazy::new(|| Arc::new(RuntimeMetrics::default()));

/// Shorthand for `fetch_add(n, Relaxed)`.
pub fn add(counter: &AtomicUsize, n: usize) {
    counter.fetch_add(n, Ordering::Relaxed);
}

pub fn incr(counter: &AtomicUsize) {
    add(counter, 1);
}
