//! Prometheus metrics for the page table and key-value backends.
//!
//! There is no HTTP exporter here (this crate is an embedded library, not a
//! server) — an embedding application registers [`Metrics::registry`] with
//! its own scrape endpoint.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// All Prometheus metrics owned by a page table and its backend.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    pub cache_hits_total: IntCounter,
    pub cache_misses_total: IntCounter,
    pub cache_evictions_total: IntCounter,
    pub cache_dirty_evictions_total: IntCounter,

    pub backend_reads_total: IntCounterVec,
    pub backend_writes_total: IntCounterVec,
    pub backend_errors_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let cache_hits_total =
            IntCounter::new("h5s3_cache_hits_total", "Page cache hits").unwrap();
        registry.register(Box::new(cache_hits_total.clone())).unwrap();

        let cache_misses_total =
            IntCounter::new("h5s3_cache_misses_total", "Page cache misses").unwrap();
        registry
            .register(Box::new(cache_misses_total.clone()))
            .unwrap();

        let cache_evictions_total =
            IntCounter::new("h5s3_cache_evictions_total", "Pages evicted from the cache").unwrap();
        registry
            .register(Box::new(cache_evictions_total.clone()))
            .unwrap();

        let cache_dirty_evictions_total = IntCounter::new(
            "h5s3_cache_dirty_evictions_total",
            "Evictions that required a write-back before the buffer could be reused",
        )
        .unwrap();
        registry
            .register(Box::new(cache_dirty_evictions_total.clone()))
            .unwrap();

        let backend_reads_total = IntCounterVec::new(
            Opts::new("h5s3_backend_reads_total", "Page reads issued to the backend"),
            &["backend"],
        )
        .unwrap();
        registry
            .register(Box::new(backend_reads_total.clone()))
            .unwrap();

        let backend_writes_total = IntCounterVec::new(
            Opts::new("h5s3_backend_writes_total", "Page writes issued to the backend"),
            &["backend"],
        )
        .unwrap();
        registry
            .register(Box::new(backend_writes_total.clone()))
            .unwrap();

        let backend_errors_total = IntCounterVec::new(
            Opts::new("h5s3_backend_errors_total", "Backend operations that returned an error"),
            &["backend", "op"],
        )
        .unwrap();
        registry
            .register(Box::new(backend_errors_total.clone()))
            .unwrap();

        Metrics {
            registry,
            cache_hits_total,
            cache_misses_total,
            cache_evictions_total,
            cache_dirty_evictions_total,
            backend_reads_total,
            backend_writes_total,
            backend_errors_total,
        }
    }
}
