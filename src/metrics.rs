//! Prometheus counters for cache traffic.
//!
//! One [`CacheMetrics`] is shared by a factory, its store client and every
//! region it builds. Counters are labelled by region name.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Per-factory cache counters.
#[derive(Clone)]
pub struct CacheMetrics {
    hits: IntCounterVec,
    misses: IntCounterVec,
    puts: IntCounterVec,
    removals: IntCounterVec,
    errors: IntCounterVec,
    sweeps: IntCounter,
    expired: IntCounter,
    registry: Registry,
}

impl CacheMetrics {
    /// Register the counters into `registry`.
    pub fn register(registry: Registry) -> prometheus::Result<Self> {
        let hits = IntCounterVec::new(
            Opts::new("region_cache_hits_total", "Cache reads that returned a value"),
            &["region"],
        )?;
        registry.register(Box::new(hits.clone()))?;

        let misses = IntCounterVec::new(
            Opts::new("region_cache_misses_total", "Cache reads that returned nothing"),
            &["region"],
        )?;
        registry.register(Box::new(misses.clone()))?;

        let puts = IntCounterVec::new(
            Opts::new("region_cache_puts_total", "Entries written"),
            &["region"],
        )?;
        registry.register(Box::new(puts.clone()))?;

        let removals = IntCounterVec::new(
            Opts::new("region_cache_removals_total", "Entries evicted or removed"),
            &["region"],
        )?;
        registry.register(Box::new(removals.clone()))?;

        let errors = IntCounterVec::new(
            Opts::new("region_cache_errors_total", "Backend failures by operation"),
            &["operation"],
        )?;
        registry.register(Box::new(errors.clone()))?;

        let sweeps = IntCounter::new("region_cache_sweeps_total", "Expiration sweeper ticks")?;
        registry.register(Box::new(sweeps.clone()))?;

        let expired = IntCounter::new(
            "region_cache_expired_total",
            "Entries removed by the expiration sweeper",
        )?;
        registry.register(Box::new(expired.clone()))?;

        Ok(Self {
            hits,
            misses,
            puts,
            removals,
            errors,
            sweeps,
            expired,
            registry,
        })
    }

    /// Counters registered into a private registry.
    pub fn standalone() -> Self {
        // Metric names are static and unique within a fresh registry.
        Self::register(Registry::new()).expect("static metric definitions are valid")
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_hit(&self, region: &str) {
        self.hits.with_label_values(&[region]).inc();
    }

    pub fn record_miss(&self, region: &str) {
        self.misses.with_label_values(&[region]).inc();
    }

    pub fn record_put(&self, region: &str) {
        self.puts.with_label_values(&[region]).inc();
    }

    pub fn record_removal(&self, region: &str) {
        self.removals.with_label_values(&[region]).inc();
    }

    pub fn record_error(&self, operation: &str) {
        self.errors.with_label_values(&[operation]).inc();
    }

    pub fn record_sweep(&self, expired: u64) {
        self.sweeps.inc();
        self.expired.inc_by(expired);
    }

    pub fn hits(&self, region: &str) -> u64 {
        self.hits.with_label_values(&[region]).get()
    }

    pub fn misses(&self, region: &str) -> u64 {
        self.misses.with_label_values(&[region]).get()
    }

    pub fn puts(&self, region: &str) -> u64 {
        self.puts.with_label_values(&[region]).get()
    }

    pub fn errors(&self, operation: &str) -> u64 {
        self.errors.with_label_values(&[operation]).get()
    }

    pub fn sweeps(&self) -> u64 {
        self.sweeps.get()
    }

    pub fn expired(&self) -> u64 {
        self.expired.get()
    }
}

impl std::fmt::Debug for CacheMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheMetrics")
            .field("sweeps", &self.sweeps.get())
            .field("expired", &self.expired.get())
            .finish()
    }
}
