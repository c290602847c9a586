//! Metrics collection for authorization engine observability

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::permissions::CacheStats;

/// Engine performance metrics
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Total number of authorization checks
    pub total_requests: u64,

    /// Number of allowed decisions
    pub allowed_decisions: u64,

    /// Number of denied decisions
    pub denied_decisions: u64,

    /// Allows granted through the administrator role
    pub admin_bypasses: u64,

    /// Infrastructure failures converted to denials
    pub fail_closed: u64,

    /// Checks rejected for lack of an authenticated principal
    pub unauthenticated: u64,

    /// Effective-permission cache hits
    pub cache_hits: u64,

    /// Effective-permission cache misses
    pub cache_misses: u64,

    /// Latency percentiles (p50, p90, p99)
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,

    /// Average latency
    pub avg_latency_ms: f64,
}

impl EngineMetrics {
    /// Calculate cache hit rate
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Calculate allow rate
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_decisions + self.denied_decisions;
        if total == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / total as f64
        }
    }

    /// Fill in cache counters
    pub fn with_cache_stats(mut self, stats: &CacheStats) -> Self {
        self.cache_hits = stats.hits as u64;
        self.cache_misses = stats.misses as u64;
        self
    }
}

/// Metrics collector
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,

    /// Latency samples for percentile calculation
    latency_samples: Arc<RwLock<Vec<f64>>>,

    max_samples: usize,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(10_000))),
            max_samples: 10_000,
        }
    }

    /// Record an authorization decision
    pub async fn record_decision(&self, allowed: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;

        if allowed {
            metrics.allowed_decisions += 1;
        } else {
            metrics.denied_decisions += 1;
        }
    }

    /// Record an administrator bypass
    pub async fn record_admin_bypass(&self) {
        self.metrics.write().await.admin_bypasses += 1;
    }

    /// Record an infrastructure failure converted to a denial
    pub async fn record_fail_closed(&self) {
        self.metrics.write().await.fail_closed += 1;
    }

    /// Record a check without an authenticated principal
    pub async fn record_unauthenticated(&self) {
        self.metrics.write().await.unauthenticated += 1;
    }

    /// Record check latency
    pub async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);

        // Keep only recent samples
        if samples.len() > self.max_samples {
            samples.drain(0..1_000);
        }

        let mut metrics = self.metrics.write().await;

        let sum: f64 = samples.iter().sum();
        metrics.avg_latency_ms = sum / samples.len() as f64;

        let mut sorted = samples.clone();
        sorted.sort_by(f64::total_cmp);

        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
    }

    /// Get current metrics snapshot
    pub async fn get_metrics(&self) -> EngineMetrics {
        self.metrics.read().await.clone()
    }

    /// Reset all metrics
    pub async fn reset(&self) {
        *self.metrics.write().await = EngineMetrics::default();
        self.latency_samples.write().await.clear();
    }

    /// Export metrics in Prometheus text format, including the
    /// effective-permission cache counters
    pub async fn export_prometheus(&self, cache: &CacheStats) -> String {
        let metrics = self.metrics.read().await;

        format!(
            r#"# HELP authz_checks_total Total number of authorization checks
# TYPE authz_checks_total counter
authz_checks_total {}

# HELP authz_allowed_total Number of allowed decisions
# TYPE authz_allowed_total counter
authz_allowed_total {}

# HELP authz_denied_total Number of denied decisions
# TYPE authz_denied_total counter
authz_denied_total {}

# HELP authz_admin_bypass_total Allows granted through the administrator role
# TYPE authz_admin_bypass_total counter
authz_admin_bypass_total {}

# HELP authz_fail_closed_total Infrastructure failures converted to denials
# TYPE authz_fail_closed_total counter
authz_fail_closed_total {}

# HELP authz_cache_hits_total Effective permission cache hits
# TYPE authz_cache_hits_total counter
authz_cache_hits_total {}

# HELP authz_cache_misses_total Effective permission cache misses
# TYPE authz_cache_misses_total counter
authz_cache_misses_total {}

# HELP authz_cache_entries Cached effective permission sets
# TYPE authz_cache_entries gauge
authz_cache_entries {}

# HELP authz_latency_seconds Check latency percentiles
# TYPE authz_latency_seconds summary
authz_latency_seconds{{quantile="0.5"}} {}
authz_latency_seconds{{quantile="0.9"}} {}
authz_latency_seconds{{quantile="0.99"}} {}
"#,
            metrics.total_requests,
            metrics.allowed_decisions,
            metrics.denied_decisions,
            metrics.admin_bypasses,
            metrics.fail_closed,
            cache.hits,
            cache.misses,
            cache.entries,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
        )
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
