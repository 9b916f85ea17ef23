//! Router Metrics
//!
//! In-process counters for the routing system:
//! - Dispatch outcomes per provider family
//! - Dispatch latency distribution
//! - Fallback, circuit and rate-limit rejections
//! - Invocation totals and spend
//!
//! Everything is lock-free on the hot path; [`RouterMetrics::snapshot`]
//! produces a serializable view for status output.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

use crate::error::AttemptFailure;
use crate::registry::ProviderFamily;

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// Fixed-bucket histogram of millisecond values
#[derive(Debug)]
pub struct Histogram {
    /// Inclusive upper bounds
    buckets: Vec<u64>,
    counts: Vec<AtomicU64>,
    total_count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Histogram with the given bucket upper bounds
    ///
    /// Values above the last bound are counted in the last bucket.
    #[must_use]
    pub fn new(mut buckets: Vec<u64>) -> Self {
        if buckets.is_empty() {
            buckets.push(u64::MAX);
        }
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total_count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Buckets suited to model call latency
    #[must_use]
    pub fn latency_default() -> Self {
        Self::new(vec![
            50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000, 120_000,
        ])
    }

    /// Record a value
    pub fn record(&self, value_ms: u64) {
        let idx = self
            .buckets
            .iter()
            .position(|&b| value_ms <= b)
            .unwrap_or(self.buckets.len() - 1);

        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_ms, Ordering::Relaxed);
        self.max.fetch_max(value_ms, Ordering::Relaxed);
    }

    /// Point-in-time copy
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let counts: Vec<u64> = self
            .counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        let total = self.total_count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);

        HistogramSnapshot {
            buckets: self.buckets.clone(),
            counts,
            total,
            sum,
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

/// Copy of histogram data
#[derive(Clone, Debug, Serialize)]
pub struct HistogramSnapshot {
    /// Bucket upper bounds
    pub buckets: Vec<u64>,
    /// Count per bucket
    pub counts: Vec<u64>,
    /// Values recorded
    pub total: u64,
    /// Sum of values
    pub sum: u64,
    /// Largest value
    pub max: u64,
}

impl HistogramSnapshot {
    /// Upper bound of the bucket holding the `p` quantile
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn percentile(&self, p: f64) -> u64 {
        if self.total == 0 {
            return 0;
        }
        let target = ((self.total as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0u64;
        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return self.buckets[i];
            }
        }
        self.buckets.last().copied().unwrap_or(0)
    }

    /// Mean value
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.sum as f64 / self.total as f64
        }
    }
}

// ============================================================================
// Counter
// ============================================================================

/// Monotonic atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Increment by one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `n`
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Per-Provider Metrics
// ============================================================================

/// Metrics for one provider family
#[derive(Debug)]
pub struct ProviderMetrics {
    /// Dispatches attempted
    pub requests: Counter,
    /// Dispatches that returned a response
    pub successes: Counter,
    /// Dispatches that failed for any reason
    pub failures: Counter,
    /// Failures that were timeouts
    pub timeouts: Counter,
    /// Successes that served a fallback
    pub fallbacks_served: Counter,
    /// Calls short-circuited by the breaker
    pub circuit_rejections: Counter,
    /// Calls denied by the local rate limiter
    pub rate_limited: Counter,
    /// Tokens in and out of successful calls
    pub tokens: Counter,
    /// Latency of successful calls
    pub latency: Histogram,
}

impl Default for ProviderMetrics {
    fn default() -> Self {
        Self {
            requests: Counter::default(),
            successes: Counter::default(),
            failures: Counter::default(),
            timeouts: Counter::default(),
            fallbacks_served: Counter::default(),
            circuit_rejections: Counter::default(),
            rate_limited: Counter::default(),
            tokens: Counter::default(),
            latency: Histogram::latency_default(),
        }
    }
}

impl ProviderMetrics {
    /// Fraction of dispatches that failed
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        let total = self.requests.get();
        if total == 0 {
            return 0.0;
        }
        self.failures.get() as f64 / total as f64
    }

    /// Serializable summary
    #[must_use]
    pub fn summary(&self) -> ProviderMetricsSummary {
        let latency = self.latency.snapshot();
        ProviderMetricsSummary {
            requests: self.requests.get(),
            successes: self.successes.get(),
            failures: self.failures.get(),
            timeouts: self.timeouts.get(),
            fallbacks_served: self.fallbacks_served.get(),
            circuit_rejections: self.circuit_rejections.get(),
            rate_limited: self.rate_limited.get(),
            tokens: self.tokens.get(),
            error_rate: self.error_rate(),
            latency_mean_ms: latency.mean(),
            latency_p50_ms: latency.percentile(0.5),
            latency_p90_ms: latency.percentile(0.9),
            latency_p99_ms: latency.percentile(0.99),
        }
    }
}

/// Summary of one family's metrics
#[derive(Clone, Debug, Serialize)]
#[allow(missing_docs)]
pub struct ProviderMetricsSummary {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub fallbacks_served: u64,
    pub circuit_rejections: u64,
    pub rate_limited: u64,
    pub tokens: u64,
    pub error_rate: f64,
    pub latency_mean_ms: f64,
    pub latency_p50_ms: u64,
    pub latency_p90_ms: u64,
    pub latency_p99_ms: u64,
}

// ============================================================================
// Router Metrics
// ============================================================================

/// Centralized metrics for the router
#[derive(Debug)]
pub struct RouterMetrics {
    providers: DashMap<ProviderFamily, Arc<ProviderMetrics>>,

    /// Invocations received
    pub invocations: Counter,
    /// Invocations answered
    pub invocations_succeeded: Counter,
    /// Invocations that exhausted every family
    pub invocations_failed: Counter,
    /// Invocations answered by a fallback
    pub fallbacks: Counter,
    /// Spend across successful invocations
    pub cost_cents: Counter,

    started_at: Instant,
}

impl Default for RouterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterMetrics {
    /// Empty collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
            invocations: Counter::default(),
            invocations_succeeded: Counter::default(),
            invocations_failed: Counter::default(),
            fallbacks: Counter::default(),
            cost_cents: Counter::default(),
            started_at: Instant::now(),
        }
    }

    /// Metrics for a family, created on first use
    pub fn provider(&self, family: ProviderFamily) -> Arc<ProviderMetrics> {
        Arc::clone(self.providers.entry(family).or_default().value())
    }

    /// Record a successful dispatch
    pub fn record_dispatch_success(
        &self,
        family: ProviderFamily,
        latency_ms: u64,
        tokens: u64,
        fallback: bool,
    ) {
        let metrics = self.provider(family);
        metrics.requests.inc();
        metrics.successes.inc();
        metrics.tokens.add(tokens);
        metrics.latency.record(latency_ms);
        if fallback {
            metrics.fallbacks_served.inc();
        }
    }

    /// Record a failed dispatch
    pub fn record_dispatch_failure(&self, family: ProviderFamily, failure: AttemptFailure) {
        let metrics = self.provider(family);
        metrics.requests.inc();
        metrics.failures.inc();
        match failure {
            AttemptFailure::Timeout => metrics.timeouts.inc(),
            AttemptFailure::CircuitOpen => metrics.circuit_rejections.inc(),
            AttemptFailure::RateLimited => metrics.rate_limited.inc(),
            AttemptFailure::Backend | AttemptFailure::Misconfigured => {}
        }
    }

    /// Record the end of an invocation
    pub fn record_invocation(&self, succeeded: bool, fallback: bool, cost_cents: u64) {
        self.invocations.inc();
        if succeeded {
            self.invocations_succeeded.inc();
            self.cost_cents.add(cost_cents);
            if fallback {
                self.fallbacks.inc();
            }
        } else {
            self.invocations_failed.inc();
        }
    }

    /// Serializable view of everything
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let providers = self
            .providers
            .iter()
            .map(|entry| (*entry.key(), entry.value().summary()))
            .collect();
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            invocations: self.invocations.get(),
            invocations_succeeded: self.invocations_succeeded.get(),
            invocations_failed: self.invocations_failed.get(),
            fallbacks: self.fallbacks.get(),
            cost_cents: self.cost_cents.get(),
            providers,
        }
    }
}

/// Serializable router metrics
#[derive(Clone, Debug, Serialize)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub invocations: u64,
    pub invocations_succeeded: u64,
    pub invocations_failed: u64,
    pub fallbacks: u64,
    pub cost_cents: u64,
    pub providers: BTreeMap<ProviderFamily, ProviderMetricsSummary>,
}
