//! Per-rule performance metrics.
//!
//! Counters are atomics updated on the request path; latency aggregates sit
//! behind a small mutex because the running mean needs a consistent
//! read-modify-write of two values.
//!
//! P95/P99 are approximations: each tracks the largest latency observed so
//! far, so they only ever grow until [`RuleMetrics::reset`]. A streaming
//! quantile sketch would be needed for true percentiles.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Window used to turn the request total into a per-second figure.
const THROUGHPUT_PERIOD_SECS: f64 = 60.0;

#[derive(Debug, Default, Clone, Copy)]
struct LatencyStats {
    samples: u64,
    average_ms: f64,
    p95_ms: f64,
    p99_ms: f64,
}

impl LatencyStats {
    fn record(&mut self, latency_ms: f64) {
        self.samples += 1;
        self.average_ms += (latency_ms - self.average_ms) / self.samples as f64;
        if latency_ms > self.p95_ms {
            self.p95_ms = latency_ms;
        }
        if latency_ms > self.p99_ms {
            self.p99_ms = latency_ms;
        }
    }
}

#[derive(Debug, Default)]
struct MetricsInner {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    active_connections: AtomicU64,
    cache_hits: AtomicU64,
    latency: Mutex<LatencyStats>,
}

/// Running aggregates for one rule.
#[derive(Debug, Clone, Default)]
pub struct RuleMetrics {
    inner: Arc<MetricsInner>,
}

impl RuleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an admitted request.
    pub fn record_admitted(&self, cache_hit: bool) {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);
        self.inner.active_connections.fetch_add(1, Ordering::Relaxed);
        if cache_hit {
            self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the reported outcome of an admitted request.
    pub fn record_outcome(&self, success: bool, latency: Duration) {
        let counter = if success {
            &self.inner.successful_requests
        } else {
            &self.inner.failed_requests
        };
        counter.fetch_add(1, Ordering::Relaxed);

        // Never below zero, even if an outcome is reported twice
        let _ = self.inner.active_connections.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |active| active.checked_sub(1),
        );

        self.inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(latency.as_secs_f64() * 1000.0);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.inner.total_requests.load(Ordering::Relaxed);
        let successful = self.inner.successful_requests.load(Ordering::Relaxed);
        let failed = self.inner.failed_requests.load(Ordering::Relaxed);
        let cache_hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let latency = *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            average_response_time_ms: latency.average_ms,
            p95_response_time_ms: latency.p95_ms,
            p99_response_time_ms: latency.p99_ms,
            error_rate: percent(failed, total),
            throughput: total as f64 / THROUGHPUT_PERIOD_SECS,
            active_connections: self.inner.active_connections.load(Ordering::Relaxed),
            cache_hits,
            cache_hit_rate: percent(cache_hits, total),
        }
    }

    /// Reset every aggregate to zero.
    pub fn reset(&self) {
        self.inner.total_requests.store(0, Ordering::Relaxed);
        self.inner.successful_requests.store(0, Ordering::Relaxed);
        self.inner.failed_requests.store(0, Ordering::Relaxed);
        self.inner.active_connections.store(0, Ordering::Relaxed);
        self.inner.cache_hits.store(0, Ordering::Relaxed);
        *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = LatencyStats::default();
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// A point-in-time snapshot of one rule's metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Mean latency in milliseconds
    #[serde(rename = "averageResponseTime")]
    pub average_response_time_ms: f64,
    /// Largest latency observed, in milliseconds
    #[serde(rename = "p95ResponseTime")]
    pub p95_response_time_ms: f64,
    /// Largest latency observed, in milliseconds
    #[serde(rename = "p99ResponseTime")]
    pub p99_response_time_ms: f64,
    /// Failed over total, as a percentage
    pub error_rate: f64,
    /// Requests per second, estimated over a one-minute period
    pub throughput: f64,
    pub active_connections: u64,
    pub cache_hits: u64,
    /// Cache hits over total, as a percentage
    pub cache_hit_rate: f64,
}

impl MetricsSnapshot {
    /// Number of outcomes reported so far.
    pub fn reported(&self) -> u64 {
        self.successful_requests + self.failed_requests
    }
}
