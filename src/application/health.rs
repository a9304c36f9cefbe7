//! Gateway health verdict.
//!
//! Aggregates per-rule breaker states and error rates into a single status:
//!
//! - **unhealthy** if more than half of all rules have an open breaker, or
//!   any rule's error rate exceeds [`HealthThresholds::unhealthy_error_rate`]
//! - **degraded** if any breaker is open, or any rule's error rate exceeds
//!   [`HealthThresholds::degraded_error_rate`]
//! - **healthy** otherwise

use crate::application::circuit_breaker::CircuitBreakerState;
use crate::application::metrics::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error-rate ceilings, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthThresholds {
    pub degraded_error_rate: f64,
    pub unhealthy_error_rate: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_error_rate: 5.0,
            unhealthy_error_rate: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDetails {
    pub total_rules: usize,
    pub enabled_rules: usize,
    pub open_circuit_breakers: usize,
    /// Rules whose error rate exceeds the degraded ceiling
    pub high_error_rates: usize,
    pub total_requests: u64,
    /// Mean of per-rule average latencies, in milliseconds
    #[serde(rename = "averageResponseTime")]
    pub average_response_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub details: HealthDetails,
}

/// Per-rule input to [`evaluate`].
#[derive(Debug, Clone, Copy)]
pub struct RuleHealth<'a> {
    pub enabled: bool,
    pub breaker: &'a CircuitBreakerState,
    pub metrics: &'a MetricsSnapshot,
}

pub fn evaluate<'a, I>(rules: I, thresholds: &HealthThresholds) -> HealthReport
where
    I: IntoIterator<Item = RuleHealth<'a>>,
{
    let mut total_rules = 0;
    let mut enabled_rules = 0;
    let mut open = 0;
    let mut high_error_rates = 0;
    let mut any_unhealthy_rate = false;
    let mut total_requests = 0u64;
    let mut latency_sum = 0.0;
    let mut latency_rules = 0u32;

    for rule in rules {
        total_rules += 1;
        if rule.enabled {
            enabled_rules += 1;
        }
        if rule.breaker.is_open() {
            open += 1;
        }

        let error_rate = rule.metrics.error_rate;
        if error_rate > thresholds.degraded_error_rate {
            high_error_rates += 1;
        }
        if error_rate > thresholds.unhealthy_error_rate {
            any_unhealthy_rate = true;
        }

        total_requests += rule.metrics.total_requests;
        if rule.metrics.reported() > 0 {
            latency_sum += rule.metrics.average_response_time_ms;
            latency_rules += 1;
        }
    }

    let status = if any_unhealthy_rate || open * 2 > total_rules {
        HealthStatus::Unhealthy
    } else if open > 0 || high_error_rates > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    HealthReport {
        status,
        details: HealthDetails {
            total_rules,
            enabled_rules,
            open_circuit_breakers: open,
            high_error_rates,
            total_requests,
            average_response_time_ms: if latency_rules == 0 {
                0.0
            } else {
                latency_sum / f64::from(latency_rules)
            },
        },
    }
}
