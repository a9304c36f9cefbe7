//! Per-rule circuit breaker.
//!
//! Each rule owns one breaker. Admission calls [`CircuitBreaker::acquire`]
//! before any other check; outcome reporting drives the transitions:
//!
//! - closed → open once `consecutive_failures >= failure_threshold`
//! - open → half-open lazily, on the first request at or after `next_attempt_at`
//! - half-open → closed on a success report
//! - half-open → open on a failure report
//!
//! While half-open, at most `half_open_max_calls` trial requests are admitted.
//! Further requests are rejected with a half-open limit until a trial reports
//! back, or until `recovery_timeout` has passed since the breaker entered
//! half-open, at which point the trial budget is renewed so abandoned trials
//! cannot wedge the breaker.

use crate::application::ports::Clock;
use crate::domain::rule::CircuitBreakerConfig;
use crate::domain::time::{from_unix_millis, serialize_opt_unix_millis, unix_millis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Operating normally
    #[default]
    Closed,
    /// Rejecting every request
    Open,
    /// Admitting a bounded number of trial requests
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(serialize_with = "serialize_opt_unix_millis")]
    pub last_failure_at: Option<SystemTime>,
    #[serde(serialize_with = "serialize_opt_unix_millis")]
    pub next_attempt_at: Option<SystemTime>,
    pub half_open_trials_used: u32,
}

impl CircuitBreakerState {
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}

/// Admission verdict from a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerVerdict {
    /// Proceed. `trial` is set when a half-open trial slot was consumed.
    Allow { trial: bool },
    /// Open until `retry_at_ms`.
    Open { retry_at_ms: u64 },
    /// Half-open with no trial slots left until `retry_at_ms`.
    HalfOpenLimitReached { retry_at_ms: u64 },
}

#[derive(Debug, Default)]
struct BreakerCell {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_ms: Option<u64>,
    next_attempt_ms: Option<u64>,
    half_open_trials_used: u32,
    half_open_since_ms: u64,
}

impl BreakerCell {
    fn to_state(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_failure_at: self.last_failure_ms.map(from_unix_millis),
            next_attempt_at: self.next_attempt_ms.map(from_unix_millis),
            half_open_trials_used: self.half_open_trials_used,
        }
    }

    fn enter_half_open(&mut self, now_ms: u64) {
        self.state = CircuitState::HalfOpen;
        self.consecutive_failures = 0;
        self.half_open_trials_used = 0;
        self.half_open_since_ms = now_ms;
    }

    fn open(&mut self, now_ms: u64, config: &CircuitBreakerConfig) -> u64 {
        let next_attempt = now_ms.saturating_add(config.recovery_timeout_secs.saturating_mul(1000));
        self.state = CircuitState::Open;
        self.next_attempt_ms = Some(next_attempt);
        self.half_open_trials_used = 0;
        next_attempt
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.next_attempt_ms = None;
        self.half_open_trials_used = 0;
    }
}

/// Failure-state machine guarding one rule's downstream target.
#[derive(Debug)]
pub struct CircuitBreaker {
    rule_id: String,
    cell: Mutex<BreakerCell>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(rule_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            rule_id: rule_id.into(),
            cell: Mutex::new(BreakerCell::default()),
            clock,
        }
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    // Every update leaves the cell consistent, so a poisoned lock is usable.
    fn lock(&self) -> MutexGuard<'_, BreakerCell> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_ms(&self) -> u64 {
        unix_millis(self.clock.now())
    }

    /// Ask whether a request may pass, consuming a trial slot when half-open.
    pub fn acquire(&self, config: &CircuitBreakerConfig) -> BreakerVerdict {
        if !config.enabled {
            return BreakerVerdict::Allow { trial: false };
        }

        let now_ms = self.now_ms();
        let mut cell = self.lock();

        if cell.state == CircuitState::Open {
            let next_attempt = cell.next_attempt_ms.unwrap_or(0);
            if now_ms < next_attempt {
                return BreakerVerdict::Open {
                    retry_at_ms: next_attempt,
                };
            }
            cell.enter_half_open(now_ms);
            tracing::info!(rule_id = %self.rule_id, "circuit breaker half-open");
        }

        if cell.state == CircuitState::Closed {
            return BreakerVerdict::Allow { trial: false };
        }

        if cell.half_open_trials_used >= config.half_open_max_calls {
            let retry_at = cell
                .half_open_since_ms
                .saturating_add(config.recovery_timeout_secs.saturating_mul(1000));
            if now_ms < retry_at {
                tracing::warn!(
                    rule_id = %self.rule_id,
                    trials = cell.half_open_trials_used,
                    "half-open trial limit reached"
                );
                return BreakerVerdict::HalfOpenLimitReached {
                    retry_at_ms: retry_at,
                };
            }
            // No trial reported back in time
            cell.half_open_trials_used = 0;
            cell.half_open_since_ms = now_ms;
        }
        cell.half_open_trials_used += 1;
        BreakerVerdict::Allow { trial: true }
    }

    /// Hand back a trial slot taken by a request that was denied later.
    pub fn release_trial(&self) {
        let mut cell = self.lock();
        if cell.state == CircuitState::HalfOpen {
            cell.half_open_trials_used = cell.half_open_trials_used.saturating_sub(1);
        }
    }

    pub fn record_success(&self, config: &CircuitBreakerConfig) {
        if !config.enabled {
            return;
        }

        let mut cell = self.lock();
        match cell.state {
            CircuitState::HalfOpen => {
                cell.close();
                tracing::info!(rule_id = %self.rule_id, "circuit breaker closed");
            }
            CircuitState::Closed => {
                cell.consecutive_failures = cell.consecutive_failures.saturating_sub(1);
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, config: &CircuitBreakerConfig) {
        if !config.enabled {
            return;
        }

        let now_ms = self.now_ms();
        let mut cell = self.lock();

        match cell.state {
            CircuitState::Closed => {
                let period_ms = config.monitoring_period_secs.saturating_mul(1000);
                let stale = matches!(
                    cell.last_failure_ms,
                    Some(last) if period_ms > 0 && now_ms.saturating_sub(last) > period_ms
                );
                if stale {
                    cell.consecutive_failures = 0;
                }
                cell.consecutive_failures = cell.consecutive_failures.saturating_add(1);
                cell.last_failure_ms = Some(now_ms);

                if cell.consecutive_failures >= config.failure_threshold {
                    let next_attempt = cell.open(now_ms, config);
                    tracing::warn!(
                        rule_id = %self.rule_id,
                        consecutive_failures = cell.consecutive_failures,
                        next_attempt_ms = next_attempt,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                cell.consecutive_failures = cell.consecutive_failures.saturating_add(1);
                cell.last_failure_ms = Some(now_ms);
                let next_attempt = cell.open(now_ms, config);
                tracing::warn!(
                    rule_id = %self.rule_id,
                    consecutive_failures = cell.consecutive_failures,
                    next_attempt_ms = next_attempt,
                    "circuit breaker reopened after failed trial"
                );
            }
            CircuitState::Open => {
                cell.consecutive_failures = cell.consecutive_failures.saturating_add(1);
                cell.last_failure_ms = Some(now_ms);
            }
        }
    }

    /// Current state. Disabled breakers always read as closed.
    pub fn snapshot(&self, config: &CircuitBreakerConfig) -> CircuitBreakerState {
        if !config.enabled {
            return CircuitBreakerState::default();
        }
        self.lock().to_state()
    }

    /// Force the breaker back to a fresh closed state.
    pub fn reset(&self) {
        *self.lock() = BreakerCell::default();
    }
}
