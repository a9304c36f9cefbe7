//! Request admission pipeline.
//!
//! A request goes through rule matching, the rule's circuit breaker, the
//! response cache (cacheable methods only) and the rate limiter, in that
//! order. The first check that fails produces a deny decision carrying a
//! [`DenyReason`]. An admitted decision carries an [`AdmissionTicket`] that
//! the caller hands back to [`Dispatcher::report_outcome`] once the
//! downstream call has finished.
//!
//! Neither entry point lets a panic escape: admission converts one into an
//! `InternalError` denial, outcome reporting logs it and skips the update.

use crate::application::cache::{cache_key, ResponseCache};
use crate::application::circuit_breaker::{BreakerVerdict, CircuitBreaker, CircuitBreakerState};
use crate::application::health::{evaluate, HealthReport, HealthThresholds, RuleHealth};
use crate::application::limiter::RateLimiter;
use crate::application::metrics::{MetricsSnapshot, RuleMetrics};
use crate::application::ports::Clock;
use crate::application::registry::{Registration, RuleRegistry};
use crate::application::sweeper::SweepStats;
use crate::domain::decision::{DenyReason, Outcome, RateLimitInfo};
use crate::domain::request::{Identity, RequestContext};
use crate::domain::rule::{Rule, RuleError, RulePatch};
use crate::domain::time::{secs_until_ceil, unix_millis};
use crate::infrastructure::storage::ShardedStorage;
use bytes::Bytes;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Handle for reporting the outcome of an admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionTicket {
    pub rule_id: String,
    /// Cache key to populate on success, set for every cacheable request
    pub cache_key: Option<String>,
    /// Counter to refund on success, set for rules that skip successful requests
    pub counter_key: Option<String>,
    /// Whether the request consumed a half-open trial slot
    pub half_open_trial: bool,
}

/// Admission verdict returned to the caller.
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub allowed: bool,
    pub rule: Option<Arc<Rule>>,
    pub rate_limit: Option<RateLimitInfo>,
    pub circuit_breaker: Option<CircuitBreakerState>,
    pub cache_hit: bool,
    pub cached_payload: Option<Bytes>,
    /// Request headers with the rule's request overrides applied
    pub forward_headers: BTreeMap<String, String>,
    pub error: Option<DenyReason>,
    /// Seconds until a retry can succeed, for retryable denials
    pub retry_after_secs: Option<u64>,
    pub ticket: Option<AdmissionTicket>,
}

impl Decision {
    fn denied(reason: DenyReason) -> Self {
        Self {
            error: Some(reason),
            ..Self::default()
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn reason(&self) -> Option<DenyReason> {
        self.error
    }
}

/// Orchestrates the gateway components around single requests.
#[derive(Debug)]
pub struct Dispatcher {
    rules: RuleRegistry,
    limiter: RateLimiter,
    cache: ResponseCache,
    breakers: ShardedStorage<String, Arc<CircuitBreaker>>,
    metrics: ShardedStorage<String, RuleMetrics>,
    clock: Arc<dyn Clock>,
    thresholds: HealthThresholds,
}

impl Dispatcher {
    pub fn new(clock: Arc<dyn Clock>, thresholds: HealthThresholds) -> Self {
        Self {
            rules: RuleRegistry::new(),
            limiter: RateLimiter::new(Arc::new(ShardedStorage::new()), Arc::clone(&clock)),
            cache: ResponseCache::new(Arc::new(ShardedStorage::new()), Arc::clone(&clock)),
            breakers: ShardedStorage::new(),
            metrics: ShardedStorage::new(),
            clock,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    // Breaker and metrics entries are created by `add_rule` only, so a
    // request racing a removal never resurrects them.
    fn breaker(&self, rule_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .get(rule_id)
            .map(|breaker| Arc::clone(breaker.value()))
    }

    fn rule_metrics(&self, rule_id: &str) -> Option<RuleMetrics> {
        self.metrics
            .get(rule_id)
            .map(|metrics| metrics.value().clone())
    }

    fn reset_state(&self, rule_id: &str) {
        self.metrics.insert(rule_id.to_string(), RuleMetrics::new());
        self.breakers.insert(
            rule_id.to_string(),
            Arc::new(CircuitBreaker::new(rule_id, Arc::clone(&self.clock))),
        );
    }

    /// Decide whether `request` may proceed.
    pub fn admit(&self, request: &RequestContext) -> Decision {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_admission(request))) {
            Ok(decision) => decision,
            Err(payload) => {
                error!(
                    method = %request.method,
                    path = %request.path,
                    panic = panic_message(payload.as_ref()),
                    "internal error during admission"
                );
                Decision::denied(DenyReason::InternalError)
            }
        }
    }

    fn run_admission(&self, request: &RequestContext) -> Decision {
        let Some(rule) = self.rules.find(&request.path, request.method) else {
            debug!(
                method = %request.method,
                path = %request.path,
                reason = %DenyReason::RouteNotFound,
                "request denied"
            );
            return Decision::denied(DenyReason::RouteNotFound);
        };
        self.admit_matched(rule, request)
    }

    fn admit_matched(&self, rule: Arc<Rule>, request: &RequestContext) -> Decision {
        let Some(breaker) = self.breaker(&rule.id) else {
            debug!(
                rule_id = %rule.id,
                reason = %DenyReason::RouteNotFound,
                "request denied"
            );
            return Decision::denied(DenyReason::RouteNotFound);
        };
        let trial = match breaker.acquire(&rule.circuit_breaker) {
            BreakerVerdict::Allow { trial } => trial,
            BreakerVerdict::Open { retry_at_ms } => {
                return self.deny_by_breaker(rule, &breaker, DenyReason::CircuitOpen, retry_at_ms);
            }
            BreakerVerdict::HalfOpenLimitReached { retry_at_ms } => {
                return self.deny_by_breaker(
                    rule,
                    &breaker,
                    DenyReason::HalfOpenLimitReached,
                    retry_at_ms,
                );
            }
        };

        let mut cache_lookup = None;
        if rule.caches(request.method) {
            let key = cache_key(&rule.cache, request);
            let hit = self.cache.get(&key);
            cache_lookup = Some((key, hit));
        }

        let check = self.limiter.check(&rule, request.identity());
        if !check.allowed {
            if trial {
                breaker.release_trial();
            }
            debug!(
                rule_id = %rule.id,
                reason = %DenyReason::RateLimitExceeded,
                retry_after_secs = check.info.retry_after_secs,
                "request denied"
            );
            return Decision {
                rule: Some(Arc::clone(&rule)),
                rate_limit: Some(check.info),
                circuit_breaker: Some(breaker.snapshot(&rule.circuit_breaker)),
                error: Some(DenyReason::RateLimitExceeded),
                retry_after_secs: check.info.retry_after_secs,
                ..Decision::default()
            };
        }

        let (cache_key, cached_payload) = match cache_lookup {
            Some((key, hit)) => (Some(key), hit),
            None => (None, None),
        };
        let cache_hit = cached_payload.is_some();
        if cache_hit {
            debug!(rule_id = %rule.id, "cache hit");
        }

        if let Some(metrics) = self.rule_metrics(&rule.id) {
            metrics.record_admitted(cache_hit);
        }

        let ticket = AdmissionTicket {
            rule_id: rule.id.clone(),
            cache_key,
            counter_key: rule
                .rate_limit
                .skip_successful_requests
                .then(|| check.key.clone()),
            half_open_trial: trial,
        };

        Decision {
            allowed: true,
            forward_headers: forward_headers(&rule, request),
            circuit_breaker: Some(breaker.snapshot(&rule.circuit_breaker)),
            rate_limit: Some(check.info),
            rule: Some(rule),
            cache_hit,
            cached_payload,
            error: None,
            retry_after_secs: None,
            ticket: Some(ticket),
        }
    }

    fn deny_by_breaker(
        &self,
        rule: Arc<Rule>,
        breaker: &CircuitBreaker,
        reason: DenyReason,
        retry_at_ms: u64,
    ) -> Decision {
        let retry_after = secs_until_ceil(unix_millis(self.clock.now()), retry_at_ms);
        debug!(
            rule_id = %rule.id,
            reason = %reason,
            retry_after_secs = retry_after,
            "request denied"
        );
        Decision {
            circuit_breaker: Some(breaker.snapshot(&rule.circuit_breaker)),
            rule: Some(rule),
            error: Some(reason),
            retry_after_secs: Some(retry_after),
            ..Decision::default()
        }
    }

    /// Record the outcome of a request admitted with `ticket`.
    ///
    /// Failures inside the update are logged and the update is skipped.
    pub fn report_outcome(&self, ticket: &AdmissionTicket, outcome: Outcome) {
        let result =
            panic::catch_unwind(AssertUnwindSafe(|| self.apply_outcome(ticket, outcome)));
        if let Err(payload) = result {
            error!(
                rule_id = %ticket.rule_id,
                panic = panic_message(payload.as_ref()),
                "outcome reporting failed"
            );
        }
    }

    fn apply_outcome(&self, ticket: &AdmissionTicket, outcome: Outcome) {
        let Some(rule) = self.rules.get(&ticket.rule_id) else {
            debug!(rule_id = %ticket.rule_id, "outcome for removed rule ignored");
            return;
        };

        if let Some(metrics) = self.rule_metrics(&rule.id) {
            metrics.record_outcome(outcome.success, outcome.latency);
        }

        if let Some(breaker) = self.breaker(&rule.id) {
            if ticket.half_open_trial {
                info!(
                    rule_id = %rule.id,
                    success = outcome.success,
                    "half-open trial finished"
                );
            }
            if outcome.success {
                breaker.record_success(&rule.circuit_breaker);
            } else {
                breaker.record_failure(&rule.circuit_breaker);
            }
        }

        if !outcome.success {
            return;
        }

        if let Some(counter_key) = &ticket.counter_key {
            self.limiter.refund(counter_key);
        }

        if let (Some(key), Some(payload)) = (&ticket.cache_key, outcome.payload) {
            if rule.cache.enabled {
                self.cache.put(key.clone(), payload, rule.cache.ttl());
            }
        }
    }

    /// Register a rule, replacing any rule with the same id.
    ///
    /// The rule's metrics and breaker start fresh either way.
    ///
    /// # Errors
    /// Returns the validation error if the rule is malformed.
    pub fn add_rule(&self, rule: Rule) -> Result<(), RuleError> {
        let id = rule.id.clone();
        rule.validate()?;
        // State goes in first so a matched rule always finds its breaker
        self.reset_state(&id);
        let registration = self.rules.register(rule)?;
        info!(
            rule_id = %id,
            replaced = registration == Registration::Replaced,
            "rule added"
        );
        Ok(())
    }

    /// Patch a registered rule. Returns `Ok(false)` if no rule has `id`.
    ///
    /// # Errors
    /// Returns the validation error if the patched rule is malformed.
    pub fn update_rule(&self, id: &str, patch: &RulePatch) -> Result<bool, RuleError> {
        let updated = self.rules.update(id, patch)?;
        if updated.is_some() {
            info!(rule_id = %id, "rule updated");
        }
        Ok(updated.is_some())
    }

    pub fn remove_rule(&self, id: &str) -> bool {
        let removed = self.rules.remove(id).is_some();
        if removed {
            self.metrics.remove(id);
            self.breakers.remove(id);
            info!(rule_id = %id, "rule removed");
        }
        removed
    }

    pub fn list_rules(&self) -> Vec<Arc<Rule>> {
        self.rules.list()
    }

    pub fn rule(&self, id: &str) -> Option<Arc<Rule>> {
        self.rules.get(id)
    }

    /// Metrics for one rule, or `None` for an unknown rule.
    pub fn metrics(&self, rule_id: &str) -> Option<MetricsSnapshot> {
        self.rules.get(rule_id)?;
        Some(
            self.rule_metrics(rule_id)
                .map(|metrics| metrics.snapshot())
                .unwrap_or_default(),
        )
    }

    pub fn all_metrics(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.rules
            .list()
            .iter()
            .map(|rule| {
                let snapshot = self
                    .rule_metrics(&rule.id)
                    .map(|metrics| metrics.snapshot())
                    .unwrap_or_default();
                (rule.id.clone(), snapshot)
            })
            .collect()
    }

    pub fn circuit_breaker_states(&self) -> BTreeMap<String, CircuitBreakerState> {
        self.rules
            .list()
            .iter()
            .map(|rule| {
                let state = self
                    .breaker(&rule.id)
                    .map(|breaker| breaker.snapshot(&rule.circuit_breaker))
                    .unwrap_or_default();
                (rule.id.clone(), state)
            })
            .collect()
    }

    /// Current window of a rule for an identity, without consuming a unit.
    pub fn rate_limit_info(
        &self,
        rule_id: &str,
        user_id: Option<&str>,
        organization_id: Option<&str>,
    ) -> Option<RateLimitInfo> {
        let rule = self.rules.get(rule_id)?;
        Some(
            self.limiter
                .peek(&rule, Identity::new(user_id, organization_id)),
        )
    }

    pub fn health(&self) -> HealthReport {
        let rules = self.rules.list();
        let states: Vec<_> = rules
            .iter()
            .map(|rule| {
                (
                    rule.enabled,
                    self.breaker(&rule.id)
                        .map(|breaker| breaker.snapshot(&rule.circuit_breaker))
                        .unwrap_or_default(),
                    self.rule_metrics(&rule.id)
                        .map(|metrics| metrics.snapshot())
                        .unwrap_or_default(),
                )
            })
            .collect();

        evaluate(
            states.iter().map(|(enabled, breaker, metrics)| RuleHealth {
                enabled: *enabled,
                breaker,
                metrics,
            }),
            &self.thresholds,
        )
    }

    /// Zero a rule's metrics. Returns false for an unknown rule.
    pub fn reset_metrics(&self, rule_id: &str) -> bool {
        if self.rules.get(rule_id).is_none() {
            return false;
        }
        if let Some(metrics) = self.rule_metrics(rule_id) {
            metrics.reset();
        }
        true
    }

    /// Close a rule's breaker. Returns false for an unknown rule.
    pub fn reset_circuit_breaker(&self, rule_id: &str) -> bool {
        if self.rules.get(rule_id).is_none() {
            return false;
        }
        if let Some(breaker) = self.breaker(rule_id) {
            breaker.reset();
        }
        info!(rule_id = %rule_id, "circuit breaker reset");
        true
    }

    /// Evict elapsed rate-limit counters and expired cache entries.
    pub fn sweep(&self) -> SweepStats {
        let stats = SweepStats {
            counters_evicted: self.limiter.sweep(),
            cache_entries_evicted: self.cache.sweep(),
        };
        debug!(
            counters_evicted = stats.counters_evicted,
            cache_entries_evicted = stats.cache_entries_evicted,
            "sweep finished"
        );
        stats
    }

    pub fn counter_count(&self) -> usize {
        self.limiter.counter_count()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

fn forward_headers(rule: &Rule, request: &RequestContext) -> BTreeMap<String, String> {
    let mut headers = request.headers().clone();
    if let Some(transformation) = &rule.transformation {
        for (name, value) in &transformation.request.headers {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }
    }
    headers
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
