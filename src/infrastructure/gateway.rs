//! Gateway facade and builder.
//!
//! [`Gateway`] is the entry point applications hold on to: it owns the
//! dispatcher, exposes the request-path and administrative operations, and
//! manages the lifecycle of the background sweeper.

use crate::application::circuit_breaker::CircuitBreakerState;
use crate::application::dispatcher::{AdmissionTicket, Decision, Dispatcher};
use crate::application::health::{HealthReport, HealthThresholds};
use crate::application::metrics::MetricsSnapshot;
use crate::application::ports::Clock;
use crate::application::sweeper::{SweepConfig, SweepConfigError, SweepStats, DEFAULT_SWEEP_INTERVAL};
use crate::domain::decision::{Outcome, RateLimitInfo};
use crate::domain::request::RequestContext;
use crate::domain::rule::{Rule, RuleError, RulePatch};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::config::default_rules;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "async")]
use crate::application::sweeper::{ShutdownError, SweepHandle, Sweeper};
#[cfg(feature = "async")]
use std::sync::{Mutex, PoisonError};

/// Error returned when building a [`Gateway`] fails.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Sweep interval validation failed
    #[error("sweeper configuration error: {0}")]
    SweepConfig(#[from] SweepConfigError),
    /// A configured rule failed validation
    #[error("invalid rule: {0}")]
    Rule(#[from] RuleError),
    /// The background sweeper was requested outside a tokio runtime
    #[error("background sweeping requires a running tokio runtime")]
    NoRuntime,
}

/// Builder for constructing a [`Gateway`].
#[derive(Debug)]
pub struct GatewayBuilder {
    clock: Option<Arc<dyn Clock>>,
    sweep_interval: Duration,
    thresholds: HealthThresholds,
    rules: Vec<Rule>,
    background_sweep: bool,
}

impl GatewayBuilder {
    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set how often expired counters and cache entries are evicted.
    ///
    /// The interval will be validated when `build()` is called.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_health_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Register a rule at build time.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Register the built-in rule catalogue.
    pub fn with_default_rules(self) -> Self {
        self.with_rules(default_rules())
    }

    /// Start the background sweeper when the gateway is built.
    ///
    /// Requires the `async` feature and a running tokio runtime at `build()`
    /// time. Without the `async` feature this setting is ignored; call
    /// [`Gateway::sweep`] periodically instead.
    ///
    /// Default: disabled
    pub fn with_sweeper(mut self, enabled: bool) -> Self {
        self.background_sweep = enabled;
        self
    }

    /// Build the gateway.
    ///
    /// # Errors
    /// Returns `BuildError` if the sweep interval is zero, a rule is invalid,
    /// or the sweeper was requested outside a tokio runtime.
    pub fn build(self) -> Result<Gateway, BuildError> {
        let sweep_config = SweepConfig::new(self.sweep_interval)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        let dispatcher = Dispatcher::new(clock, self.thresholds);
        for rule in self.rules {
            dispatcher.add_rule(rule)?;
        }

        let gateway = Gateway {
            dispatcher: Arc::new(dispatcher),
            sweep_config,
            #[cfg(feature = "async")]
            sweeper: Mutex::new(None),
        };

        #[cfg(feature = "async")]
        if self.background_sweep {
            gateway.start_sweeper()?;
        }

        Ok(gateway)
    }
}

/// In-process admission and resilience gateway.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
#[derive(Debug)]
pub struct Gateway {
    dispatcher: Arc<Dispatcher>,
    sweep_config: SweepConfig,
    #[cfg(feature = "async")]
    sweeper: Mutex<Option<SweepHandle>>,
}

impl Gateway {
    /// Create a builder for configuring the gateway.
    ///
    /// Defaults:
    /// - Clock: system clock
    /// - Sweep interval: 60 seconds
    /// - Health thresholds: degraded above 5% errors, unhealthy above 10%
    /// - Rules: none
    /// - Background sweeper: disabled
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder {
            clock: None,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            thresholds: HealthThresholds::default(),
            rules: Vec::new(),
            background_sweep: false,
        }
    }

    /// Create a gateway with default settings and no rules.
    pub fn new() -> Self {
        Self::builder()
            .build()
            .expect("default configuration is always valid")
    }

    /// Decide whether `request` may proceed.
    pub fn admit(&self, request: &RequestContext) -> Decision {
        self.dispatcher.admit(request)
    }

    /// Report how an admitted request went.
    pub fn report_outcome(&self, ticket: &AdmissionTicket, outcome: Outcome) {
        self.dispatcher.report_outcome(ticket, outcome);
    }

    pub fn list_rules(&self) -> Vec<Arc<Rule>> {
        self.dispatcher.list_rules()
    }

    pub fn rule(&self, id: &str) -> Option<Arc<Rule>> {
        self.dispatcher.rule(id)
    }

    /// Register a rule, replacing any rule with the same id.
    ///
    /// # Errors
    /// Returns the validation error if the rule is malformed.
    pub fn add_rule(&self, rule: Rule) -> Result<(), RuleError> {
        self.dispatcher.add_rule(rule)
    }

    /// Patch a rule. Returns `Ok(false)` if no rule has `id`.
    ///
    /// # Errors
    /// Returns the validation error if the patched rule is malformed.
    pub fn update_rule(&self, id: &str, patch: &RulePatch) -> Result<bool, RuleError> {
        self.dispatcher.update_rule(id, patch)
    }

    pub fn remove_rule(&self, id: &str) -> bool {
        self.dispatcher.remove_rule(id)
    }

    pub fn metrics(&self, rule_id: &str) -> Option<MetricsSnapshot> {
        self.dispatcher.metrics(rule_id)
    }

    pub fn all_metrics(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.dispatcher.all_metrics()
    }

    pub fn circuit_breaker_states(&self) -> BTreeMap<String, CircuitBreakerState> {
        self.dispatcher.circuit_breaker_states()
    }

    /// Peek at a rule's current window for an identity.
    pub fn rate_limit_info(
        &self,
        rule_id: &str,
        user_id: Option<&str>,
        organization_id: Option<&str>,
    ) -> Option<RateLimitInfo> {
        self.dispatcher
            .rate_limit_info(rule_id, user_id, organization_id)
    }

    pub fn health(&self) -> HealthReport {
        self.dispatcher.health()
    }

    pub fn reset_metrics(&self, rule_id: &str) -> bool {
        self.dispatcher.reset_metrics(rule_id)
    }

    pub fn reset_circuit_breaker(&self, rule_id: &str) -> bool {
        self.dispatcher.reset_circuit_breaker(rule_id)
    }

    /// Run one eviction pass now.
    pub fn sweep(&self) -> SweepStats {
        self.dispatcher.sweep()
    }

    pub fn sweep_config(&self) -> &SweepConfig {
        &self.sweep_config
    }

    /// Get the underlying dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Start the background sweeper if it is not already running.
    ///
    /// Returns `Ok(false)` if a sweeper was already running.
    ///
    /// # Errors
    /// Returns `BuildError::NoRuntime` outside a tokio runtime.
    #[cfg(feature = "async")]
    pub fn start_sweeper(&self) -> Result<bool, BuildError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BuildError::NoRuntime);
        }

        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(false);
        }
        let sweeper = Sweeper::new(Arc::clone(&self.dispatcher), self.sweep_config);
        *slot = Some(sweeper.start());
        Ok(true)
    }

    pub fn is_sweeping(&self) -> bool {
        #[cfg(feature = "async")]
        {
            self.sweeper
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
        }
        #[cfg(not(feature = "async"))]
        {
            false
        }
    }

    /// Stop the background sweeper, if running, and wait for it to exit.
    ///
    /// **Requires the `async` feature.**
    ///
    /// # Errors
    /// Returns an error if the sweeper task fails to shut down gracefully.
    #[cfg(feature = "async")]
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        // Release the lock before awaiting
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            handle.shutdown().await?;
        }
        Ok(())
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}
