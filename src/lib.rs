//! # route-guard
//!
//! In-process admission and resilience gateway for request routers.
//!
//! A [`Gateway`] sits in front of a set of backend targets. For every
//! incoming request it matches a configured [`Rule`], consults the rule's
//! circuit breaker, serves cached responses for idempotent reads, and enforces
//! per-rule rate limits. After the downstream call, the caller reports the
//! outcome so the gateway can update metrics, drive the breaker and populate
//! the cache.
//!
//! ## Quick Start
//!
//! ```rust
//! use route_guard::{Gateway, Method, Outcome, RateLimitConfig, RequestContext, Rule};
//! use std::time::Duration;
//!
//! let gateway = Gateway::builder()
//!     .with_rule(
//!         Rule::new("contact-detail", Method::Get, "/api/v1/contacts/:id", "contacts-service")?
//!             .with_rate_limit(RateLimitConfig {
//!                 requests: 30,
//!                 window_secs: 60,
//!                 per_user: true,
//!                 ..RateLimitConfig::default()
//!             }),
//!     )
//!     .build()?;
//!
//! let request = RequestContext::get("/api/v1/contacts/42").with_user("user-1");
//! let decision = gateway.admit(&request);
//! assert!(decision.allowed);
//!
//! // ... call the backend, then report how it went
//! if let Some(ticket) = &decision.ticket {
//!     gateway.report_outcome(ticket, Outcome::success(Duration::from_millis(12)));
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Request Lifecycle
//!
//! Admission runs these checks in order and stops at the first failure:
//!
//! 1. **Match**: the first enabled rule, in registration order, whose method
//!    matches and whose path pattern matches segment by segment.
//!    Otherwise: [`DenyReason::RouteNotFound`].
//! 2. **Circuit breaker**: an open breaker denies with
//!    [`DenyReason::CircuitOpen`]; a half-open breaker admits a bounded number
//!    of trials, then denies with [`DenyReason::HalfOpenLimitReached`].
//! 3. **Cache** (GET rules with caching enabled): a fresh entry is returned
//!    in [`Decision::cached_payload`].
//! 4. **Rate limit**: fixed windows aligned to the Unix epoch. A full window
//!    denies with [`DenyReason::RateLimitExceeded`] and a retry hint.
//!
//! Denied decisions carry a machine-readable [`DenyReason`] and, where it
//! applies, `retry_after_secs`:
//!
//! ```rust
//! use route_guard::{DenyReason, Gateway, Method, RateLimitConfig, RequestContext, Rule};
//!
//! let gateway = Gateway::builder()
//!     .with_rule(
//!         Rule::new("ai-chat", Method::Post, "/api/v1/ai/chat", "ai-service")?
//!             .with_rate_limit(RateLimitConfig {
//!                 requests: 1,
//!                 window_secs: 3600,
//!                 ..RateLimitConfig::default()
//!             }),
//!     )
//!     .build()?;
//!
//! let request = RequestContext::new(Method::Post, "/api/v1/ai/chat");
//! assert!(gateway.admit(&request).allowed);
//!
//! let denied = gateway.admit(&request);
//! assert_eq!(denied.error, Some(DenyReason::RateLimitExceeded));
//! assert!(denied.retry_after_secs.unwrap() > 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Known Limitations
//!
//! - Fixed windows admit up to twice the limit across a window boundary.
//! - P95/P99 latencies track the largest value observed, not true percentiles.
//! - All state is local to the process: several gateway instances behind a
//!   load balancer each keep their own limits, caches and breakers.
//! - A caller that never reports an outcome leaves the rate-limit unit
//!   consumed and the breaker untouched.
//!
//! ## Background Sweeping
//!
//! Elapsed counters and expired cache entries are evicted by
//! [`Gateway::sweep`]. With the `async` feature (enabled by default) the
//! gateway can run this on an interval inside a tokio runtime:
//!
//! ```rust,no_run
//! # use route_guard::Gateway;
//! # use std::time::Duration;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Gateway::builder()
//!     .with_default_rules()
//!     .with_sweeper(true)
//!     .with_sweep_interval(Duration::from_secs(60))
//!     .build()?;
//!
//! // Serve traffic...
//!
//! gateway.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - `domain`: pure types (path patterns, rules, requests, decisions)
//! - `application`: stateful components (registry, limiter, breaker, cache,
//!   metrics, dispatcher, sweeper) and the ports they depend on
//! - `infrastructure`: adapters (system clock, sharded storage, rule files,
//!   the gateway facade, test mocks)

// Domain layer - pure types
pub mod domain;

// Application layer - stateful components
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    decision::{DenyReason, Outcome, RateLimitInfo},
    request::{Identity, RequestContext},
    route::{PathPattern, PatternError, Segment},
    rule::{
        CacheConfig, CircuitBreakerConfig, HeaderOverrides, Method, RateLimitConfig, Rule,
        RuleError, RulePatch, Transformation, UnknownMethod, VaryDimension,
    },
};

pub use application::{
    circuit_breaker::{CircuitBreakerState, CircuitState},
    dispatcher::{AdmissionTicket, Decision, Dispatcher},
    health::{HealthDetails, HealthReport, HealthStatus, HealthThresholds},
    metrics::MetricsSnapshot,
    ports::{Clock, Storage},
    sweeper::{ShutdownError, SweepConfig, SweepConfigError, SweepStats},
};

#[cfg(feature = "async")]
pub use application::sweeper::SweepHandle;

pub use infrastructure::{
    clock::SystemClock,
    config::{default_rules, load_rules_from_path, load_rules_from_str, ConfigError},
    gateway::{BuildError, Gateway, GatewayBuilder},
    storage::ShardedStorage,
};
