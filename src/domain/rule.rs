//! Rule definitions and their embedded configuration.
//!
//! A rule binds a (method, path pattern) pair to a backend target and
//! carries its own rate-limit, cache and circuit-breaker settings. Rules are
//! plain data: they are validated when registered and never mutated by the
//! request path.

use crate::domain::route::{PathPattern, PatternError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Error returned when a rule fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    /// Rule identifier must not be empty
    #[error("rule id must not be empty")]
    EmptyId,
    /// Rate limit must allow at least one request
    #[error("rule `{0}`: rate limit requests must be greater than 0")]
    ZeroLimit(String),
    /// Rate limit window must be at least one second
    #[error("rule `{0}`: rate limit window must be greater than 0")]
    ZeroWindow(String),
    /// Breaker would open without any failure
    #[error("rule `{0}`: circuit breaker failure threshold must be greater than 0")]
    ZeroFailureThreshold(String),
    /// Breaker could never test recovery
    #[error("rule `{0}`: circuit breaker half-open max calls must be greater than 0")]
    ZeroHalfOpenCalls(String),
    /// Path pattern could not be parsed
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// HTTP method a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    /// The canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    /// Only GET responses are eligible for the response cache.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unrecognised method name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown HTTP method `{0}`")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

/// Per-rule fixed-window rate limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    /// Requests admitted per window
    pub requests: u32,
    /// Window length in seconds
    #[serde(rename = "window")]
    pub window_secs: u64,
    /// Burst allowance (reported, does not raise the window limit)
    pub burst: u32,
    /// Reserved for adaptive limiting
    pub adaptive: bool,
    /// Partition counters by user id
    pub per_user: bool,
    /// Partition counters by organization id
    pub per_organization: bool,
    /// Give back the unit when the reported outcome is a success
    pub skip_successful_requests: bool,
}

impl RateLimitConfig {
    /// Window length as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window_secs: 60,
            burst: 0,
            adaptive: false,
            per_user: false,
            per_organization: false,
            skip_successful_requests: false,
        }
    }
}

/// Identity dimensions a cache key can vary on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VaryDimension {
    #[serde(rename = "user", alias = "user-id")]
    User,
    #[serde(rename = "organization", alias = "organization-id")]
    Organization,
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Entry lifetime in seconds
    #[serde(rename = "ttl")]
    pub ttl_secs: u64,
    /// Base cache key
    pub key: String,
    pub vary: Vec<VaryDimension>,
    /// Request header names that further partition the key
    pub headers: Vec<String>,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn varies_on(&self, dimension: VaryDimension) -> bool {
        self.vary.contains(&dimension)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 0,
            key: String::new(),
            vary: Vec::new(),
            headers: Vec::new(),
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Seconds to stay open before probing
    #[serde(rename = "recoveryTimeout")]
    pub recovery_timeout_secs: u64,
    /// Seconds after which an old failure streak is forgotten
    #[serde(rename = "monitoringPeriod")]
    pub monitoring_period_secs: u64,
    /// Trial calls allowed while half-open
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn monitoring_period(&self) -> Duration {
        Duration::from_secs(self.monitoring_period_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_secs: 30,
            monitoring_period_secs: 60,
            half_open_max_calls: 3,
        }
    }
}

/// Header overrides applied on one side of the exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderOverrides {
    pub headers: BTreeMap<String, String>,
}

/// Header rewriting attached to a rule.
///
/// Only headers are rewritten; bodies pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transformation {
    pub request: HeaderOverrides,
    pub response: HeaderOverrides,
}

/// A registered routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub path: PathPattern,
    pub method: Method,
    /// Backend target identifier
    pub target: String,
    #[serde(default)]
    pub version: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<Transformation>,
}

fn enabled_by_default() -> bool {
    true
}

impl Rule {
    /// Create an enabled rule with default configuration.
    ///
    /// # Errors
    /// Returns `RuleError::Pattern` if `path` is not a valid pattern.
    pub fn new(
        id: impl Into<String>,
        method: Method,
        path: &str,
        target: impl Into<String>,
    ) -> Result<Self, RuleError> {
        Ok(Self {
            id: id.into(),
            path: PathPattern::parse(path)?,
            method,
            target: target.into(),
            version: "v1".to_string(),
            enabled: true,
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            transformation: None,
        })
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn with_transformation(mut self, transformation: Transformation) -> Self {
        self.transformation = Some(transformation);
        self
    }

    /// Check the invariants the runtime components rely on.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.id.trim().is_empty() {
            return Err(RuleError::EmptyId);
        }
        if self.rate_limit.requests == 0 {
            return Err(RuleError::ZeroLimit(self.id.clone()));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(RuleError::ZeroWindow(self.id.clone()));
        }
        if self.circuit_breaker.enabled {
            if self.circuit_breaker.failure_threshold == 0 {
                return Err(RuleError::ZeroFailureThreshold(self.id.clone()));
            }
            if self.circuit_breaker.half_open_max_calls == 0 {
                return Err(RuleError::ZeroHalfOpenCalls(self.id.clone()));
            }
        }
        Ok(())
    }

    /// Whether a request with `method` may be served from or written to the cache.
    pub fn caches(&self, method: Method) -> bool {
        self.cache.enabled && method.is_cacheable()
    }

    /// Response header overrides the caller should apply downstream.
    pub fn response_headers(&self) -> Option<&BTreeMap<String, String>> {
        self.transformation
            .as_ref()
            .map(|t| &t.response.headers)
            .filter(|h| !h.is_empty())
    }
}

/// Partial update for a registered rule.
///
/// `None` fields are left unchanged. The identifier cannot be patched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RulePatch {
    pub path: Option<PathPattern>,
    pub method: Option<Method>,
    pub target: Option<String>,
    pub version: Option<String>,
    pub enabled: Option<bool>,
    pub rate_limit: Option<RateLimitConfig>,
    pub cache: Option<CacheConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub transformation: Option<Transformation>,
}

impl RulePatch {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    /// Produce the patched copy of `rule`.
    pub fn apply_to(&self, rule: &Rule) -> Rule {
        let mut next = rule.clone();
        if let Some(path) = &self.path {
            next.path = path.clone();
        }
        if let Some(method) = self.method {
            next.method = method;
        }
        if let Some(target) = &self.target {
            next.target = target.clone();
        }
        if let Some(version) = &self.version {
            next.version = version.clone();
        }
        if let Some(enabled) = self.enabled {
            next.enabled = enabled;
        }
        if let Some(rate_limit) = &self.rate_limit {
            next.rate_limit = rate_limit.clone();
        }
        if let Some(cache) = &self.cache {
            next.cache = cache.clone();
        }
        if let Some(circuit_breaker) = &self.circuit_breaker {
            next.circuit_breaker = circuit_breaker.clone();
        }
        if let Some(transformation) = &self.transformation {
            next.transformation = Some(transformation.clone());
        }
        next
    }
}
