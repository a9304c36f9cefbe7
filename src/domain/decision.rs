//! Admission vocabulary shared by the components and the dispatcher.

use crate::domain::time::serialize_unix_millis;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Machine-readable reason attached to every deny decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    /// No enabled rule matches the request
    RouteNotFound,
    /// The rule's breaker is open
    CircuitOpen,
    /// The rule's breaker is half-open and its trial budget is spent
    HalfOpenLimitReached,
    /// The rule's rate-limit window is exhausted
    RateLimitExceeded,
    /// Unexpected fault inside the gateway
    InternalError,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::RouteNotFound => "ROUTE_NOT_FOUND",
            DenyReason::CircuitOpen => "CIRCUIT_OPEN",
            DenyReason::HalfOpenLimitReached => "HALF_OPEN_LIMIT_REACHED",
            DenyReason::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            DenyReason::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying later can succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DenyReason::CircuitOpen
                | DenyReason::HalfOpenLimitReached
                | DenyReason::RateLimitExceeded
        )
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate-limit state reported with a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// End of the current window (Unix milliseconds when serialized)
    #[serde(serialize_with = "serialize_unix_millis")]
    pub reset_at: SystemTime,
    /// Seconds to wait before retrying, set only on denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Result of a downstream call, reported after the fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub latency: Duration,
    /// Response body eligible for caching
    pub payload: Option<Bytes>,
}

impl Outcome {
    pub fn success(latency: Duration) -> Self {
        Self {
            success: true,
            latency,
            payload: None,
        }
    }

    pub fn failure(latency: Duration) -> Self {
        Self {
            success: false,
            latency,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}
