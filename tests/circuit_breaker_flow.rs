use route_guard::infrastructure::mocks::MockClock;
use route_guard::{
    CircuitBreakerConfig, CircuitState, DenyReason, Gateway, HealthStatus, Method, Outcome,
    RateLimitConfig, RequestContext, Rule,
};
use std::sync::Arc;
use std::time::Duration;

const PATH: &str = "/api/v1/ai/chat";

fn guarded(threshold: u32, recovery_secs: u64, max_calls: u32, requests: u32) -> Rule {
    Rule::new("ai-chat", Method::Post, PATH, "ai-service")
        .unwrap()
        .with_rate_limit(RateLimitConfig {
            requests,
            window_secs: 3600,
            ..RateLimitConfig::default()
        })
        .with_circuit_breaker(CircuitBreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            recovery_timeout_secs: recovery_secs,
            monitoring_period_secs: 600,
            half_open_max_calls: max_calls,
        })
}

fn setup(rule: Rule) -> (MockClock, Gateway) {
    let clock = MockClock::at_unix_secs(3_600);
    let gateway = Gateway::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_rule(rule)
        .build()
        .unwrap();
    (clock, gateway)
}

fn request() -> RequestContext {
    RequestContext::new(Method::Post, PATH)
}

fn fail_once(gateway: &Gateway) {
    let decision = gateway.admit(&request());
    assert!(decision.allowed, "expected admission, got {:?}", decision.error);
    gateway.report_outcome(
        decision.ticket.as_ref().unwrap(),
        Outcome::failure(Duration::from_millis(500)),
    );
}

#[test]
fn test_breaker_opens_and_recovers() {
    let (clock, gateway) = setup(guarded(3, 30, 1, 100));

    for _ in 0..3 {
        fail_once(&gateway);
    }
    let states = gateway.circuit_breaker_states();
    assert_eq!(states["ai-chat"].state, CircuitState::Open);
    assert_eq!(states["ai-chat"].consecutive_failures, 3);

    let denied = gateway.admit(&request());
    assert_eq!(denied.error, Some(DenyReason::CircuitOpen));
    assert_eq!(denied.retry_after_secs, Some(30));
    assert!(denied.circuit_breaker.unwrap().is_open());

    clock.advance(Duration::from_secs(10));
    assert_eq!(gateway.admit(&request()).retry_after_secs, Some(20));

    clock.advance(Duration::from_secs(20));
    let trial = gateway.admit(&request());
    assert!(trial.allowed);
    assert_eq!(trial.circuit_breaker.as_ref().unwrap().state, CircuitState::HalfOpen);
    assert!(trial.ticket.as_ref().unwrap().half_open_trial);

    let blocked = gateway.admit(&request());
    assert_eq!(blocked.error, Some(DenyReason::HalfOpenLimitReached));
    assert_eq!(blocked.retry_after_secs, Some(30));

    gateway.report_outcome(
        trial.ticket.as_ref().unwrap(),
        Outcome::success(Duration::from_millis(80)),
    );
    let after = gateway.admit(&request());
    assert!(after.allowed);
    assert_eq!(after.circuit_breaker.unwrap().state, CircuitState::Closed);
}

#[test]
fn test_failed_trial_reopens() {
    let (clock, gateway) = setup(guarded(2, 30, 2, 100));
    fail_once(&gateway);
    fail_once(&gateway);

    clock.advance(Duration::from_secs(30));
    fail_once(&gateway);

    let state = &gateway.circuit_breaker_states()["ai-chat"];
    assert_eq!(state.state, CircuitState::Open);
    assert_eq!(gateway.admit(&request()).error, Some(DenyReason::CircuitOpen));
}

#[test]
fn test_rate_limited_trial_is_given_back() {
    // The three failures use up the whole window
    let (clock, gateway) = setup(guarded(3, 30, 1, 3));
    for _ in 0..3 {
        fail_once(&gateway);
    }

    clock.advance(Duration::from_secs(30));
    let denied = gateway.admit(&request());
    assert_eq!(denied.error, Some(DenyReason::RateLimitExceeded));

    let breaker = denied.circuit_breaker.unwrap();
    assert_eq!(breaker.state, CircuitState::HalfOpen);
    assert_eq!(breaker.half_open_trials_used, 0);
}

#[test]
fn test_open_breakers_drive_health() {
    let (_clock, gateway) = setup(guarded(1, 30, 1, 100));
    assert_eq!(gateway.health().status, HealthStatus::Healthy);

    fail_once(&gateway);
    let report = gateway.health();
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert_eq!(report.details.open_circuit_breakers, 1);
    assert_eq!(report.details.high_error_rates, 1);

    assert!(gateway.reset_circuit_breaker("ai-chat"));
    assert!(gateway.reset_metrics("ai-chat"));
    assert_eq!(gateway.health().status, HealthStatus::Healthy);
}

#[test]
fn test_disabled_breaker_never_denies() {
    let rule = Rule {
        circuit_breaker: CircuitBreakerConfig {
            enabled: false,
            ..CircuitBreakerConfig::default()
        },
        ..guarded(1, 30, 1, 100)
    };
    let (_clock, gateway) = setup(rule);

    for _ in 0..10 {
        fail_once(&gateway);
    }
    assert_eq!(
        gateway.circuit_breaker_states()["ai-chat"].state,
        CircuitState::Closed
    );
}
