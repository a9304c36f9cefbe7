//! The gateway's structured log events.

use route_guard::infrastructure::mocks::{MockCaptureLayer, MockClock};
use route_guard::{
    CircuitBreakerConfig, Clock, DenyReason, Gateway, Method, Outcome, RateLimitConfig,
    RequestContext, Rule,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

fn with_capture<R>(f: impl FnOnce() -> R) -> (MockCaptureLayer, R) {
    let capture = MockCaptureLayer::new();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (capture, result)
}

fn breaker_rule() -> Rule {
    Rule::new("ai-chat", Method::Post, "/chat", "ai-service")
        .unwrap()
        .with_rate_limit(RateLimitConfig {
            requests: 1,
            window_secs: 3600,
            ..RateLimitConfig::default()
        })
        .with_circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout_secs: 10,
            half_open_max_calls: 1,
            ..CircuitBreakerConfig::default()
        })
}

#[test]
fn test_rule_registration_is_logged() {
    let (capture, _) = with_capture(|| {
        let gateway = Gateway::new();
        gateway.add_rule(breaker_rule()).unwrap();
        gateway.add_rule(breaker_rule()).unwrap();
        gateway.remove_rule("ai-chat");
    });

    let added = capture.find("rule added");
    assert_eq!(added.len(), 2);
    assert_eq!(added[0].level, Level::INFO);
    assert_eq!(added[0].field("rule_id"), Some("ai-chat"));
    assert_eq!(added[0].field("replaced"), Some("false"));
    assert_eq!(added[1].field("replaced"), Some("true"));

    assert_eq!(capture.find("rule removed").len(), 1);
}

#[test]
fn test_denials_carry_reason() {
    let clock = MockClock::at_unix_secs(7_200);
    let gateway = Gateway::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_rule(breaker_rule())
        .build()
        .unwrap();

    let (capture, _) = with_capture(|| {
        gateway.admit(&RequestContext::get("/nowhere"));
        gateway.admit(&RequestContext::new(Method::Post, "/chat"));
        gateway.admit(&RequestContext::new(Method::Post, "/chat"));
    });

    let denied = capture.find("request denied");
    assert_eq!(denied.len(), 2);
    assert!(denied.iter().all(|e| e.level == Level::DEBUG));
    assert_eq!(
        denied[0].field("reason"),
        Some(DenyReason::RouteNotFound.as_str())
    );
    assert_eq!(denied[0].field("path"), Some("/nowhere"));
    assert_eq!(
        denied[1].field("reason"),
        Some(DenyReason::RateLimitExceeded.as_str())
    );
    assert_eq!(denied[1].field("retry_after_secs"), Some("3600"));
}

#[test]
fn test_breaker_transitions_are_logged() {
    let clock = MockClock::at_unix_secs(7_200);
    let rule = Rule {
        rate_limit: RateLimitConfig::default(),
        ..breaker_rule()
    };
    let gateway = Gateway::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_rule(rule)
        .build()
        .unwrap();
    let request = RequestContext::new(Method::Post, "/chat");

    let (capture, _) = with_capture(|| {
        let first = gateway.admit(&request);
        gateway.report_outcome(
            first.ticket.as_ref().unwrap(),
            Outcome::failure(Duration::from_millis(900)),
        );

        clock.advance(Duration::from_secs(10));
        let trial = gateway.admit(&request);
        gateway.admit(&request);
        gateway.report_outcome(
            trial.ticket.as_ref().unwrap(),
            Outcome::success(Duration::from_millis(50)),
        );
    });

    let opened = capture.find("circuit breaker opened");
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].level, Level::WARN);
    assert_eq!(opened[0].field("rule_id"), Some("ai-chat"));
    assert_eq!(opened[0].field("consecutive_failures"), Some("1"));

    assert_eq!(capture.find("circuit breaker half-open").len(), 1);
    assert_eq!(capture.find("half-open trial limit reached").len(), 1);

    let closed = capture.find("circuit breaker closed");
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].level, Level::INFO);

    // Only the half-open admission reports a trial result
    let trials = capture.find("half-open trial finished");
    assert_eq!(trials.len(), 1);
    assert_eq!(trials[0].level, Level::INFO);
    assert_eq!(trials[0].field("rule_id"), Some("ai-chat"));
    assert_eq!(trials[0].field("success"), Some("true"));
}

#[test]
fn test_failed_trial_is_logged() {
    let clock = MockClock::at_unix_secs(7_200);
    let rule = Rule {
        rate_limit: RateLimitConfig::default(),
        ..breaker_rule()
    };
    let gateway = Gateway::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_rule(rule)
        .build()
        .unwrap();
    let request = RequestContext::new(Method::Post, "/chat");

    let (capture, _) = with_capture(|| {
        let first = gateway.admit(&request);
        gateway.report_outcome(
            first.ticket.as_ref().unwrap(),
            Outcome::failure(Duration::from_millis(900)),
        );

        clock.advance(Duration::from_secs(10));
        let trial = gateway.admit(&request);
        assert!(trial.ticket.as_ref().unwrap().half_open_trial);
        gateway.report_outcome(
            trial.ticket.as_ref().unwrap(),
            Outcome::failure(Duration::from_millis(900)),
        );
    });

    let trials = capture.find("half-open trial finished");
    assert_eq!(trials.len(), 1);
    assert_eq!(trials[0].field("success"), Some("false"));
    assert_eq!(capture.find("circuit breaker reopened").len(), 1);
}

#[derive(Debug)]
struct BrokenClock;

impl Clock for BrokenClock {
    fn now(&self) -> SystemTime {
        panic!("clock unavailable")
    }
}

#[test]
fn test_internal_errors_are_logged_and_contained() {
    let gateway = Gateway::builder()
        .with_clock(Arc::new(BrokenClock))
        .with_rule(breaker_rule())
        .build()
        .unwrap();

    let (capture, decision) =
        with_capture(|| gateway.admit(&RequestContext::new(Method::Post, "/chat")));

    assert_eq!(decision.error, Some(DenyReason::InternalError));
    let errors = capture.find("internal error during admission");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].level, Level::ERROR);
    assert_eq!(errors[0].field("panic"), Some("clock unavailable"));
}
