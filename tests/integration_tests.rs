use route_guard::infrastructure::mocks::MockClock;
use route_guard::{
    CacheConfig, DenyReason, Gateway, HeaderOverrides, Method, Outcome, RateLimitConfig,
    RequestContext, Rule, Transformation, VaryDimension,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn gateway_at(clock: &MockClock, rules: Vec<Rule>) -> Gateway {
    Gateway::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_rules(rules)
        .build()
        .unwrap()
}

fn contact_detail() -> Rule {
    Rule::new(
        "contact-detail",
        Method::Get,
        "/api/v1/contacts/:id",
        "contacts-service",
    )
    .unwrap()
    .with_cache(CacheConfig {
        enabled: true,
        ttl_secs: 120,
        key: "contacts:detail".to_string(),
        vary: vec![VaryDimension::User],
        headers: Vec::new(),
    })
}

#[test]
fn test_full_request_lifecycle() {
    let clock = MockClock::at_unix_secs(1_200);
    let gateway = gateway_at(&clock, vec![contact_detail()]);

    let request = RequestContext::get("/api/v1/contacts/42").with_user("u1");
    let first = gateway.admit(&request);
    assert!(first.allowed);
    assert!(!first.cache_hit);
    assert_eq!(first.rule.as_ref().unwrap().target, "contacts-service");

    let ticket = first.ticket.unwrap();
    gateway.report_outcome(
        &ticket,
        Outcome::success(Duration::from_millis(40)).with_payload(&b"{\"id\":42}"[..]),
    );

    let second = gateway.admit(&request);
    assert!(second.allowed);
    assert!(second.cache_hit);
    assert_eq!(second.cached_payload.as_deref(), Some(&b"{\"id\":42}"[..]));

    let metrics = gateway.metrics("contact-detail").unwrap();
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.successful_requests, 1);
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.active_connections, 1);
}

#[test]
fn test_unmatched_and_disabled_routes_are_not_found() {
    let clock = MockClock::at_unix_secs(0);
    let gateway = gateway_at(
        &clock,
        vec![
            contact_detail(),
            Rule::new("legacy", Method::Get, "/legacy", "old-service")
                .unwrap()
                .with_enabled(false),
        ],
    );

    let miss = gateway.admit(&RequestContext::get("/api/v1/companies"));
    assert!(!miss.allowed);
    assert_eq!(miss.error, Some(DenyReason::RouteNotFound));
    assert!(miss.rule.is_none());
    assert!(miss.ticket.is_none());

    let wrong_method = gateway.admit(&RequestContext::new(Method::Delete, "/api/v1/contacts/1"));
    assert_eq!(wrong_method.error, Some(DenyReason::RouteNotFound));

    let too_deep = gateway.admit(&RequestContext::get("/api/v1/contacts/1/notes"));
    assert_eq!(too_deep.error, Some(DenyReason::RouteNotFound));

    let disabled = gateway.admit(&RequestContext::get("/legacy"));
    assert_eq!(disabled.error, Some(DenyReason::RouteNotFound));
}

#[test]
fn test_first_registered_rule_wins() {
    let clock = MockClock::at_unix_secs(0);
    let gateway = gateway_at(
        &clock,
        vec![
            Rule::new("by-id", Method::Get, "/items/:id", "a").unwrap(),
            Rule::new("special", Method::Get, "/items/special", "b").unwrap(),
        ],
    );

    let decision = gateway.admit(&RequestContext::get("/items/special"));
    assert_eq!(decision.rule.unwrap().id, "by-id");
}

#[test]
fn test_forward_headers_apply_request_overrides() {
    let clock = MockClock::at_unix_secs(0);
    let overrides = HeaderOverrides {
        headers: BTreeMap::from([("X-Gateway".to_string(), "route-guard".to_string())]),
    };
    let rule = Rule::new("proxied", Method::Post, "/proxied", "svc")
        .unwrap()
        .with_transformation(Transformation {
            request: overrides.clone(),
            response: overrides,
        });
    let gateway = gateway_at(&clock, vec![rule]);

    let decision = gateway.admit(
        &RequestContext::new(Method::Post, "/proxied").with_header("Accept", "application/json"),
    );

    assert!(decision.allowed);
    assert_eq!(
        decision.forward_headers.get("x-gateway").map(String::as_str),
        Some("route-guard")
    );
    assert_eq!(
        decision.forward_headers.get("accept").map(String::as_str),
        Some("application/json")
    );
    assert!(decision.rule.unwrap().response_headers().is_some());
}

#[test]
fn test_default_rules_admit_their_routes() {
    let gateway = Gateway::builder().with_default_rules().build().unwrap();

    let list = gateway.admit(&RequestContext::get("/api/v1/companies").with_user("u1"));
    assert_eq!(list.rule.unwrap().id, "companies-list");

    let create = gateway.admit(&RequestContext::new(Method::Post, "/api/v1/contacts"));
    assert_eq!(create.rule.unwrap().id, "contacts-create");

    let chat = gateway.admit(&RequestContext::new(Method::Post, "/api/v1/ai/chat"));
    assert_eq!(chat.rule.unwrap().id, "ai-chat");
}

#[test]
fn test_concurrent_admissions_respect_limit() {
    let clock = MockClock::at_unix_secs(600);
    let rule = Rule::new("busy", Method::Get, "/busy", "svc")
        .unwrap()
        .with_rate_limit(RateLimitConfig {
            requests: 50,
            window_secs: 60,
            ..RateLimitConfig::default()
        });
    let gateway = Arc::new(gateway_at(&clock, vec![rule]));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let gateway = Arc::clone(&gateway);
            std::thread::spawn(move || {
                (0..20)
                    .filter(|_| gateway.admit(&RequestContext::get("/busy")).allowed)
                    .count()
            })
        })
        .collect();

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 50);
    assert_eq!(gateway.metrics("busy").unwrap().total_requests, 50);
}
