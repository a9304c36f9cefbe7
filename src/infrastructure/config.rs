//! Rule loading and the built-in rule catalogue.
//!
//! Rule files are JSON arrays of rule objects using camelCase field names.
//! Every nested section is optional and falls back to its defaults:
//!
//! ```json
//! [
//!   {
//!     "id": "contact-detail",
//!     "path": "/api/v1/contacts/:id",
//!     "method": "GET",
//!     "target": "contacts-service",
//!     "rateLimit": { "requests": 30, "window": 60, "perUser": true },
//!     "cache": { "enabled": true, "ttl": 120, "key": "contacts:detail", "vary": ["user"] }
//!   }
//! ]
//! ```

use crate::domain::rule::{
    CacheConfig, CircuitBreakerConfig, Method, RateLimitConfig, Rule, RuleError, VaryDimension,
};
use std::path::Path;

/// Error returned when loading rules fails.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read rule file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse rules: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid rule: {0}")]
    Invalid(#[from] RuleError),
}

/// Parse and validate a JSON array of rules.
///
/// # Errors
/// Returns `ConfigError::Parse` for malformed JSON and `ConfigError::Invalid`
/// for the first rule that fails validation.
pub fn load_rules_from_str(json: &str) -> Result<Vec<Rule>, ConfigError> {
    let rules: Vec<Rule> = serde_json::from_str(json)?;
    for rule in &rules {
        rule.validate()?;
    }
    Ok(rules)
}

/// Read, parse and validate a JSON rule file.
///
/// # Errors
/// See [`load_rules_from_str`]; also returns `ConfigError::Io` if the file
/// cannot be read.
pub fn load_rules_from_path(path: impl AsRef<Path>) -> Result<Vec<Rule>, ConfigError> {
    let json = std::fs::read_to_string(path)?;
    load_rules_from_str(&json)
}

fn seed(id: &str, method: Method, path: &'static str, target: &str) -> Rule {
    Rule::new(id, method, path, target).expect("built-in rule patterns are always valid")
}

/// Seed catalogue registered by `GatewayBuilder::with_default_rules`.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            rate_limit: RateLimitConfig {
                requests: 100,
                window_secs: 60,
                burst: 20,
                adaptive: true,
                per_user: true,
                per_organization: false,
                skip_successful_requests: false,
            },
            cache: CacheConfig {
                enabled: true,
                ttl_secs: 300,
                key: "companies:list".to_string(),
                vary: vec![VaryDimension::User, VaryDimension::Organization],
                headers: vec!["authorization".to_string()],
            },
            circuit_breaker: CircuitBreakerConfig {
                enabled: true,
                failure_threshold: 5,
                recovery_timeout_secs: 30,
                monitoring_period_secs: 60,
                half_open_max_calls: 3,
            },
            ..seed(
                "companies-list",
                Method::Get,
                "/api/v1/companies",
                "companies-service",
            )
        },
        Rule {
            rate_limit: RateLimitConfig {
                requests: 50,
                window_secs: 60,
                burst: 10,
                adaptive: true,
                per_user: true,
                per_organization: true,
                skip_successful_requests: true,
            },
            circuit_breaker: CircuitBreakerConfig {
                enabled: true,
                failure_threshold: 3,
                recovery_timeout_secs: 60,
                monitoring_period_secs: 120,
                half_open_max_calls: 2,
            },
            ..seed(
                "contacts-create",
                Method::Post,
                "/api/v1/contacts",
                "contacts-service",
            )
        },
        Rule {
            rate_limit: RateLimitConfig {
                requests: 20,
                window_secs: 60,
                burst: 5,
                adaptive: true,
                per_user: true,
                per_organization: true,
                skip_successful_requests: false,
            },
            circuit_breaker: CircuitBreakerConfig {
                enabled: true,
                failure_threshold: 3,
                recovery_timeout_secs: 120,
                monitoring_period_secs: 180,
                half_open_max_calls: 1,
            },
            ..seed("ai-chat", Method::Post, "/api/v1/ai/chat", "ai-service")
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_rules_are_valid() {
        let rules = default_rules();
        let ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["companies-list", "contacts-create", "ai-chat"]);
        for rule in &rules {
            rule.validate().unwrap();
        }
        assert!(rules[0].cache.enabled);
        assert!(rules[1].rate_limit.skip_successful_requests);
        assert_eq!(rules[2].circuit_breaker.half_open_max_calls, 1);
    }

    #[test]
    fn test_partial_rule_uses_defaults() {
        let rules = load_rules_from_str(
            r#"[{"id": "a", "path": "/a/:id", "method": "GET", "target": "svc"}]"#,
        )
        .unwrap();

        let rule = &rules[0];
        assert!(rule.enabled);
        assert_eq!(rule.rate_limit, RateLimitConfig::default());
        assert_eq!(rule.circuit_breaker, CircuitBreakerConfig::default());
        assert!(!rule.cache.enabled);
        assert!(rule.path.matches("/a/1"));
    }

    #[test]
    fn test_camel_case_fields() {
        let rules = load_rules_from_str(
            r#"[{
                "id": "a", "path": "/a", "method": "POST", "target": "svc",
                "rateLimit": {"requests": 5, "window": 10, "perOrganization": true, "skipSuccessfulRequests": true},
                "cache": {"enabled": true, "ttl": 30, "key": "a", "vary": ["user-id", "organization"], "headers": ["x-tenant"]},
                "circuitBreaker": {"failureThreshold": 2, "recoveryTimeout": 15, "halfOpenMaxCalls": 1}
            }]"#,
        )
        .unwrap();

        let rule = &rules[0];
        assert_eq!(rule.method, Method::Post);
        assert_eq!(rule.rate_limit.window_secs, 10);
        assert!(rule.rate_limit.per_organization);
        assert!(rule.rate_limit.skip_successful_requests);
        assert_eq!(
            rule.cache.vary,
            [VaryDimension::User, VaryDimension::Organization]
        );
        assert_eq!(rule.circuit_breaker.recovery_timeout_secs, 15);
        assert_eq!(rule.circuit_breaker.monitoring_period_secs, 60);
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let err = load_rules_from_str(
            r#"[{"id": "a", "path": "/a", "method": "GET", "target": "svc", "rateLimit": {"window": 0}}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(RuleError::ZeroWindow(_))));
    }

    #[test]
    fn test_bad_pattern_is_a_parse_error() {
        let err = load_rules_from_str(
            r#"[{"id": "a", "path": "no-slash", "method": "GET", "target": "svc"}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&default_rules()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let rules = load_rules_from_path(file.path()).unwrap();
        assert_eq!(rules, default_rules());
    }

    #[test]
    fn test_missing_file() {
        let err = load_rules_from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
