//! Fixed-window rate limiting.
//!
//! The current window is `floor(now / window)`. Counters are keyed by
//! `{rule_id}:{window_index}`, extended with `:user:<id>` and/or `:org:<id>`
//! when the rule partitions by identity. A counter is created lazily on the
//! first request of its window and removed by the sweeper once the window
//! has elapsed.
//!
//! # Known limitation
//!
//! Fixed windows admit up to `2 × limit` requests across a window boundary
//! (a full window's worth at the end of one window and again at the start of
//! the next). A sliding window or token bucket would bound this, and could
//! be swapped in behind the same [`RateLimitCheck`] contract.

use crate::application::ports::{Clock, Storage};
use crate::domain::decision::RateLimitInfo;
use crate::domain::request::Identity;
use crate::domain::rule::Rule;
use crate::domain::time::{from_unix_millis, secs_until_ceil, unix_millis};
use crate::infrastructure::storage::ShardedStorage;
use std::sync::Arc;

/// Count of admitted requests in one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitCounter {
    pub count: u32,
    /// End of the window in Unix milliseconds
    pub reset_at_ms: u64,
}

impl RateLimitCounter {
    fn new(reset_at_ms: u64) -> Self {
        Self {
            count: 0,
            reset_at_ms,
        }
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_at_ms
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitCheck {
    pub allowed: bool,
    pub info: RateLimitInfo,
    /// Counter the request was charged to
    pub key: String,
}

/// Window boundaries for a rule at a point in time.
#[derive(Debug, Clone, Copy)]
struct Window {
    index: u64,
    reset_at_ms: u64,
}

impl Window {
    fn at(now_ms: u64, window_secs: u64) -> Self {
        let length_ms = window_secs.max(1).saturating_mul(1000);
        let index = now_ms / length_ms;
        Self {
            index,
            reset_at_ms: index * length_ms + length_ms,
        }
    }
}

/// Build the counter key for a rule, identity and window.
pub fn counter_key(rule: &Rule, identity: Identity<'_>, window_index: u64) -> String {
    let mut key = format!("{}:{}", rule.id, window_index);
    if rule.rate_limit.per_user {
        if let Some(user) = identity.user_id {
            key.push_str(":user:");
            key.push_str(user);
        }
    }
    if rule.rate_limit.per_organization {
        if let Some(org) = identity.organization_id {
            key.push_str(":org:");
            key.push_str(org);
        }
    }
    key
}

/// Per-key fixed-window counting.
#[derive(Debug, Clone)]
pub struct RateLimiter<S = Arc<ShardedStorage<String, RateLimitCounter>>>
where
    S: Storage<String, RateLimitCounter> + Clone,
{
    storage: S,
    clock: Arc<dyn Clock>,
}

impl<S> RateLimiter<S>
where
    S: Storage<String, RateLimitCounter> + Clone,
{
    /// Create a new rate limiter over `storage`.
    pub fn new(storage: S, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Charge one request against the rule's current window.
    ///
    /// Denies without charging when the window is already full.
    pub fn check(&self, rule: &Rule, identity: Identity<'_>) -> RateLimitCheck {
        let now_ms = unix_millis(self.clock.now());
        let limit = rule.rate_limit.requests;
        let window = Window::at(now_ms, rule.rate_limit.window_secs);
        let key = counter_key(rule, identity, window.index);

        let (allowed, count) = self.storage.with_entry_mut(
            key.clone(),
            || RateLimitCounter::new(window.reset_at_ms),
            |counter| {
                if counter.count >= limit {
                    (false, counter.count)
                } else {
                    counter.count += 1;
                    (true, counter.count)
                }
            },
        );

        let info = RateLimitInfo {
            limit,
            remaining: limit.saturating_sub(count),
            reset_at: from_unix_millis(window.reset_at_ms),
            retry_after_secs: (!allowed).then(|| secs_until_ceil(now_ms, window.reset_at_ms)),
        };

        RateLimitCheck { allowed, info, key }
    }

    /// Report the rule's current window without charging it.
    pub fn peek(&self, rule: &Rule, identity: Identity<'_>) -> RateLimitInfo {
        let now_ms = unix_millis(self.clock.now());
        let limit = rule.rate_limit.requests;
        let window = Window::at(now_ms, rule.rate_limit.window_secs);
        let key = counter_key(rule, identity, window.index);
        let count = self.storage.read(&key, |c| c.count).unwrap_or(0);

        RateLimitInfo {
            limit,
            remaining: limit.saturating_sub(count),
            reset_at: from_unix_millis(window.reset_at_ms),
            retry_after_secs: None,
        }
    }

    /// Give back one unit charged to `key`.
    ///
    /// Returns false if the counter no longer exists (window swept).
    pub fn refund(&self, key: &str) -> bool {
        self.storage
            .with_existing_mut(&key.to_string(), |counter| {
                counter.count = counter.count.saturating_sub(1);
            })
            .is_some()
    }

    /// Remove counters whose window has elapsed.
    pub fn sweep(&self) -> usize {
        let now_ms = unix_millis(self.clock.now());
        self.storage.retain(|_, counter| !counter.is_expired(now_ms))
    }

    /// Number of live counters.
    pub fn counter_count(&self) -> usize {
        self.storage.len()
    }

    /// Drop every counter.
    pub fn clear(&self) {
        self.storage.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::{Method, RateLimitConfig};
    use crate::infrastructure::mocks::MockClock;
    use std::time::Duration;

    fn limiter(clock: &MockClock) -> RateLimiter {
        RateLimiter::new(Arc::new(ShardedStorage::new()), Arc::new(clock.clone()))
    }

    fn rule(requests: u32, window_secs: u64) -> Rule {
        Rule::new("r", Method::Get, "/r", "svc")
            .unwrap()
            .with_rate_limit(RateLimitConfig {
                requests,
                window_secs,
                ..RateLimitConfig::default()
            })
    }

    #[test]
    fn test_admits_up_to_limit() {
        let clock = MockClock::at_unix_secs(6_000);
        let limiter = limiter(&clock);
        let rule = rule(3, 60);

        for expected_remaining in [2, 1, 0] {
            let check = limiter.check(&rule, Identity::anonymous());
            assert!(check.allowed);
            assert_eq!(check.info.remaining, expected_remaining);
            assert_eq!(check.info.retry_after_secs, None);
        }

        let denied = limiter.check(&rule, Identity::anonymous());
        assert!(!denied.allowed);
        assert_eq!(denied.info.remaining, 0);
        assert_eq!(denied.info.retry_after_secs, Some(60));
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let clock = MockClock::at_unix_secs(6_000);
        clock.advance(Duration::from_millis(30_500));
        let limiter = limiter(&clock);
        let rule = rule(1, 60);

        assert!(limiter.check(&rule, Identity::anonymous()).allowed);
        let denied = limiter.check(&rule, Identity::anonymous());
        // 29.5s left in the window
        assert_eq!(denied.info.retry_after_secs, Some(30));
    }

    #[test]
    fn test_new_window_resets() {
        let clock = MockClock::at_unix_secs(6_000);
        let limiter = limiter(&clock);
        let rule = rule(1, 60);

        assert!(limiter.check(&rule, Identity::anonymous()).allowed);
        assert!(!limiter.check(&rule, Identity::anonymous()).allowed);

        clock.advance(Duration::from_secs(60));
        assert!(limiter.check(&rule, Identity::anonymous()).allowed);
    }

    #[test]
    fn test_windows_are_epoch_aligned() {
        let clock = MockClock::at_unix_secs(6_059);
        let limiter = limiter(&clock);
        let rule = rule(1, 60);

        let check = limiter.check(&rule, Identity::anonymous());
        assert_eq!(unix_millis(check.info.reset_at), 6_060_000);
        assert_eq!(check.key, "r:100");

        // One second later is a fresh window
        clock.advance(Duration::from_secs(1));
        assert!(limiter.check(&rule, Identity::anonymous()).allowed);
    }

    #[test]
    fn test_partitioning_keys() {
        let mut r = rule(1, 60);
        let alice = Identity::new(Some("alice"), Some("acme"));

        assert_eq!(counter_key(&r, alice, 7), "r:7");

        r.rate_limit.per_user = true;
        assert_eq!(counter_key(&r, alice, 7), "r:7:user:alice");

        r.rate_limit.per_organization = true;
        assert_eq!(counter_key(&r, alice, 7), "r:7:user:alice:org:acme");

        // Missing ids leave the key unpartitioned on that dimension
        assert_eq!(counter_key(&r, Identity::new(None, Some("acme")), 7), "r:7:org:acme");
    }

    #[test]
    fn test_per_user_limits_are_independent() {
        let clock = MockClock::at_unix_secs(6_000);
        let limiter = limiter(&clock);
        let mut rule = rule(1, 60);
        rule.rate_limit.per_user = true;

        let alice = Identity::new(Some("alice"), None);
        let bob = Identity::new(Some("bob"), None);

        assert!(limiter.check(&rule, alice).allowed);
        assert!(limiter.check(&rule, bob).allowed);
        assert!(!limiter.check(&rule, alice).allowed);
        assert!(!limiter.check(&rule, bob).allowed);
    }

    #[test]
    fn test_peek_does_not_charge() {
        let clock = MockClock::at_unix_secs(6_000);
        let limiter = limiter(&clock);
        let rule = rule(2, 60);

        assert_eq!(limiter.peek(&rule, Identity::anonymous()).remaining, 2);
        assert_eq!(limiter.counter_count(), 0);

        limiter.check(&rule, Identity::anonymous());
        assert_eq!(limiter.peek(&rule, Identity::anonymous()).remaining, 1);
        assert_eq!(limiter.peek(&rule, Identity::anonymous()).remaining, 1);
    }

    #[test]
    fn test_refund() {
        let clock = MockClock::at_unix_secs(6_000);
        let limiter = limiter(&clock);
        let rule = rule(1, 60);

        let check = limiter.check(&rule, Identity::anonymous());
        assert!(!limiter.check(&rule, Identity::anonymous()).allowed);

        assert!(limiter.refund(&check.key));
        assert!(limiter.check(&rule, Identity::anonymous()).allowed);

        assert!(!limiter.refund("r:0"));
    }

    #[test]
    fn test_sweep_removes_elapsed_windows() {
        let clock = MockClock::at_unix_secs(6_000);
        let limiter = limiter(&clock);
        let short = rule(5, 10);
        let mut long = rule(5, 600);
        long.id = "long".into();

        limiter.check(&short, Identity::anonymous());
        limiter.check(&long, Identity::anonymous());
        assert_eq!(limiter.sweep(), 0);

        clock.advance(Duration::from_secs(10));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.counter_count(), 1);
    }

    #[test]
    fn test_concurrent_checks_never_exceed_limit() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::thread;

        let clock = MockClock::at_unix_secs(6_000);
        let limiter = Arc::new(limiter(&clock));
        let rule = Arc::new(rule(50, 60));
        let admitted = Arc::new(AtomicU32::new(0));
        let mut handles = vec![];

        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let rule = Arc::clone(&rule);
            let admitted = Arc::clone(&admitted);
            handles.push(thread::spawn(move || {
                for _ in 0..20 {
                    if limiter.check(&rule, Identity::anonymous()).allowed {
                        admitted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::Relaxed), 50);
    }
}
