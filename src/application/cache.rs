//! TTL store for idempotent responses.
//!
//! Keys are built from the rule's base cache key plus the identity
//! dimensions and request headers the rule varies on:
//! `key[:user:<id>][:org:<id>][:<header>:<value>...]`.

use crate::application::ports::{Clock, Storage};
use crate::domain::request::RequestContext;
use crate::domain::rule::{CacheConfig, VaryDimension};
use crate::domain::time::unix_millis;
use crate::infrastructure::storage::ShardedStorage;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// A cached response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: Bytes,
    pub expires_at_ms: u64,
}

impl CacheEntry {
    fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// Build the cache key for a request under `config`.
pub fn cache_key(config: &CacheConfig, request: &RequestContext) -> String {
    let mut key = config.key.clone();
    if config.varies_on(VaryDimension::User) {
        if let Some(user) = request.user_id.as_deref() {
            key.push_str(":user:");
            key.push_str(user);
        }
    }
    if config.varies_on(VaryDimension::Organization) {
        if let Some(org) = request.organization_id.as_deref() {
            key.push_str(":org:");
            key.push_str(org);
        }
    }
    for name in &config.headers {
        if let Some(value) = request.header(name) {
            key.push(':');
            key.push_str(name);
            key.push(':');
            key.push_str(value);
        }
    }
    key
}

/// Response cache with per-entry expiry.
#[derive(Debug, Clone)]
pub struct ResponseCache<S = Arc<ShardedStorage<String, CacheEntry>>>
where
    S: Storage<String, CacheEntry> + Clone,
{
    storage: S,
    clock: Arc<dyn Clock>,
}

impl<S> ResponseCache<S>
where
    S: Storage<String, CacheEntry> + Clone,
{
    pub fn new(storage: S, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Look up a fresh entry. Expired entries read as a miss.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now_ms = unix_millis(self.clock.now());
        self.storage
            .read(&key.to_string(), |entry| {
                entry.is_fresh(now_ms).then(|| entry.payload.clone())
            })
            .flatten()
    }

    /// Store `payload` under `key` for `ttl`, replacing any previous entry.
    pub fn put(&self, key: impl Into<String>, payload: Bytes, ttl: Duration) {
        let now_ms = unix_millis(self.clock.now());
        let ttl_ms: u64 = ttl.as_millis().try_into().unwrap_or(u64::MAX);
        self.storage.insert(
            key.into(),
            CacheEntry {
                payload,
                expires_at_ms: now_ms.saturating_add(ttl_ms),
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.storage.remove(&key.to_string()).is_some()
    }

    /// Remove expired entries.
    pub fn sweep(&self) -> usize {
        let now_ms = unix_millis(self.clock.now());
        self.storage.retain(|_, entry| entry.is_fresh(now_ms))
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn clear(&self) {
        self.storage.clear();
    }
}
