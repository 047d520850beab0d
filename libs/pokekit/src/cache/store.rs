use crate::key::RequestKey;
use moka::Expiry;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One cached response. Never mutated; a refresh stores a new entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    value: Arc<Value>,
    expires_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    pub(crate) fn new(value: Arc<Value>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
            ttl,
        }
    }

    #[must_use]
    pub fn value(&self) -> &Arc<Value> {
        &self.value
    }

    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    #[must_use]
    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Per-entry TTL for moka
struct EntryExpiry;

impl Expiry<RequestKey, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &RequestKey,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &RequestKey,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded LRU store with per-entry expiry
pub struct Store {
    inner: Cache<RequestKey, CacheEntry>,
}

impl Store {
    pub(crate) fn new(max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryExpiry)
            .build();
        Self { inner }
    }

    /// Live entry for `key`. moka expiry is lazy, so `expires_at` is checked
    /// again here.
    pub(crate) fn get(&self, key: &RequestKey) -> Option<Arc<Value>> {
        self.inner
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value)
    }

    pub(crate) fn entry(&self, key: &RequestKey) -> Option<CacheEntry> {
        self.inner
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
    }

    pub(crate) fn insert(&self, key: RequestKey, value: Arc<Value>, ttl: Duration) {
        self.inner.insert(key, CacheEntry::new(value, ttl));
    }

    pub(crate) fn invalidate(&self, key: &RequestKey) {
        self.inner.invalidate(key);
    }

    pub(crate) fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }

    pub(crate) fn len(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}
