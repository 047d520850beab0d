//! Response cache with single-flight deduplication
//!
//! [`ResponseCache::get_or_fetch`] serves a live entry when one exists,
//! otherwise joins an in-flight fetch for the same [`RequestKey`], otherwise
//! runs the fetch itself and shares the outcome with everyone who joined.
//! Only successes are stored.

mod flight;
mod store;

pub use store::CacheEntry;

use crate::config::CacheConfig;
use crate::error::ApiError;
use crate::key::RequestKey;
use flight::{FlightRegistry, LeaderGuard, Lookup};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use store::Store;
use tokio::sync::broadcast::error::RecvError;

/// Per-call cache control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Read and populate the cache (default: true)
    pub use_cache: bool,
    /// Skip the read but store the fresh result (default: false)
    pub force_refresh: bool,
    /// TTL for the stored entry instead of the configured default
    pub ttl: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            force_refresh: false,
            ttl: None,
        }
    }
}

impl FetchOptions {
    /// Neither read nor write the cache. Concurrent identical calls still
    /// share one fetch.
    #[must_use]
    pub fn no_cache() -> Self {
        Self {
            use_cache: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn reads(self) -> bool {
        self.use_cache && !self.force_refresh
    }

    fn writes(self) -> bool {
        self.use_cache
    }
}

/// Counters since the cache was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Calls answered from the store
    pub hits: u64,
    /// Calls that started a fetch
    pub misses: u64,
    /// Calls that waited on another caller's fetch
    pub joins: u64,
    /// Fetch closures actually invoked
    pub fetches: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    fetches: AtomicU64,
}

/// Shared cache and in-flight registry; one per client.
pub struct ResponseCache {
    store: Store,
    flights: FlightRegistry,
    default_ttl: Duration,
    counters: Counters,
}

impl ResponseCache {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            store: Store::new(config.max_entries.max(1)),
            flights: FlightRegistry::default(),
            default_ttl: config.ttl,
            counters: Counters::default(),
        }
    }

    /// Return the cached value for `key` or run `fetch` at most once across
    /// all concurrent callers of the same key.
    ///
    /// # Errors
    /// Returns whatever `fetch` returned; joiners receive a clone of the
    /// leader's error.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &RequestKey,
        options: &FetchOptions,
        fetch: F,
    ) -> Result<Arc<Value>, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ApiError>>,
    {
        let reads = options.reads();

        loop {
            let lookup = self
                .flights
                .lookup(key, || if reads { self.store.get(key) } else { None });

            match lookup {
                Lookup::Hit(value) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "cache hit");
                    return Ok(value);
                }
                Lookup::Join(mut rx) => {
                    self.counters.joins.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "joining in-flight fetch");
                    match rx.recv().await {
                        Ok(outcome) => return outcome,
                        Err(RecvError::Closed | RecvError::Lagged(_)) => {
                            tracing::debug!(key = %key, "in-flight fetch abandoned; retrying lookup");
                        }
                    }
                }
                Lookup::Lead => break,
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %key, force_refresh = options.force_refresh, "cache miss; fetching");

        let guard = LeaderGuard::new(&self.flights, key);
        let outcome = fetch().await.map(Arc::new);
        guard.disarm();

        let ttl = options.ttl.unwrap_or(self.default_ttl);
        self.flights.complete(key, &outcome, |value| {
            if options.writes() {
                self.store.insert(key.clone(), Arc::clone(value), ttl);
                tracing::debug!(key = %key, ttl_ms = ttl.as_millis(), "stored response");
            }
        });

        if let Err(err) = &outcome {
            tracing::warn!(key = %key, error = %err, "fetch failed");
        }
        outcome
    }

    /// Live cached value without fetching
    #[must_use]
    pub fn get(&self, key: &RequestKey) -> Option<Arc<Value>> {
        self.store.get(key)
    }

    #[must_use]
    pub fn entry(&self, key: &RequestKey) -> Option<CacheEntry> {
        self.store.entry(key)
    }

    pub fn invalidate(&self, key: &RequestKey) {
        self.store.invalidate(key);
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    /// Number of stored entries, after pending evictions are applied
    #[must_use]
    pub fn len(&self) -> u64 {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetches currently in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            joins: self.counters.joins.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("default_ttl", &self.default_ttl)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
