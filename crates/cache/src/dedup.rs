//! Collapses concurrent identical requests into one execution and caches
//! successful results for a TTL.
//!
//! ## Lookup order
//!
//! 1. A live cache entry for the key is returned directly.
//! 2. Otherwise a request already in flight for the key is joined.
//! 3. Otherwise the request is started, registered in flight, and driven to
//!    settlement on the runtime whether or not any caller keeps awaiting it.
//!
//! `force` skips steps 1 and 2 and replaces the in-flight entry. Each started
//! request carries a generation number; only the generation currently
//! registered for its key may clear the in-flight slot or write the cache.
//!
//! ## Eviction
//!
//! The cache keeps insertion order in an `IndexMap`. At capacity the oldest
//! inserted key is evicted first, regardless of how recently it was read.
//! Stale entries go lazily on lookup, or in bulk via [`RequestDeduplicator::purge_expired`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use indexmap::IndexMap;
use liftlog_core::CacheConfig;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

type SharedRequest<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct CacheEntry<T> {
    data: T,
    timestamp: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_valid(&self, now: Instant) -> bool {
        now <= self.timestamp + self.ttl
    }
}

struct InFlightRequest<T, E> {
    future: SharedRequest<T, E>,
    timestamp: Instant,
    generation: u64,
}

/// Per-call options for [`RequestDeduplicator::deduplicate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupOptions {
    /// Cache lifetime of a successful result. `None` uses the default TTL.
    pub ttl: Option<Duration>,
    /// Bypass the cache and any in-flight request.
    pub force: bool,
}

impl DedupOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Counters reported by [`RequestDeduplicator::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined a request another caller started.
    pub shared_joins: u64,
}

struct DedupState<T, E> {
    cache: IndexMap<String, CacheEntry<T>>,
    in_flight: HashMap<String, InFlightRequest<T, E>>,
    next_generation: u64,
    hits: u64,
    misses: u64,
    shared_joins: u64,
}

impl<T: Clone, E> DedupState<T, E> {
    /// Return a live entry, dropping it if it has expired.
    fn lookup(&mut self, key: &str, now: Instant) -> Option<T> {
        match self.cache.get(key) {
            Some(entry) if entry.is_valid(now) => Some(entry.data.clone()),
            Some(_) => {
                self.cache.shift_remove(key);
                trace!(key, "expired cache entry dropped");
                None
            }
            None => None,
        }
    }

    /// Insert or overwrite. Overwriting keeps the key's position; a new key
    /// at capacity evicts the oldest inserted one.
    fn store(&mut self, key: &str, data: T, ttl: Duration, max_entries: usize) {
        let entry = CacheEntry {
            data,
            timestamp: Instant::now(),
            ttl,
        };
        if let Some(existing) = self.cache.get_mut(key) {
            *existing = entry;
            return;
        }
        while self.cache.len() >= max_entries.max(1) {
            match self.cache.shift_remove_index(0) {
                Some((evicted, _)) => debug!(key = %evicted, "evicting oldest cache entry"),
                None => break,
            }
        }
        self.cache.insert(key.to_string(), entry);
    }

    fn purge(&mut self, now: Instant) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.is_valid(now));
        before - self.cache.len()
    }
}

struct Inner<T, E> {
    state: Mutex<DedupState<T, E>>,
    default_ttl: Duration,
    max_entries: usize,
}

impl<T: Clone, E> Inner<T, E> {
    fn lock(&self) -> MutexGuard<'_, DedupState<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, key: &str, generation: u64, ttl: Duration, result: &Result<T, E>) {
        let mut state = self.lock();
        let current = state
            .in_flight
            .get(key)
            .is_some_and(|pending| pending.generation == generation);
        if !current {
            debug!(key, generation, "superseded request settled, result dropped");
            return;
        }

        if let Some(pending) = state.in_flight.remove(key) {
            trace!(key, elapsed = ?pending.timestamp.elapsed(), "request settled");
        }
        match result {
            Ok(data) => state.store(key, data.clone(), ttl, self.max_entries),
            Err(_) => debug!(key, "request failed, not cached"),
        }
    }
}

/// Deduplicating TTL cache in front of an async request function.
///
/// Cheap to clone; clones share one cache. Errors are shared with every
/// caller of the same request, so `E` must be `Clone`.
pub struct RequestDeduplicator<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for RequestDeduplicator<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_settings(config.default_ttl(), config.max_entries)
    }

    pub fn with_settings(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DedupState {
                    cache: IndexMap::new(),
                    in_flight: HashMap::new(),
                    next_generation: 0,
                    hits: 0,
                    misses: 0,
                    shared_joins: 0,
                }),
                default_ttl,
                max_entries,
            }),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Resolve `key` from the cache, an in-flight request, or a fresh call
    /// to `request_fn`.
    ///
    /// `request_fn` is invoked synchronously while the cache is locked and
    /// must not call back into this deduplicator before returning its future.
    pub async fn deduplicate<F, Fut>(
        &self,
        key: &str,
        request_fn: F,
        options: DedupOptions,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let ttl = options.ttl.unwrap_or(self.inner.default_ttl);

        let request = {
            let mut state = self.inner.lock();

            let joined = if options.force {
                None
            } else {
                if let Some(data) = state.lookup(key, Instant::now()) {
                    state.hits += 1;
                    trace!(key, "cache hit");
                    return Ok(data);
                }
                state.in_flight.get(key).map(|pending| pending.future.clone())
            };

            match joined {
                Some(future) => {
                    state.shared_joins += 1;
                    trace!(key, "joining in-flight request");
                    future
                }
                None => {
                    state.misses += 1;
                    state.next_generation += 1;
                    let generation = state.next_generation;

                    let owner = Arc::downgrade(&self.inner);
                    let settle_key = key.to_string();
                    let pending = request_fn();
                    let future = async move {
                        let result = pending.await;
                        if let Some(inner) = owner.upgrade() {
                            inner.settle(&settle_key, generation, ttl, &result);
                        }
                        result
                    }
                    .boxed()
                    .shared();

                    if options.force {
                        debug!(key, generation, "forced request replaces any in-flight one");
                    }
                    state.in_flight.insert(
                        key.to_string(),
                        InFlightRequest {
                            future: future.clone(),
                            timestamp: Instant::now(),
                            generation,
                        },
                    );
                    // Settles even if every caller stops awaiting.
                    tokio::spawn(future.clone());
                    future
                }
            }
        };

        request.await
    }

    /// Live cached value for `key`, without touching hit/miss counters.
    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.lock().lookup(key, Instant::now())
    }

    /// Drop the cached value for `key`. In-flight requests are untouched.
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.lock().cache.shift_remove(key).is_some()
    }

    /// Drop every cached value whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut state = self.inner.lock();
        let before = state.cache.len();
        state.cache.retain(|key, _| !key.starts_with(prefix));
        let removed = before - state.cache.len();
        if removed > 0 {
            debug!(prefix, removed, "invalidated cache entries by prefix");
        }
        removed
    }

    /// Empty the cache and forget in-flight requests. Requests already
    /// running finish, but their results are not cached.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        let entries = state.cache.len();
        let in_flight = state.in_flight.len();
        state.cache.clear();
        state.in_flight.clear();
        debug!(entries, in_flight, "dedup cache cleared");
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.lock().purge(Instant::now())
    }

    /// Purge expired entries every `interval` until the last handle to this
    /// deduplicator is dropped.
    pub fn spawn_janitor(&self, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let purged = inner.lock().purge(Instant::now());
                if purged > 0 {
                    debug!(purged, "janitor purged expired entries");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> DedupStats {
        let state = self.inner.lock();
        DedupStats {
            entries: state.cache.len(),
            in_flight: state.in_flight.len(),
            hits: state.hits,
            misses: state.misses,
            shared_joins: state.shared_joins,
        }
    }
}

impl<T, E> Default for RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl<T, E> std::fmt::Debug for RequestDeduplicator<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("RequestDeduplicator")
            .field("entries", &state.cache.len())
            .field("in_flight", &state.in_flight.len())
            .field("default_ttl", &self.inner.default_ttl)
            .field("max_entries", &self.inner.max_entries)
            .finish()
    }
}
