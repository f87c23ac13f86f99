//! Predictive prefetch: learns what a user searches for and warms the
//! caches with the searches they are likely to run next.
//!
//! Every successful search is recorded into a [`UserPattern`] that is
//! persisted in the [`NamespacedStore`]. After a short delay a prefetch pass
//! issues up to `max_candidates` speculative searches through a
//! [`Prefetcher`]; results are discarded, only the caches keep them. The
//! number of prefetches in flight is capped process-wide.

mod distance;
mod pattern;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use liftlog_cache::NamespacedStore;
use liftlog_core::PredictiveConfig;
use tracing::{debug, warn};

use crate::engine::{canonical_key, Filters};
use crate::error::SearchError;

pub use distance::levenshtein;
pub use pattern::{PatternLimits, UserPattern};

const STORE_NAMESPACE: &str = "predictive";
const PATTERN_KEY: &str = "user-pattern";

const SIMILAR_TERM_CANDIDATES: usize = 3;
const FILTER_CANDIDATES: usize = 3;
const RECENT_CANDIDATES: usize = 2;

/// Issues one speculative search. Implemented by
/// [`ConcurrentSearch`](crate::ConcurrentSearch).
#[async_trait::async_trait]
pub trait Prefetcher: Send + Sync {
    async fn prefetch(&self, query: &str, filters: &Filters) -> Result<(), SearchError>;
}

/// A search worth running ahead of time.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchCandidate {
    pub query: String,
    pub filters: Filters,
}

impl PrefetchCandidate {
    fn key(&self) -> String {
        canonical_key(&self.query, &self.filters)
    }
}

/// Plan the prefetch pass for a search of `query` with `filters`.
///
/// Candidates, in order: known terms within the edit-distance cutoff
/// (closest first), the same query under earlier filter sets (newest first),
/// and recent distinct queries under the current filters. The current search
/// itself is never a candidate.
pub fn generate_candidates(
    pattern: &UserPattern,
    query: &str,
    filters: &Filters,
    config: &PredictiveConfig,
) -> Vec<PrefetchCandidate> {
    let normalized = query.trim().to_lowercase();
    let mut seen: HashSet<String> = HashSet::from([canonical_key(query, filters)]);
    let mut candidates = Vec::new();
    let mut push = |candidate: PrefetchCandidate, candidates: &mut Vec<PrefetchCandidate>| {
        if seen.insert(candidate.key()) {
            candidates.push(candidate);
        }
    };

    if !normalized.is_empty() {
        let mut similar: Vec<(usize, &String)> = pattern
            .search_terms
            .iter()
            .rev()
            .filter(|term| **term != normalized)
            .map(|term| (levenshtein(term, &normalized), term))
            .filter(|(distance, _)| *distance <= config.max_edit_distance)
            .collect();
        similar.sort_by_key(|(distance, _)| *distance);
        for (_, term) in similar.into_iter().take(SIMILAR_TERM_CANDIDATES) {
            push(
                PrefetchCandidate {
                    query: term.clone(),
                    filters: filters.clone(),
                },
                &mut candidates,
            );
        }
    }

    for combination in pattern
        .filter_combinations
        .iter()
        .rev()
        .filter(|combination| *combination != filters)
        .take(FILTER_CANDIDATES)
    {
        push(
            PrefetchCandidate {
                query: query.trim().to_string(),
                filters: combination.clone(),
            },
            &mut candidates,
        );
    }

    let mut recent_seen = HashSet::new();
    let recent = pattern
        .recent_queries
        .iter()
        .filter(|recent| recent.trim().to_lowercase() != normalized)
        .filter(|recent| recent_seen.insert(recent.trim().to_lowercase()))
        .take(RECENT_CANDIDATES);
    for recent in recent {
        push(
            PrefetchCandidate {
                query: recent.clone(),
                filters: filters.clone(),
            },
            &mut candidates,
        );
    }

    candidates.truncate(config.max_candidates);
    candidates
}

struct PredictiveState {
    pattern: UserPattern,
    /// Canonical keys of prefetches currently running.
    in_flight: HashSet<String>,
    /// Bumped by `clear_cache`; passes planned under an older epoch are dropped.
    epoch: u64,
}

struct Inner {
    config: PredictiveConfig,
    store: NamespacedStore,
    prefetcher: Option<Arc<dyn Prefetcher>>,
    state: Mutex<PredictiveState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, PredictiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Records searches and prefetches likely follow-ups.
///
/// Cheap to clone. Without a prefetcher it still records patterns and
/// serves suggestions.
#[derive(Clone)]
pub struct PredictiveCache {
    inner: Arc<Inner>,
}

impl PredictiveCache {
    /// Create a cache, restoring any pattern persisted in `store`.
    pub fn new(
        config: PredictiveConfig,
        store: NamespacedStore,
        prefetcher: Option<Arc<dyn Prefetcher>>,
    ) -> Self {
        let pattern = match store.get::<UserPattern>(STORE_NAMESPACE, PATTERN_KEY) {
            Ok(Some(pattern)) => {
                debug!(terms = pattern.search_terms.len(), "restored search pattern");
                pattern
            }
            Ok(None) => UserPattern::default(),
            Err(e) => {
                warn!(error = %e, "discarding unreadable search pattern");
                UserPattern::default()
            }
        };

        Self {
            inner: Arc::new(Inner {
                config,
                store,
                prefetcher,
                state: Mutex::new(PredictiveState {
                    pattern,
                    in_flight: HashSet::new(),
                    epoch: 0,
                }),
            }),
        }
    }

    /// Record a completed search and schedule its prefetch pass.
    ///
    /// Must be called within a tokio runtime when a prefetcher is attached.
    pub fn record_user_search(&self, query: &str, filters: &Filters) {
        let limits = PatternLimits::from(&self.inner.config);
        let (pattern, candidates, epoch) = {
            let mut state = self.inner.lock();
            state.pattern.record(query, filters, limits);
            let candidates =
                generate_candidates(&state.pattern, query, filters, &self.inner.config);
            (state.pattern.clone(), candidates, state.epoch)
        };

        if let Err(e) = self.inner.store.set(STORE_NAMESPACE, PATTERN_KEY, &pattern, None) {
            warn!(error = %e, "failed to persist search pattern");
        }

        let Some(prefetcher) = self.inner.prefetcher.clone() else {
            return;
        };
        if candidates.is_empty() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let delay = self.inner.config.prefetch_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            run_prefetch_pass(&inner, prefetcher, candidates, epoch);
        });
    }

    /// Known terms and recent queries that fit `query`: prefix matches
    /// first, then the rest by edit distance.
    pub fn suggested_queries(&self, query: &str, limit: usize) -> Vec<String> {
        let normalized = query.trim().to_lowercase();
        let state = self.inner.lock();

        let mut pool: Vec<String> = Vec::new();
        let recent = state.pattern.recent_queries.iter().map(|q| q.trim().to_lowercase());
        let known = state.pattern.search_terms.iter().rev().cloned();
        for candidate in recent.chain(known) {
            if candidate != normalized && !pool.contains(&candidate) {
                pool.push(candidate);
            }
        }

        if normalized.is_empty() {
            pool.truncate(limit);
            return pool;
        }

        let mut ranked: Vec<(bool, usize, usize, String)> = pool
            .into_iter()
            .enumerate()
            .filter_map(|(order, candidate)| {
                let prefix = candidate.starts_with(&normalized);
                let distance = levenshtein(&candidate, &normalized);
                (prefix || distance <= self.inner.config.max_edit_distance)
                    .then_some((!prefix, distance, order, candidate))
            })
            .collect();
        ranked.sort();
        ranked.into_iter().take(limit).map(|(.., candidate)| candidate).collect()
    }

    /// Forget the learned pattern and drop queued prefetch passes.
    ///
    /// Prefetches already running keep their slot in the in-flight budget
    /// until they finish.
    pub fn clear_cache(&self) {
        {
            let mut state = self.inner.lock();
            state.pattern = UserPattern::default();
            state.epoch += 1;
        }
        self.inner.store.remove(STORE_NAMESPACE, PATTERN_KEY);
        debug!("predictive cache cleared");
    }

    pub fn pattern(&self) -> UserPattern {
        self.inner.lock().pattern.clone()
    }

    /// Prefetches currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }
}

impl std::fmt::Debug for PredictiveCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("PredictiveCache")
            .field("terms", &state.pattern.search_terms.len())
            .field("in_flight", &state.in_flight.len())
            .field("prefetcher", &self.inner.prefetcher.is_some())
            .finish()
    }
}

fn run_prefetch_pass(
    inner: &Arc<Inner>,
    prefetcher: Arc<dyn Prefetcher>,
    candidates: Vec<PrefetchCandidate>,
    epoch: u64,
) {
    let mut state = inner.lock();
    if state.epoch != epoch {
        debug!("prefetch pass dropped after clear");
        return;
    }

    for candidate in candidates {
        if state.in_flight.len() >= inner.config.max_in_flight {
            debug!(in_flight = state.in_flight.len(), "prefetch budget exhausted");
            break;
        }
        let key = candidate.key();
        if !state.in_flight.insert(key.clone()) {
            continue;
        }

        let inner = Arc::clone(inner);
        let prefetcher = Arc::clone(&prefetcher);
        tokio::spawn(async move {
            match prefetcher.prefetch(&candidate.query, &candidate.filters).await {
                Ok(()) => debug!(key = %key, "prefetched"),
                Err(e) if e.is_abort() => debug!(key = %key, "prefetch cancelled"),
                Err(e) => debug!(key = %key, error = %e, "prefetch failed"),
            }
            inner.lock().in_flight.remove(&key);
        });
    }
}
