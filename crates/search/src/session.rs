//! Reactive search state for one UI surface.
//!
//! A [`SearchSession`] owns the query and filters, debounces searches as
//! they change, and publishes [`SearchState`] snapshots on a watch channel.
//! Responses that arrive after a newer search started are dropped. Every
//! task the session submits carries its own tag, so clearing or dropping
//! the session cancels all of them at once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use liftlog_core::SearchConfig;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::concurrent::{ConcurrentSearch, SearchOptions};
use crate::engine::Filters;
use crate::error::SearchError;
use crate::predictive::PredictiveCache;

/// Snapshot published after every state change.
#[derive(Debug, Clone, Serialize)]
pub struct SearchState<T> {
    pub query: String,
    pub filters: Filters,
    pub results: Vec<T>,
    pub is_searching: bool,
    pub is_indexed: bool,
    pub error: Option<SearchError>,
    pub from_cache: bool,
    pub from_worker: bool,
}

impl<T> SearchState<T> {
    fn initial(is_indexed: bool) -> Self {
        Self {
            query: String::new(),
            filters: Filters::new(),
            results: Vec::new(),
            is_searching: false,
            is_indexed,
            error: None,
            from_cache: false,
            from_worker: false,
        }
    }
}

#[derive(Default)]
struct Control {
    debounce: Option<JoinHandle<()>>,
    in_flight: Option<CancellationToken>,
    /// Advanced by every search start and every clear; a response is only
    /// applied if the sequence has not moved since its search started.
    sequence: u64,
    indexing_started: bool,
    indexed: bool,
    closed: bool,
}

struct SessionCore<T: Send + Sync + 'static> {
    search: ConcurrentSearch<T>,
    predictive: Option<PredictiveCache>,
    debounce: Duration,
    indexing_enabled: bool,
    tag: String,
    state: watch::Sender<SearchState<T>>,
    control: Mutex<Control>,
}

impl<T: Clone + Send + Sync + 'static> SessionCore<T> {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restart the debounce timer. No-op until the engine is indexed.
    fn schedule_search(self: &Arc<Self>) {
        let mut control = self.lock();
        if let Some(timer) = control.debounce.take() {
            timer.abort();
        }
        if !control.indexed || control.closed {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let delay = self.debounce;
        control.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(core) = weak.upgrade() {
                // Detached so a later timer reset cannot abort a running search.
                tokio::spawn(async move { core.run_search().await });
            }
        }));
    }

    async fn run_search(&self) {
        let (query, filters) = {
            let state = self.state.borrow();
            (state.query.clone(), state.filters.clone())
        };

        let (sequence, token) = {
            let mut control = self.lock();
            if control.closed {
                return;
            }
            if let Some(previous) = control.in_flight.take() {
                previous.cancel();
            }
            control.sequence += 1;
            let token = CancellationToken::new();
            control.in_flight = Some(token.clone());
            (control.sequence, token)
        };

        if query.trim().is_empty() && filters.is_empty() {
            self.state.send_modify(|s| {
                s.results.clear();
                s.is_searching = false;
                s.error = None;
                s.from_cache = false;
                s.from_worker = false;
            });
            return;
        }

        self.state.send_modify(|s| {
            s.is_searching = true;
            s.error = None;
        });

        let options = SearchOptions::default()
            .with_tag(self.tag.clone())
            .with_signal(token);
        let result = self.search.search(&query, &filters, options).await;

        {
            let mut control = self.lock();
            if control.sequence != sequence {
                debug!(query = %query, "stale search response dropped");
                return;
            }
            control.in_flight = None;
        }

        match result {
            Ok(response) => {
                debug!(
                    query = %query,
                    hits = response.results.len(),
                    from_cache = response.from_cache,
                    "search finished"
                );
                self.state.send_modify(|s| {
                    s.results = response.results;
                    s.from_cache = response.from_cache;
                    s.from_worker = response.from_worker;
                    s.is_searching = false;
                });
                if let Some(predictive) = &self.predictive {
                    predictive.record_user_search(&query, &filters);
                }
            }
            Err(e) if e.is_abort() => {
                self.state.send_modify(|s| s.is_searching = false);
            }
            Err(e) => {
                warn!(query = %query, error = %e, "search failed");
                self.state.send_modify(|s| {
                    s.is_searching = false;
                    s.error = Some(e);
                });
            }
        }
    }

    /// Stop the debounce timer, abort the in-flight search, and cancel
    /// every task carrying the session tag.
    fn cancel_all(&self) -> usize {
        {
            let mut control = self.lock();
            if let Some(timer) = control.debounce.take() {
                timer.abort();
            }
            if let Some(token) = control.in_flight.take() {
                token.cancel();
            }
            control.sequence += 1;
        }
        self.search.scheduler().cancel_by_tag(&self.tag)
    }
}

/// Debounced, cancellable search over one [`ConcurrentSearch`].
///
/// Must be created inside a tokio runtime. Dropping the session cancels
/// its work and clears the search caches.
pub struct SearchSession<T: Clone + Send + Sync + 'static> {
    core: Arc<SessionCore<T>>,
}

impl<T: Clone + Send + Sync + 'static> SearchSession<T> {
    pub fn new(
        search: ConcurrentSearch<T>,
        config: &SearchConfig,
        predictive: Option<PredictiveCache>,
    ) -> Self {
        let indexed = !config.enable_indexing;
        let (state, _) = watch::channel(SearchState::initial(indexed));
        Self {
            core: Arc::new(SessionCore {
                search,
                predictive,
                debounce: config.debounce(),
                indexing_enabled: config.enable_indexing,
                tag: format!("session-{}", uuid::Uuid::new_v4()),
                state,
                control: Mutex::new(Control {
                    indexed,
                    ..Control::default()
                }),
            }),
        }
    }

    /// Tag carried by every task this session submits.
    pub fn tag(&self) -> &str {
        &self.core.tag
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState<T>> {
        self.core.state.subscribe()
    }

    pub fn state(&self) -> SearchState<T> {
        self.core.state.borrow().clone()
    }

    /// Provide the items to search. The first non-empty set is indexed in
    /// the background; later calls are ignored.
    pub fn set_items(&self, items: Vec<T>) {
        {
            let mut control = self.core.lock();
            if control.indexing_started || items.is_empty() || control.closed {
                return;
            }
            control.indexing_started = true;
        }
        if !self.core.indexing_enabled {
            return;
        }

        let search = self.core.search.clone();
        let tags = [self.core.tag.clone()];
        let weak = Arc::downgrade(&self.core);
        tokio::spawn(async move {
            let result = search.index_items_tagged(items, &tags).await;
            let Some(core) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(()) => {
                    core.lock().indexed = true;
                    core.state.send_modify(|s| s.is_indexed = true);
                    core.schedule_search();
                }
                Err(e) if e.is_abort() => {
                    debug!("indexing cancelled");
                    core.lock().indexing_started = false;
                }
                Err(e) => {
                    warn!(error = %e, "indexing failed");
                    core.lock().indexing_started = false;
                    core.state.send_modify(|s| s.error = Some(e));
                }
            }
        });
    }

    pub fn set_query(&self, query: impl Into<String>) {
        let query = query.into();
        self.core.state.send_modify(|s| s.query = query);
        self.core.schedule_search();
    }

    pub fn set_filters(&self, filters: Filters) {
        self.core.state.send_modify(|s| s.filters = filters);
        self.core.schedule_search();
    }

    pub fn set_filter(&self, field: impl Into<String>, value: serde_json::Value) {
        let field = field.into();
        self.core.state.send_modify(|s| {
            s.filters.insert(field, value);
        });
        self.core.schedule_search();
    }

    pub fn remove_filter(&self, field: &str) {
        self.core.state.send_modify(|s| {
            s.filters.remove(field);
        });
        self.core.schedule_search();
    }

    /// Run a search for the current query and filters right away, skipping
    /// the debounce. Resolves once the state reflects the outcome.
    pub async fn search_now(&self) {
        {
            let mut control = self.core.lock();
            if let Some(timer) = control.debounce.take() {
                timer.abort();
            }
            if !control.indexed {
                debug!("search requested before indexing finished");
                return;
            }
        }
        self.core.run_search().await;
    }

    /// Suggestions for the current query from the attached predictive cache.
    pub fn suggestions(&self, limit: usize) -> Vec<String> {
        let query = self.core.state.borrow().query.clone();
        self.core
            .predictive
            .as_ref()
            .map(|p| p.suggested_queries(&query, limit))
            .unwrap_or_default()
    }

    /// Cancel everything in flight, clear the search caches, and reset the
    /// query, filters, and results.
    pub fn clear_search(&self) {
        let cancelled = self.core.cancel_all();
        self.core.search.clear_cache();
        self.core.state.send_modify(|s| {
            s.query.clear();
            s.filters.clear();
            s.results.clear();
            s.is_searching = false;
            s.error = None;
            s.from_cache = false;
            s.from_worker = false;
        });
        debug!(tag = %self.core.tag, cancelled, "search cleared");
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for SearchSession<T> {
    fn drop(&mut self) {
        self.core.lock().closed = true;
        let cancelled = self.core.cancel_all();
        self.core.search.clear_cache();
        debug!(tag = %self.core.tag, cancelled, "search session closed");
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for SearchSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let control = self.core.lock();
        f.debug_struct("SearchSession")
            .field("tag", &self.core.tag)
            .field("indexed", &control.indexed)
            .field("sequence", &control.sequence)
            .finish()
    }
}
