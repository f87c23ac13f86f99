#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use liftlog_scheduler::ConcurrencyManager;
use liftlog_search::{
    canonical_key, ConcurrentSearch, Filters, SearchCache, SearchEngine, SearchError,
    SearchResponse,
};

/// Engine over plain strings that records every call.
#[derive(Default)]
pub struct MockEngine {
    items: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    failing: Mutex<Option<String>>,
    index_calls: AtomicUsize,
    cache_clears: AtomicUsize,
}

impl MockEngine {
    pub fn with_items(items: &[&str]) -> Arc<Self> {
        let engine = Self::default();
        *engine.items.lock().unwrap() = items.iter().map(|s| s.to_string()).collect();
        Arc::new(engine)
    }

    /// Make searches for `query` take `delay`.
    pub fn delay(&self, query: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(query.to_lowercase(), delay);
    }

    /// Make searches for `query` fail.
    pub fn fail_on(&self, query: &str) {
        *self.failing.lock().unwrap() = Some(query.to_lowercase());
    }

    /// Canonical keys of every search, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn index_calls(&self) -> usize {
        self.index_calls.load(Ordering::SeqCst)
    }

    pub fn cache_clears(&self) -> usize {
        self.cache_clears.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SearchEngine<String> for MockEngine {
    async fn search(
        &self,
        query: &str,
        filters: &Filters,
    ) -> Result<SearchResponse<String>, SearchError> {
        let needle = query.trim().to_lowercase();
        self.calls.lock().unwrap().push(canonical_key(query, filters));

        let delay = self.delays.lock().unwrap().get(&needle).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self.failing.lock().unwrap().clone();
        if failing.as_deref() == Some(needle.as_str()) {
            return Err(SearchError::Engine("backend down".into()));
        }

        let items = self.items.lock().unwrap().clone();
        Ok(SearchResponse::new(
            items.into_iter().filter(|item| item.to_lowercase().contains(&needle)).collect(),
        ))
    }

    async fn index_items(&self, items: Vec<String>) -> Result<(), SearchError> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        *self.items.lock().unwrap() = items;
        Ok(())
    }

    fn clear_cache(&self) {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn search_over(engine: &Arc<MockEngine>, limit: usize) -> ConcurrentSearch<String> {
    let engine: Arc<dyn SearchEngine<String>> = engine.clone();
    ConcurrentSearch::new(
        engine,
        ConcurrencyManager::with_limit(limit),
        SearchCache::with_settings(Duration::from_secs(60), 100),
    )
}

pub fn exercises() -> Vec<&'static str> {
    vec![
        "Back Squat",
        "Front Squat",
        "Goblet Squat",
        "Bench Press",
        "Incline Bench Press",
        "Deadlift",
        "Romanian Deadlift",
        "Pull Up",
    ]
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
