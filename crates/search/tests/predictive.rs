mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use liftlog_cache::NamespacedStore;
use liftlog_core::PredictiveConfig;
use liftlog_scheduler::Priority;
use liftlog_search::{Filters, PredictiveCache, Prefetcher, SearchError, SearchOptions};
use serde_json::json;
use tokio::sync::Semaphore;

use common::{exercises, search_over, MockEngine};

/// Prefetcher that parks every call until the gate opens.
struct GatedPrefetcher {
    gate: Semaphore,
    active: AtomicUsize,
    max_active: AtomicUsize,
    total: AtomicUsize,
}

impl GatedPrefetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl Prefetcher for GatedPrefetcher {
    async fn prefetch(&self, _query: &str, _filters: &Filters) -> Result<(), SearchError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let permit = self.gate.acquire().await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        permit.map(|_| ()).map_err(|e| SearchError::Engine(e.to_string()))
    }
}

fn gated_cache(prefetcher: &Arc<GatedPrefetcher>, store: NamespacedStore) -> PredictiveCache {
    let prefetcher: Arc<dyn Prefetcher> = prefetcher.clone();
    PredictiveCache::new(PredictiveConfig::default(), store, Some(prefetcher))
}

fn set_filter(i: usize) -> Filters {
    let mut filters = Filters::new();
    filters.insert("set".into(), json!(i));
    filters
}

#[tokio::test(start_paused = true)]
async fn one_search_prefetches_at_most_five() {
    let store = NamespacedStore::new();
    let learner = PredictiveCache::new(PredictiveConfig::default(), store.clone(), None);
    for i in 0..8 {
        learner.record_user_search(&format!("squat{i}"), &set_filter(i));
    }

    let prefetcher = GatedPrefetcher::new();
    let cache = gated_cache(&prefetcher, store);
    cache.record_user_search("squat", &Filters::new());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(prefetcher.total.load(Ordering::SeqCst), 0, "prefetch must wait for its delay");

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(prefetcher.total.load(Ordering::SeqCst), 5);
    assert_eq!(cache.in_flight(), 5);

    prefetcher.gate.add_permits(100);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(cache.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn prefetches_in_flight_never_exceed_ten() {
    let prefetcher = GatedPrefetcher::new();
    let cache = gated_cache(&prefetcher, NamespacedStore::new());

    for i in 0..8 {
        cache.record_user_search(&format!("squat{i}"), &set_filter(i));
    }
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(cache.in_flight(), 10);
    assert_eq!(prefetcher.max_active.load(Ordering::SeqCst), 10);
    assert_eq!(prefetcher.total.load(Ordering::SeqCst), 10);

    prefetcher.gate.add_permits(100);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(cache.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn clear_keeps_running_prefetches_in_budget() {
    let prefetcher = GatedPrefetcher::new();
    let cache = gated_cache(&prefetcher, NamespacedStore::new());

    for i in 0..8 {
        cache.record_user_search(&format!("squat{i}"), &set_filter(i));
    }
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(prefetcher.active.load(Ordering::SeqCst), 10);

    cache.clear_cache();
    assert_eq!(cache.in_flight(), 10);
    for i in 0..8 {
        cache.record_user_search(&format!("press{i}"), &set_filter(i));
    }
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(prefetcher.max_active.load(Ordering::SeqCst), 10);
    assert_eq!(prefetcher.total.load(Ordering::SeqCst), 10);

    prefetcher.gate.add_permits(100);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(cache.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn clear_drops_pending_prefetch_pass() {
    let prefetcher = GatedPrefetcher::new();
    let cache = gated_cache(&prefetcher, NamespacedStore::new());
    cache.record_user_search("squat", &Filters::new());
    cache.record_user_search("squats", &Filters::new());

    cache.clear_cache();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(prefetcher.total.load(Ordering::SeqCst), 0);
    assert!(cache.pattern().is_empty());
}

#[tokio::test(start_paused = true)]
async fn prefetch_warms_search_cache_at_low_priority() {
    let engine = MockEngine::with_items(&exercises());
    let search = search_over(&engine, 4);
    let config = PredictiveConfig {
        prefetch_delay_ms: 50,
        ..PredictiveConfig::default()
    };
    let prefetcher: Arc<dyn Prefetcher> = Arc::new(search.clone());
    let predictive = PredictiveCache::new(config, NamespacedStore::new(), Some(prefetcher));

    let mut barbell = Filters::new();
    barbell.insert("equipment".into(), json!("barbell"));
    predictive.record_user_search("squat", &barbell);
    predictive.record_user_search("deadlift", &Filters::new());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let calls = engine.calls();
    assert!(calls.contains(&"deadlift#equipment:barbell".to_string()));
    assert!(calls.contains(&"squat#".to_string()));
    assert_eq!(search.scheduler().stats().by_priority[&Priority::Low].completed, 2);

    let warmed = search.search("deadlift", &barbell, SearchOptions::default()).await.unwrap();
    assert!(warmed.from_cache);
}
