//! In-process reference engine: a token index over a fixed item set.
//!
//! Indexing tokenizes every item's search text on a blocking worker. Queries
//! match when every query token hits an indexed token exactly or as a prefix;
//! exact hits score higher. Results pass through an LRU cache keyed by
//! [`canonical_key`], which is dropped whenever the index is rebuilt.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use liftlog_core::SearchConfig;
use lru::LruCache;
use tracing::{debug, info};

use crate::engine::{canonical_key, Filters, SearchEngine, SearchResponse};
use crate::error::SearchError;

/// Items the in-memory engine can index.
pub trait Searchable: Clone + Send + Sync + 'static {
    /// Free text the item is found by.
    fn search_text(&self) -> String;

    /// Value of a filterable field, if the item has it.
    fn filter_value(&self, field: &str) -> Option<serde_json::Value>;
}

const EXACT_HIT: u32 = 2;
const PREFIX_HIT: u32 = 1;

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

struct TokenIndex<T> {
    items: Vec<T>,
    postings: HashMap<String, Vec<usize>>,
}

impl<T: Searchable> TokenIndex<T> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            postings: HashMap::new(),
        }
    }

    fn build(items: Vec<T>) -> Self {
        let mut postings: HashMap<String, Vec<usize>> = HashMap::new();
        for (pos, item) in items.iter().enumerate() {
            let mut tokens = tokenize(&item.search_text());
            tokens.sort();
            tokens.dedup();
            for token in tokens {
                postings.entry(token).or_default().push(pos);
            }
        }
        Self { items, postings }
    }

    /// Best hit score per item for one query token.
    fn token_scores(&self, query_token: &str) -> HashMap<usize, u32> {
        let mut scores = HashMap::new();
        for (token, positions) in &self.postings {
            let score = if token == query_token {
                EXACT_HIT
            } else if token.starts_with(query_token) {
                PREFIX_HIT
            } else {
                continue;
            };
            for &pos in positions {
                let best = scores.entry(pos).or_insert(0);
                *best = (*best).max(score);
            }
        }
        scores
    }

    fn query(&self, query: &str, filters: &Filters) -> Vec<T> {
        let tokens = tokenize(query);

        let mut scored: Vec<(usize, u32)> = if tokens.is_empty() {
            (0..self.items.len()).map(|pos| (pos, 0)).collect()
        } else {
            let mut totals: Option<HashMap<usize, u32>> = None;
            for token in &tokens {
                let hits = self.token_scores(token);
                totals = Some(match totals {
                    None => hits,
                    Some(acc) => acc
                        .into_iter()
                        .filter_map(|(pos, score)| hits.get(&pos).map(|hit| (pos, score + hit)))
                        .collect(),
                });
            }
            totals.unwrap_or_default().into_iter().collect()
        };

        scored.retain(|&(pos, _)| matches_filters(&self.items[pos], filters));
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.into_iter().map(|(pos, _)| self.items[pos].clone()).collect()
    }
}

/// Every non-null filter must equal the item's field, or be contained in it
/// when the field is an array.
fn matches_filters<T: Searchable>(item: &T, filters: &Filters) -> bool {
    filters.iter().all(|(field, expected)| {
        if expected.is_null() {
            return true;
        }
        match item.filter_value(field) {
            Some(serde_json::Value::Array(values)) => values.contains(expected),
            Some(actual) => &actual == expected,
            None => false,
        }
    })
}

/// Token-index search engine over `T`.
pub struct InMemoryEngine<T> {
    index: RwLock<Arc<TokenIndex<T>>>,
    cache: Mutex<LruCache<String, Vec<T>>>,
    worker_threshold: usize,
}

impl<T: Searchable> InMemoryEngine<T> {
    pub fn new(config: &SearchConfig) -> Self {
        Self::with_settings(config.engine_cache_size, config.worker_threshold)
    }

    pub fn with_settings(cache_size: usize, worker_threshold: usize) -> Self {
        Self {
            index: RwLock::new(Arc::new(TokenIndex::empty())),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN),
            )),
            worker_threshold,
        }
    }

    fn current_index(&self) -> Arc<TokenIndex<T>> {
        Arc::clone(&self.index.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.current_index().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cached_queries(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait::async_trait]
impl<T: Searchable> SearchEngine<T> for InMemoryEngine<T> {
    async fn search(
        &self,
        query: &str,
        filters: &Filters,
    ) -> Result<SearchResponse<T>, SearchError> {
        let key = canonical_key(query, filters);
        if let Some(results) = self.cache.lock().unwrap_or_else(PoisonError::into_inner).get(&key) {
            debug!(key = %key, "engine cache hit");
            return Ok(SearchResponse {
                results: results.clone(),
                from_cache: true,
                from_worker: false,
            });
        }

        let index = self.current_index();
        let from_worker = index.items.len() >= self.worker_threshold;
        let results = if from_worker {
            let query = query.to_string();
            let filters = filters.clone();
            tokio::task::spawn_blocking(move || index.query(&query, &filters))
                .await
                .map_err(|e| SearchError::Engine(format!("search worker failed: {e}")))?
        } else {
            index.query(query, filters)
        };

        debug!(key = %key, hits = results.len(), from_worker, "engine search");
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, results.clone());
        Ok(SearchResponse {
            results,
            from_cache: false,
            from_worker,
        })
    }

    async fn index_items(&self, items: Vec<T>) -> Result<(), SearchError> {
        let count = items.len();
        let index = tokio::task::spawn_blocking(move || TokenIndex::build(items))
            .await
            .map_err(|e| SearchError::Index(format!("index worker failed: {e}")))?;
        let tokens = index.postings.len();

        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(index);
        self.clear_cache();
        info!(items = count, tokens, "search index rebuilt");
        Ok(())
    }

    fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Lift {
        name: &'static str,
        equipment: &'static str,
        muscles: &'static [&'static str],
    }

    impl Searchable for Lift {
        fn search_text(&self) -> String {
            self.name.to_string()
        }

        fn filter_value(&self, field: &str) -> Option<serde_json::Value> {
            match field {
                "equipment" => Some(json!(self.equipment)),
                "muscle" => Some(json!(self.muscles)),
                _ => None,
            }
        }
    }

    fn lifts() -> Vec<Lift> {
        vec![
            Lift { name: "Back Squat", equipment: "barbell", muscles: &["quads", "glutes"] },
            Lift { name: "Goblet Squat", equipment: "dumbbell", muscles: &["quads"] },
            Lift { name: "Bench Press", equipment: "barbell", muscles: &["chest", "triceps"] },
            Lift { name: "Squat Jump", equipment: "bodyweight", muscles: &["quads", "calves"] },
        ]
    }

    fn names(response: &SearchResponse<Lift>) -> Vec<&'static str> {
        response.results.iter().map(|l| l.name).collect()
    }

    #[test]
    fn tokenizer_splits_and_lowercases() {
        assert_eq!(tokenize("Romanian Deadlift (RDL)"), vec!["romanian", "deadlift", "rdl"]);
        assert!(tokenize("  -- ").is_empty());
    }

    #[tokio::test]
    async fn all_tokens_must_match() {
        let engine = InMemoryEngine::with_settings(10, 1000);
        engine.index_items(lifts()).await.unwrap();

        let response = engine.search("back squat", &Filters::new()).await.unwrap();
        assert_eq!(names(&response), vec!["Back Squat"]);
        assert!(!response.from_cache);
    }

    #[tokio::test]
    async fn exact_hits_rank_before_prefix_hits() {
        let engine = InMemoryEngine::with_settings(10, 1000);
        engine
            .index_items(vec![
                Lift { name: "Benchmark Row", equipment: "cable", muscles: &["back"] },
                Lift { name: "Bench Dip", equipment: "bodyweight", muscles: &["triceps"] },
            ])
            .await
            .unwrap();

        let response = engine.search("bench", &Filters::new()).await.unwrap();
        assert_eq!(names(&response), vec!["Bench Dip", "Benchmark Row"]);
    }

    #[tokio::test]
    async fn filters_match_scalars_and_arrays() {
        let engine = InMemoryEngine::with_settings(10, 1000);
        engine.index_items(lifts()).await.unwrap();

        let mut filters = Filters::new();
        filters.insert("equipment".into(), json!("barbell"));
        let response = engine.search("squat", &filters).await.unwrap();
        assert_eq!(names(&response), vec!["Back Squat"]);

        let mut filters = Filters::new();
        filters.insert("muscle".into(), json!("calves"));
        let response = engine.search("", &filters).await.unwrap();
        assert_eq!(names(&response), vec!["Squat Jump"]);

        let mut filters = Filters::new();
        filters.insert("grip".into(), json!("neutral"));
        assert!(engine.search("squat", &filters).await.unwrap().results.is_empty());
    }

    #[tokio::test]
    async fn repeat_query_is_served_from_cache_until_reindex() {
        let engine = InMemoryEngine::with_settings(10, 1000);
        engine.index_items(lifts()).await.unwrap();

        engine.search("squat", &Filters::new()).await.unwrap();
        let again = engine.search("  SQUAT", &Filters::new()).await.unwrap();
        assert!(again.from_cache);
        assert_eq!(engine.cached_queries(), 1);

        engine.index_items(lifts()).await.unwrap();
        assert_eq!(engine.cached_queries(), 0);
        assert!(!engine.search("squat", &Filters::new()).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn large_index_scores_on_worker() {
        let engine = InMemoryEngine::with_settings(10, 2);
        engine.index_items(lifts()).await.unwrap();

        let response = engine.search("squat", &Filters::new()).await.unwrap();
        assert!(response.from_worker);
        assert_eq!(response.results.len(), 3);
    }
}
