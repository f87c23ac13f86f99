use std::sync::Arc;
use std::time::Duration;

use liftlog_cache::{DedupOptions, DedupStats, RequestDeduplicator};
use liftlog_scheduler::{tags, ConcurrencyManager, Priority, TaskBuilder, TaskError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::{canonical_key, Filters, SearchEngine, SearchResponse};
use crate::error::SearchError;
use crate::predictive::Prefetcher;

/// Deduplicating result cache in front of a search engine.
pub type SearchCache<T> = RequestDeduplicator<SearchResponse<T>, SearchError>;

const DEFAULT_MAX_RETRIES: u32 = 3;

/// How a single search is scheduled.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub priority: Priority,
    /// Extra tags, e.g. a session tag for bulk cancellation.
    pub tags: Vec<String>,
    /// Aborts the search before dispatch or while it runs.
    pub signal: Option<CancellationToken>,
    /// Tag the task as user interaction.
    pub interactive: bool,
    /// Skip cached and in-flight results.
    pub force: bool,
    /// Cache lifetime of the result; `None` uses the cache default.
    pub ttl: Option<Duration>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            priority: Priority::High,
            tags: Vec::new(),
            signal: None,
            interactive: true,
            force: false,
            ttl: None,
        }
    }
}

impl SearchOptions {
    /// Speculative low-priority search, first to go under pressure.
    pub fn prefetch() -> Self {
        Self {
            priority: Priority::Low,
            tags: vec![tags::PREFETCH.to_string()],
            interactive: false,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Runs every engine call as a scheduler task, behind the deduplicating
/// cache.
pub struct ConcurrentSearch<T: Send + Sync + 'static> {
    engine: Arc<dyn SearchEngine<T>>,
    scheduler: ConcurrencyManager,
    cache: SearchCache<T>,
    max_retries: u32,
}

impl<T: Send + Sync + 'static> Clone for ConcurrentSearch<T> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            scheduler: self.scheduler.clone(),
            cache: self.cache.clone(),
            max_retries: self.max_retries,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ConcurrentSearch<T> {
    pub fn new(
        engine: Arc<dyn SearchEngine<T>>,
        scheduler: ConcurrencyManager,
        cache: SearchCache<T>,
    ) -> Self {
        Self {
            engine,
            scheduler,
            cache,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Retry budget for background (preload, sync) tasks.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn scheduler(&self) -> &ConcurrencyManager {
        &self.scheduler
    }

    pub fn cache_stats(&self) -> DedupStats {
        self.cache.stats()
    }

    /// Search through the scheduler.
    ///
    /// Fails with [`SearchError::Aborted`] when `options.signal` fires before
    /// dispatch, while the search waits in the queue, or while it runs.
    pub async fn search(
        &self,
        query: &str,
        filters: &Filters,
        options: SearchOptions,
    ) -> Result<SearchResponse<T>, SearchError> {
        if options.signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(SearchError::Aborted);
        }

        let mut builder = TaskBuilder::anonymous("search")
            .priority(options.priority)
            .tag(tags::SEARCH)
            .with_tags(options.tags.iter().cloned());
        if options.interactive {
            builder = builder.tag(tags::USER_INTERACTION);
        }
        if let Some(signal) = &options.signal {
            builder = builder.signal(signal.clone());
        }

        let engine = Arc::clone(&self.engine);
        let cache = self.cache.clone();
        let key = canonical_key(query, filters);
        let query = query.to_string();
        let filters = filters.clone();
        let signal = options.signal.clone();
        let dedup = DedupOptions {
            ttl: options.ttl,
            force: options.force,
        };

        let handle = self.scheduler.enqueue_with_handle(builder, move || {
            let lookup = lookup(
                Arc::clone(&engine),
                cache.clone(),
                key.clone(),
                query.clone(),
                filters.clone(),
                dedup,
            );
            let signal = signal.clone();
            async move {
                let result = match signal {
                    Some(signal) => tokio::select! {
                        _ = signal.cancelled() => return Err(TaskError::Aborted),
                        result = lookup => result,
                    },
                    None => lookup.await,
                };
                result.map_err(TaskError::from)
            }
        });

        let Some(signal) = options.signal else {
            return handle.join().await.map_err(SearchError::from);
        };
        // The body only sees the signal once admitted; watch it while queued too.
        let id = handle.id().to_string();
        tokio::select! {
            biased;
            result = handle.join() => result.map_err(SearchError::from),
            _ = signal.cancelled() => {
                if self.scheduler.cancel(&id) {
                    debug!(task_id = %id, "search aborted by its signal");
                }
                Err(SearchError::Aborted)
            }
        }
    }

    /// Warm the cache with unfiltered searches for `queries`. Returns the
    /// task ids.
    pub fn preload_popular_searches(&self, queries: &[String]) -> Vec<String> {
        queries
            .iter()
            .map(|query| {
                let engine = Arc::clone(&self.engine);
                let cache = self.cache.clone();
                let query = query.clone();
                let key = canonical_key(&query, &Filters::new());
                let task = TaskBuilder::anonymous("preload")
                    .priority(Priority::Low)
                    .with_tags([tags::PREFETCH, tags::LOW_PRIORITY])
                    .retry(self.max_retries)
                    .build(move || {
                        let lookup = lookup(
                            Arc::clone(&engine),
                            cache.clone(),
                            key.clone(),
                            query.clone(),
                            Filters::new(),
                            DedupOptions::default(),
                        );
                        async move { lookup.await.map(|_| ()).map_err(TaskError::from) }
                    });
                self.scheduler.enqueue(task)
            })
            .collect()
    }

    /// Re-index `items` in the background. Returns the task id.
    pub fn background_sync(&self, items: Vec<T>) -> String {
        let task = self
            .index_task(items, "sync")
            .priority(Priority::Low)
            .with_tags([tags::BACKGROUND_SYNC, tags::LOW_PRIORITY])
            .retry(self.max_retries);
        let id = task.id().to_string();
        let engine = Arc::clone(&self.engine);
        let cache = self.cache.clone();
        let items = Arc::new(task.items);
        self.scheduler.enqueue(task.builder.build(move || {
            let engine = Arc::clone(&engine);
            let cache = cache.clone();
            let items = Arc::clone(&items);
            async move {
                engine.index_items(items.as_ref().clone()).await?;
                cache.clear();
                Ok::<(), TaskError>(())
            }
        }));
        debug!(task_id = %id, "background sync queued");
        id
    }

    /// Index `items` now, at high priority.
    pub async fn index_items(&self, items: Vec<T>) -> Result<(), SearchError> {
        self.index_items_tagged(items, &[]).await
    }

    /// Index `items` with extra task tags.
    pub async fn index_items_tagged(
        &self,
        items: Vec<T>,
        extra_tags: &[String],
    ) -> Result<(), SearchError> {
        let count = items.len();
        let task = self
            .index_task(items, "index")
            .priority(Priority::High)
            .with_tags(extra_tags.iter().cloned());
        let engine = Arc::clone(&self.engine);
        let cache = self.cache.clone();
        let items = Arc::new(task.items);
        let handle = self.scheduler.enqueue_with_handle(task.builder, move || {
            let engine = Arc::clone(&engine);
            let cache = cache.clone();
            let items = Arc::clone(&items);
            async move {
                engine.index_items(items.as_ref().clone()).await?;
                cache.clear();
                Ok::<(), TaskError>(())
            }
        });

        handle.join().await.map_err(|err| match SearchError::from(err) {
            SearchError::Engine(msg) => SearchError::Index(msg),
            other => other,
        })?;
        info!(items = count, "items indexed");
        Ok(())
    }

    fn index_task(&self, items: Vec<T>, prefix: &str) -> IndexTask<T> {
        IndexTask {
            builder: TaskBuilder::anonymous(prefix).tag(tags::INDEXING),
            items,
        }
    }

    /// Drop cached results in the engine and the deduplicator.
    pub fn clear_cache(&self) {
        self.engine.clear_cache();
        self.cache.clear();
        debug!("search caches cleared");
    }
}

/// Builder plus payload of an indexing task, before its body is attached.
struct IndexTask<T> {
    builder: TaskBuilder,
    items: Vec<T>,
}

impl<T> IndexTask<T> {
    fn id(&self) -> &str {
        self.builder.id()
    }

    fn priority(mut self, priority: Priority) -> Self {
        self.builder = self.builder.priority(priority);
        self
    }

    fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.builder = self.builder.with_tags(tags);
        self
    }

    fn retry(mut self, max_retries: u32) -> Self {
        self.builder = self.builder.retry(max_retries);
        self
    }
}

/// Cache, then in-flight request, then the engine.
async fn lookup<T: Clone + Send + Sync + 'static>(
    engine: Arc<dyn SearchEngine<T>>,
    cache: SearchCache<T>,
    key: String,
    query: String,
    filters: Filters,
    options: DedupOptions,
) -> Result<SearchResponse<T>, SearchError> {
    if !options.force {
        if let Some(mut hit) = cache.get(&key) {
            hit.from_cache = true;
            return Ok(hit);
        }
    }
    cache
        .deduplicate(
            &key,
            move || async move { engine.search(&query, &filters).await },
            options,
        )
        .await
}

#[async_trait::async_trait]
impl<T: Clone + Send + Sync + 'static> Prefetcher for ConcurrentSearch<T> {
    async fn prefetch(&self, query: &str, filters: &Filters) -> Result<(), SearchError> {
        self.search(query, filters, SearchOptions::prefetch()).await.map(|_| ())
    }
}
