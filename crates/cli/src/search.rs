//! `search`: index a catalog and run queries through a search session.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use liftlog_search::{
    ConcurrentSearch, Filters, InMemoryEngine, PredictiveCache, Prefetcher, SearchCache,
    SearchEngine, SearchSession,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::app::App;
use crate::catalog::{self, Exercise};
use crate::cli::SearchArgs;

/// One line of output per query.
#[derive(Debug, Serialize)]
pub struct QueryReport {
    pub query: String,
    pub filters: Filters,
    pub results: Vec<String>,
    pub from_cache: bool,
    pub from_worker: bool,
    pub suggestions: Vec<String>,
}

pub async fn run(app: &App, args: &SearchArgs) -> Result<Vec<QueryReport>> {
    let items = match &args.catalog {
        Some(path) => catalog::load(path)?,
        None => catalog::sample(),
    };

    let engine: Arc<dyn SearchEngine<Exercise>> =
        Arc::new(InMemoryEngine::new(&app.config.search));
    let cache = SearchCache::new(&app.config.cache);
    let janitor = app.config.cache.purge_interval().map(|every| cache.spawn_janitor(every));
    let search = ConcurrentSearch::new(engine, app.scheduler.clone(), cache)
        .with_max_retries(app.config.scheduler.default_max_retries);
    let prefetcher: Arc<dyn Prefetcher> = Arc::new(search.clone());
    let predictive = PredictiveCache::new(
        app.config.predictive.clone(),
        app.store.clone(),
        Some(prefetcher),
    );
    let session = SearchSession::new(search.clone(), &app.config.search, Some(predictive));

    let count = items.len();
    if app.config.search.enable_indexing {
        let mut state = session.subscribe();
        session.set_items(items);
        state
            .wait_for(|s| s.is_indexed || s.error.is_some())
            .await
            .map(|_| ())
            .context("search session closed while indexing")?;
        if let Some(err) = session.state().error {
            bail!("failed to index catalog: {err}");
        }
    } else {
        search.index_items(items).await.context("failed to index catalog")?;
    }
    info!(items = count, "catalog indexed");

    let filters: Filters = args.filters.iter().cloned().collect();
    session.set_filters(filters.clone());

    let mut reports = Vec::with_capacity(args.queries.len());
    for query in &args.queries {
        session.set_query(query.clone());
        session.search_now().await;

        let state = session.state();
        if let Some(err) = state.error {
            warn!(query = %query, error = %err, "search failed");
            continue;
        }
        reports.push(QueryReport {
            query: query.clone(),
            filters: filters.clone(),
            results: state.results.into_iter().map(|e| e.name).collect(),
            from_cache: state.from_cache,
            from_worker: state.from_worker,
            suggestions: session.suggestions(args.suggestions),
        });
    }

    info!(stats = ?search.cache_stats(), "search cache");
    drop(session);
    if let Some(janitor) = janitor {
        janitor.abort();
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use liftlog_core::Config;
    use serde_json::json;

    fn args(queries: &[&str], filters: Vec<(String, serde_json::Value)>) -> SearchArgs {
        SearchArgs {
            queries: queries.iter().map(|q| q.to_string()).collect(),
            filters,
            catalog: None,
            suggestions: 3,
        }
    }

    #[tokio::test]
    async fn repeated_query_is_served_from_cache() {
        let app = App::new(Config::default());
        let queries = args(&["squat", "bench", "squat", "squa"], Vec::new());
        let reports = run(&app, &queries).await.unwrap();

        assert_eq!(reports.len(), 4);
        assert_eq!(reports[0].results.len(), 4);
        assert!(!reports[0].from_cache);
        assert_eq!(reports[1].results, vec!["Bench Press"]);
        assert!(reports[2].from_cache);
        assert!(!reports[3].from_cache);
        assert_eq!(reports[3].results.len(), 4);
        assert_eq!(reports[3].suggestions, vec!["squat"]);
        app.shutdown();
    }

    #[tokio::test]
    async fn filters_narrow_results() {
        let app = App::new(Config::default());
        let filters = vec![("equipment".to_string(), json!("barbell"))];
        let reports = run(&app, &args(&["squat"], filters)).await.unwrap();

        assert_eq!(reports[0].results, vec!["Back Squat", "Front Squat"]);
        assert_eq!(reports[0].filters.get("equipment"), Some(&json!("barbell")));
        app.shutdown();
    }

    #[tokio::test]
    async fn runs_without_janitor_when_purge_disabled() {
        let mut config = Config::default();
        config.cache.purge_interval_secs = 0;
        assert!(config.cache.purge_interval().is_none());
        let app = App::new(config);
        let reports = run(&app, &args(&["deadlift", "deadlift"], Vec::new())).await.unwrap();

        assert_eq!(reports[0].results, vec!["Romanian Deadlift", "Deadlift"]);
        assert!(reports[1].from_cache);
        app.shutdown();
    }
}
