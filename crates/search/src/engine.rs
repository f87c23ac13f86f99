use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// Field name → required value. Ordered so keys are canonical.
pub type Filters = BTreeMap<String, serde_json::Value>;

/// Result of one engine query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse<T> {
    pub results: Vec<T>,
    /// Served from a cache rather than a fresh scan.
    #[serde(default)]
    pub from_cache: bool,
    /// Scored off the async runtime on a blocking worker.
    #[serde(default)]
    pub from_worker: bool,
}

impl<T> SearchResponse<T> {
    pub fn new(results: Vec<T>) -> Self {
        Self {
            results,
            from_cache: false,
            from_worker: false,
        }
    }
}

/// A searchable collection of `T`.
///
/// Indexing and cache clearing are optional; engines that search a live
/// backend can keep the defaults.
#[async_trait::async_trait]
pub trait SearchEngine<T: Send + Sync + 'static>: Send + Sync {
    async fn search(
        &self,
        query: &str,
        filters: &Filters,
    ) -> Result<SearchResponse<T>, SearchError>;

    async fn index_items(&self, _items: Vec<T>) -> Result<(), SearchError> {
        Ok(())
    }

    fn clear_cache(&self) {}
}

/// Cache key for a query: trimmed, lower-cased query, `#`, then filters in
/// key order as `key:value` joined by `|`.
///
/// ```
/// # use liftlog_search::{canonical_key, Filters};
/// let mut filters = Filters::new();
/// filters.insert("muscle".into(), "legs".into());
/// filters.insert("equipment".into(), "barbell".into());
/// assert_eq!(canonical_key("  Squat ", &filters), "squat#equipment:barbell|muscle:legs");
/// ```
pub fn canonical_key(query: &str, filters: &Filters) -> String {
    let filter_part = filters
        .iter()
        .map(|(key, value)| format!("{key}:{}", filter_value_text(value)))
        .collect::<Vec<_>>()
        .join("|");
    format!("{}#{}", query.trim().to_lowercase(), filter_part)
}

fn filter_value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
