use std::collections::VecDeque;

use liftlog_core::PredictiveConfig;
use serde::{Deserialize, Serialize};

use crate::engine::Filters;

/// Caps on the lists a [`UserPattern`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternLimits {
    pub max_search_terms: usize,
    pub max_filter_combinations: usize,
    pub max_recent_queries: usize,
}

impl From<&PredictiveConfig> for PatternLimits {
    fn from(config: &PredictiveConfig) -> Self {
        Self {
            max_search_terms: config.max_search_terms,
            max_filter_combinations: config.max_filter_combinations,
            max_recent_queries: config.max_recent_queries,
        }
    }
}

impl Default for PatternLimits {
    fn default() -> Self {
        Self::from(&PredictiveConfig::default())
    }
}

/// What one user has searched for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPattern {
    /// Distinct normalized queries, oldest first.
    #[serde(default)]
    pub search_terms: Vec<String>,
    /// Distinct non-empty filter sets, oldest first.
    #[serde(default)]
    pub filter_combinations: Vec<Filters>,
    /// Raw queries, most recent first. May repeat.
    #[serde(default)]
    pub recent_queries: VecDeque<String>,
}

impl UserPattern {
    pub fn record(&mut self, query: &str, filters: &Filters, limits: PatternLimits) {
        let raw = query.trim();
        if raw.is_empty() {
            return;
        }

        let term = raw.to_lowercase();
        if !self.search_terms.contains(&term) {
            self.search_terms.push(term);
            truncate_front(&mut self.search_terms, limits.max_search_terms);
        }

        if !filters.is_empty() && !self.filter_combinations.contains(filters) {
            self.filter_combinations.push(filters.clone());
            truncate_front(&mut self.filter_combinations, limits.max_filter_combinations);
        }

        self.recent_queries.push_front(raw.to_string());
        self.recent_queries.truncate(limits.max_recent_queries);
    }

    pub fn is_empty(&self) -> bool {
        self.search_terms.is_empty() && self.recent_queries.is_empty()
    }
}

/// Drop the oldest entries until `items` fits in `cap`.
fn truncate_front<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn limits(cap: usize) -> PatternLimits {
        PatternLimits {
            max_search_terms: cap,
            max_filter_combinations: cap,
            max_recent_queries: cap,
        }
    }

    #[test]
    fn terms_are_distinct_and_normalized() {
        let mut pattern = UserPattern::default();
        pattern.record("Squat", &Filters::new(), limits(10));
        pattern.record("  squat ", &Filters::new(), limits(10));

        assert_eq!(pattern.search_terms, vec!["squat"]);
        assert_eq!(pattern.recent_queries, vec!["squat", "Squat"]);
    }

    #[test]
    fn blank_queries_are_ignored() {
        let mut pattern = UserPattern::default();
        pattern.record("   ", &Filters::new(), limits(10));
        assert!(pattern.is_empty());
    }

    #[test]
    fn caps_drop_oldest() {
        let mut pattern = UserPattern::default();
        for q in ["a", "b", "c", "d"] {
            let mut filters = Filters::new();
            filters.insert("level".into(), json!(q));
            pattern.record(q, &filters, limits(3));
        }

        assert_eq!(pattern.search_terms, vec!["b", "c", "d"]);
        assert_eq!(pattern.filter_combinations.len(), 3);
        assert_eq!(pattern.filter_combinations[0]["level"], json!("b"));
        assert_eq!(pattern.recent_queries, vec!["d", "c", "b"]);
    }

    #[test]
    fn empty_filters_not_recorded_as_combination() {
        let mut pattern = UserPattern::default();
        pattern.record("row", &Filters::new(), limits(5));
        assert!(pattern.filter_combinations.is_empty());
    }

    #[test]
    fn serializes_for_the_store() {
        let mut pattern = UserPattern::default();
        pattern.record("lunge", &Filters::new(), PatternLimits::default());
        let value = serde_json::to_value(&pattern).unwrap();
        let back: UserPattern = serde_json::from_value(value).unwrap();
        assert_eq!(back, pattern);
    }
}
