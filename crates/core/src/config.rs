use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    match profiled_env_opt(profile, key) {
        Some(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable config value");
                default
            }
        },
        None => default,
    }
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).as_deref() {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub predictive: PredictiveConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `LIFTLOG_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("LIFTLOG_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            scheduler: SchedulerConfig::from_env_profiled(p),
            cache: CacheConfig::from_env_profiled(p),
            predictive: PredictiveConfig::from_env_profiled(p),
            search: SearchConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  scheduler:   max_concurrent={}, max_retries={}",
            self.scheduler.max_concurrent_tasks,
            self.scheduler.default_max_retries
        );
        tracing::info!(
            "  cache:       ttl={}ms, max_entries={}, purge={}s",
            self.cache.default_ttl_ms,
            self.cache.max_entries,
            self.cache.purge_interval_secs
        );
        tracing::info!(
            "  predictive:  delay={}ms, max_in_flight={}",
            self.predictive.prefetch_delay_ms,
            self.predictive.max_in_flight
        );
        tracing::info!(
            "  search:      debounce={}ms, indexing={}",
            self.search.debounce_ms,
            self.search.enable_indexing
        );
    }

    /// JSON view for introspection output.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "scheduler": self.scheduler,
            "cache": self.cache,
            "predictive": self.predictive,
            "search": self.search,
        })
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Admission bound when no memory pressure is reported.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    /// Retry budget used by task builders that opt into retries without
    /// naming an explicit count.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

fn default_max_concurrent() -> usize { 4 }
fn default_max_retries() -> u32 { 3 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            default_max_retries: default_max_retries(),
        }
    }
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_concurrent_tasks: profiled_env_parse(
                p,
                "MAX_CONCURRENT_TASKS",
                default_max_concurrent(),
            ),
            default_max_retries: profiled_env_parse(p, "TASK_MAX_RETRIES", default_max_retries()),
        }
    }
}

// ── Request cache ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a caller does not pass one.
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    /// FIFO capacity of the result cache.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Interval of the expired-entry sweep. 0 disables the sweep.
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

fn default_ttl_ms() -> u64 { 5 * 60 * 1000 }
fn default_max_entries() -> usize { 100 }
fn default_purge_interval() -> u64 { 60 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_ttl_ms(),
            max_entries: default_max_entries(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

impl CacheConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            default_ttl_ms: profiled_env_parse(p, "SEARCH_CACHE_TTL_MS", default_ttl_ms()),
            max_entries: profiled_env_parse(p, "SEARCH_CACHE_MAX_ENTRIES", default_max_entries()),
            purge_interval_secs: profiled_env_parse(
                p,
                "SEARCH_CACHE_PURGE_SECS",
                default_purge_interval(),
            ),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// Period of the expired-entry sweep, or `None` when it is disabled.
    pub fn purge_interval(&self) -> Option<Duration> {
        (self.purge_interval_secs > 0).then(|| Duration::from_secs(self.purge_interval_secs))
    }
}

// ── Predictive prefetch ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictiveConfig {
    /// Delay between recording a search and planning its prefetch pass.
    #[serde(default = "default_prefetch_delay")]
    pub prefetch_delay_ms: u64,
    /// Candidates generated per recorded search.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Prefetches allowed in flight at once, process-wide.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Edit-distance cutoff for similar-term candidates.
    #[serde(default = "default_max_edit_distance")]
    pub max_edit_distance: usize,
    #[serde(default = "default_max_terms")]
    pub max_search_terms: usize,
    #[serde(default = "default_max_filter_combinations")]
    pub max_filter_combinations: usize,
    #[serde(default = "default_max_recent")]
    pub max_recent_queries: usize,
}

fn default_prefetch_delay() -> u64 { 1000 }
fn default_max_candidates() -> usize { 5 }
fn default_max_in_flight() -> usize { 10 }
fn default_max_edit_distance() -> usize { 2 }
fn default_max_terms() -> usize { 50 }
fn default_max_filter_combinations() -> usize { 20 }
fn default_max_recent() -> usize { 20 }

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            prefetch_delay_ms: default_prefetch_delay(),
            max_candidates: default_max_candidates(),
            max_in_flight: default_max_in_flight(),
            max_edit_distance: default_max_edit_distance(),
            max_search_terms: default_max_terms(),
            max_filter_combinations: default_max_filter_combinations(),
            max_recent_queries: default_max_recent(),
        }
    }
}

impl PredictiveConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            prefetch_delay_ms: profiled_env_parse(p, "PREFETCH_DELAY_MS", default_prefetch_delay()),
            max_in_flight: profiled_env_parse(p, "PREFETCH_MAX_IN_FLIGHT", default_max_in_flight()),
            ..Self::default()
        }
    }

    pub fn prefetch_delay(&self) -> Duration {
        Duration::from_millis(self.prefetch_delay_ms)
    }
}

// ── Search session ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Debounce applied to auto-search after query/filter changes.
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
    /// When false, sessions skip indexing and count as indexed immediately.
    #[serde(default = "default_enable_indexing")]
    pub enable_indexing: bool,
    /// Capacity of the engine's own result cache.
    #[serde(default = "default_engine_cache_size")]
    pub engine_cache_size: usize,
    /// Indexed item count above which searches run on the blocking pool.
    #[serde(default = "default_worker_threshold")]
    pub worker_threshold: usize,
}

fn default_debounce() -> u64 { 300 }
fn default_enable_indexing() -> bool { true }
fn default_engine_cache_size() -> usize { 50 }
fn default_worker_threshold() -> usize { 1000 }

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce(),
            enable_indexing: default_enable_indexing(),
            engine_cache_size: default_engine_cache_size(),
            worker_threshold: default_worker_threshold(),
        }
    }
}

impl SearchConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            debounce_ms: profiled_env_parse(p, "SEARCH_DEBOUNCE_MS", default_debounce()),
            enable_indexing: profiled_env_bool(
                p,
                "SEARCH_ENABLE_INDEXING",
                default_enable_indexing(),
            ),
            engine_cache_size: profiled_env_parse(
                p,
                "SEARCH_ENGINE_CACHE_SIZE",
                default_engine_cache_size(),
            ),
            worker_threshold: profiled_env_parse(
                p,
                "SEARCH_WORKER_THRESHOLD",
                default_worker_threshold(),
            ),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.max_concurrent_tasks, 4);
        assert_eq!(config.cache.max_entries, 100);
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(300));
        assert_eq!(config.cache.purge_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.predictive.max_candidates, 5);
        assert_eq!(config.predictive.max_in_flight, 10);
        assert_eq!(config.search.debounce(), Duration::from_millis(300));
        assert_eq!(config.profile_label(), "default");
    }

    #[test]
    fn zero_purge_interval_disables_sweep() {
        let cache = CacheConfig {
            purge_interval_secs: 0,
            ..CacheConfig::default()
        };
        assert_eq!(cache.purge_interval(), None);
    }

    #[test]
    fn profiled_lookup_prefers_prefixed_key() {
        env::set_var("LLTEST_MAX_CONCURRENT_TASKS", "9");
        env::set_var("SEARCH_DEBOUNCE_MS", "120");
        let config = Config::for_profile("lltest");
        assert_eq!(config.profile, "LLTEST");
        assert_eq!(config.scheduler.max_concurrent_tasks, 9);
        assert_eq!(config.search.debounce_ms, 120);
        env::remove_var("LLTEST_MAX_CONCURRENT_TASKS");
        env::remove_var("SEARCH_DEBOUNCE_MS");
    }

    #[test]
    fn unparsable_values_fall_back() {
        env::set_var("BADCFG_TASK_MAX_RETRIES", "lots");
        let config = Config::for_profile("badcfg");
        assert_eq!(config.scheduler.default_max_retries, 3);
        env::remove_var("BADCFG_TASK_MAX_RETRIES");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"scheduler":{"max_concurrent_tasks":2}}"#).unwrap();
        assert_eq!(config.scheduler.max_concurrent_tasks, 2);
        assert_eq!(config.scheduler.default_max_retries, 3);
        assert_eq!(config.cache.max_entries, 100);
    }

    #[test]
    fn summary_has_sections() {
        let summary = Config::default().summary();
        assert_eq!(summary["profile"], "default");
        assert_eq!(summary["scheduler"]["max_concurrent_tasks"], 4);
        assert!(summary["search"]["enable_indexing"].as_bool().unwrap());
    }
}
