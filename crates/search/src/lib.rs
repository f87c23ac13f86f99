//! Search over the scheduler: an engine abstraction, a deduplicating result
//! cache in front of it, predictive prefetch, and a debounced reactive
//! session for UI code.

pub mod concurrent;
pub mod engine;
pub mod error;
pub mod memory;
pub mod predictive;
pub mod session;

pub use concurrent::{ConcurrentSearch, SearchCache, SearchOptions};
pub use engine::{canonical_key, Filters, SearchEngine, SearchResponse};
pub use error::SearchError;
pub use memory::{InMemoryEngine, Searchable};
pub use predictive::{
    generate_candidates, PredictiveCache, PrefetchCandidate, Prefetcher, UserPattern,
};
pub use session::{SearchSession, SearchState};
