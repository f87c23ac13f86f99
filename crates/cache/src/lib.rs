//! Request deduplication with a TTL result cache, plus a small namespaced
//! key-value store for client-side state.

pub mod dedup;
pub mod error;
pub mod store;

pub use dedup::{DedupOptions, DedupStats, RequestDeduplicator};
pub use error::StoreError;
pub use store::NamespacedStore;
