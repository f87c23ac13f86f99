//! Well-known task tags.
//!
//! Tags are free-form, but these are the ones the scheduler itself acts on
//! when shedding load, plus the ones the search layer attaches.

use liftlog_core::MemoryPressure;

pub const LOW_PRIORITY: &str = "low-priority";
pub const BACKGROUND_SYNC: &str = "background-sync";
pub const PREFETCH: &str = "prefetch";
pub const SEARCH: &str = "search";
pub const USER_INTERACTION: &str = "user-interaction";
pub const INDEXING: &str = "indexing";

/// Tags whose tasks are cancelled on entering the given pressure level.
pub fn shed_on_pressure(pressure: MemoryPressure) -> &'static [&'static str] {
    match pressure {
        MemoryPressure::High => &[LOW_PRIORITY, BACKGROUND_SYNC, PREFETCH],
        MemoryPressure::Medium => &[BACKGROUND_SYNC, PREFETCH],
        MemoryPressure::Low => &[],
    }
}

/// Tags whose tasks are cancelled when the page becomes hidden.
pub fn shed_on_hidden() -> &'static [&'static str] {
    &[BACKGROUND_SYNC, PREFETCH]
}
