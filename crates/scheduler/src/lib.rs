//! Priority task scheduler with bounded concurrency, tag-based cancellation,
//! immediate retries, and memory-pressure / visibility throttling.
//!
//! All work is submitted to a [`ConcurrencyManager`] as a [`Task`]. Tasks wait
//! in one of three priority buckets until a concurrency slot opens, then run
//! as spawned tokio tasks. Callers that need the task's value use
//! [`ConcurrencyManager::enqueue_with_handle`] and await the [`TaskHandle`].

pub mod handle;
pub mod runner;
pub mod stats;
pub mod tags;
pub mod task;
pub mod types;

pub use handle::TaskHandle;
pub use runner::ConcurrencyManager;
pub use stats::{PriorityStats, SchedulerStats};
pub use task::{Task, TaskBuilder, TaskError, TaskOutcome};
pub use tokio_util::sync::CancellationToken;
pub use types::{eligible_priorities, Priority};

pub use liftlog_core::{HostSignal, MemoryPressure};
