use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::types::Priority;

/// Error type for task execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,
    #[error("task aborted by its cancellation signal")]
    Aborted,
    #[error("task timed out after {0:?}")]
    TimedOut(Duration),
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task id already queued or running: {0}")]
    Duplicate(String),
    #[error("scheduler has been destroyed")]
    ShutDown,
}

impl TaskError {
    pub fn failed(msg: impl fmt::Display) -> Self {
        TaskError::Failed(msg.to_string())
    }

    /// True for outcomes the caller asked for (cancel or abort signal).
    /// These are never counted as failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled | TaskError::Aborted)
    }
}

/// Terminal state of a task, delivered to its handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Failed with no retry budget left.
    Failed(TaskError),
    Cancelled,
    Aborted,
    /// Never queued (duplicate id, destroyed scheduler).
    Rejected(TaskError),
}

pub type TaskFuture = BoxFuture<'static, Result<(), TaskError>>;
pub(crate) type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// A unit of deferred, cancellable work.
///
/// `run` is invoked once per attempt, so it must be re-invocable: retries
/// call it again rather than re-polling a finished future.
pub struct Task {
    pub(crate) id: String,
    pub(crate) priority: Priority,
    pub(crate) tags: HashSet<String>,
    pub(crate) run: TaskFn,
    pub(crate) retry_on_fail: bool,
    pub(crate) max_retries: u32,
    pub(crate) attempts: u32,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) signal: Option<CancellationToken>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) completion: Option<oneshot::Sender<TaskOutcome>>,
}

impl Task {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Retries consumed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether another failure would be retried.
    pub(crate) fn can_retry(&self) -> bool {
        self.retry_on_fail && self.attempts < self.max_retries
    }

    /// Deliver the terminal outcome to a waiting handle, if any.
    pub(crate) fn notify(&mut self, outcome: TaskOutcome) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("tags", &self.tags)
            .field("retry_on_fail", &self.retry_on_fail)
            .field("max_retries", &self.max_retries)
            .field("attempts", &self.attempts)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`Task`].
///
/// # Example
/// ```ignore
/// let task = TaskBuilder::new("save-workout-42")
///     .priority(Priority::High)
///     .tag("save")
///     .retry(2)
///     .build(|| async { persist().await.map_err(TaskError::failed) });
/// manager.enqueue(task);
/// ```
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    id: String,
    priority: Priority,
    tags: HashSet<String>,
    retry_on_fail: bool,
    max_retries: u32,
    signal: Option<CancellationToken>,
    timeout: Option<Duration>,
}

impl TaskBuilder {
    /// Create a builder for a task with a caller-chosen idempotency key.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority: Priority::Normal,
            tags: HashSet::new(),
            retry_on_fail: false,
            max_retries: 0,
            signal: None,
            timeout: None,
        }
    }

    /// Create a builder with a generated `{prefix}-{uuid}` id.
    pub fn anonymous(prefix: &str) -> Self {
        Self::new(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Retry failed attempts up to `max_retries` times (immediate requeue,
    /// no backoff).
    pub fn retry(mut self, max_retries: u32) -> Self {
        self.retry_on_fail = true;
        self.max_retries = max_retries;
        self
    }

    /// Fail fast with [`TaskError::Aborted`] if `signal` fires before the
    /// task starts.
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Bound each attempt. An expired attempt counts as a (retryable) failure.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Finish the task with its re-invocable body.
    pub fn build<F, Fut>(self, run: F) -> Task
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Task {
            id: self.id,
            priority: self.priority,
            tags: self.tags,
            run: Arc::new(move || run().boxed()),
            retry_on_fail: self.retry_on_fail,
            max_retries: self.max_retries,
            attempts: 0,
            created_at: Utc::now(),
            signal: self.signal,
            timeout: self.timeout,
            completion: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_policy() {
        let task = TaskBuilder::new("t1")
            .priority(Priority::Low)
            .tag("prefetch")
            .with_tags(["search", "user-interaction"])
            .retry(2)
            .build(|| async { Ok(()) });

        assert_eq!(task.id(), "t1");
        assert_eq!(task.priority(), Priority::Low);
        assert_eq!(task.tags().len(), 3);
        assert!(task.has_tag("search"));
        assert_eq!(task.attempts(), 0);
        assert!(task.can_retry());
    }

    #[test]
    fn no_retry_by_default() {
        let task = TaskBuilder::new("t2").build(|| async { Ok(()) });
        assert!(!task.can_retry());
        assert_eq!(task.priority(), Priority::Normal);
    }

    #[test]
    fn anonymous_ids_are_unique() {
        let a = TaskBuilder::anonymous("search");
        let b = TaskBuilder::anonymous("search");
        assert!(a.id().starts_with("search-"));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn cancellation_classification() {
        assert!(TaskError::Cancelled.is_cancellation());
        assert!(TaskError::Aborted.is_cancellation());
        assert!(!TaskError::failed("boom").is_cancellation());
        assert!(!TaskError::TimedOut(Duration::from_secs(1)).is_cancellation());
    }

    #[tokio::test]
    async fn run_is_reinvocable() {
        let task = TaskBuilder::new("t3").build(|| async { Err(TaskError::failed("nope")) });
        assert_eq!((task.run)().await, Err(TaskError::Failed("nope".into())));
        assert_eq!((task.run)().await, Err(TaskError::Failed("nope".into())));
    }
}
