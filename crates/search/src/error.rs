use liftlog_scheduler::TaskError;
use serde::Serialize;

/// Errors surfaced by search, indexing, and prefetch.
///
/// `Clone` because one engine call's outcome is shared with every
/// deduplicated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SearchError {
    #[error("search aborted")]
    Aborted,

    #[error("search cancelled")]
    Cancelled,

    #[error("search engine error: {0}")]
    Engine(String),

    #[error("indexing failed: {0}")]
    Index(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),
}

impl SearchError {
    /// True when the caller (or a newer search) stopped this one. Such
    /// errors are expected and never shown to the user.
    pub fn is_abort(&self) -> bool {
        matches!(self, SearchError::Aborted | SearchError::Cancelled)
    }
}

impl From<TaskError> for SearchError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Cancelled => SearchError::Cancelled,
            TaskError::Aborted => SearchError::Aborted,
            TaskError::Failed(msg) => SearchError::Engine(msg),
            TaskError::Panicked(msg) => SearchError::Engine(format!("engine panicked: {msg}")),
            err @ TaskError::TimedOut(_) => SearchError::Engine(err.to_string()),
            err @ (TaskError::Duplicate(_) | TaskError::ShutDown) => {
                SearchError::Scheduler(err.to_string())
            }
        }
    }
}

impl From<SearchError> for TaskError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Aborted => TaskError::Aborted,
            SearchError::Cancelled => TaskError::Cancelled,
            SearchError::Engine(msg) | SearchError::Index(msg) | SearchError::Scheduler(msg) => {
                TaskError::Failed(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn cancellations_are_aborts() {
        assert!(SearchError::from(TaskError::Aborted).is_abort());
        assert!(SearchError::from(TaskError::Cancelled).is_abort());
        assert!(!SearchError::Engine("x".into()).is_abort());
    }

    #[test]
    fn engine_message_survives_task_boundary() {
        let task_err = TaskError::from(SearchError::Engine("index missing".into()));
        assert_eq!(SearchError::from(task_err), SearchError::Engine("index missing".into()));
    }

    #[test]
    fn scheduler_failures_map_to_scheduler_variant() {
        assert!(matches!(SearchError::from(TaskError::ShutDown), SearchError::Scheduler(_)));
        assert!(matches!(
            SearchError::from(TaskError::TimedOut(Duration::from_secs(1))),
            SearchError::Engine(_)
        ));
    }
}
