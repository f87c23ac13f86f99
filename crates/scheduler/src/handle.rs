use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::task::{TaskError, TaskOutcome};

/// Slot the task body writes its value into before reporting success.
pub(crate) type OutputSlot<T> = Arc<Mutex<Option<T>>>;

/// Awaitable handle to a task enqueued with
/// [`ConcurrencyManager::enqueue_with_handle`](crate::ConcurrencyManager::enqueue_with_handle).
///
/// Dropping the handle does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: String,
    outcome: oneshot::Receiver<TaskOutcome>,
    output: OutputSlot<T>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        id: String,
        outcome: oneshot::Receiver<TaskOutcome>,
        output: OutputSlot<T>,
    ) -> Self {
        Self { id, outcome, output }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the task to settle.
    ///
    /// Retries happen before this resolves; an error here is terminal.
    /// A scheduler torn down underneath the task resolves as
    /// [`TaskError::Cancelled`].
    pub async fn join(self) -> Result<T, TaskError> {
        match self.outcome.await {
            Ok(TaskOutcome::Completed) => self
                .output
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or_else(|| TaskError::failed("task completed without output")),
            Ok(TaskOutcome::Failed(err)) | Ok(TaskOutcome::Rejected(err)) => Err(err),
            Ok(TaskOutcome::Aborted) => Err(TaskError::Aborted),
            Ok(TaskOutcome::Cancelled) | Err(_) => Err(TaskError::Cancelled),
        }
    }
}
