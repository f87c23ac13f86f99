use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::task::{Task, TaskError, TaskOutcome};

use super::ConcurrencyManager;

impl ConcurrencyManager {
    /// Run one admission of `task` and settle its result.
    pub(super) async fn run_task(&self, run_id: u64, task: Task) {
        let result = if task.signal.as_ref().is_some_and(|s| s.is_cancelled()) {
            Err(TaskError::Aborted)
        } else {
            let attempt = AssertUnwindSafe((task.run)()).catch_unwind();
            let outcome = match task.timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt).await {
                    Ok(outcome) => outcome,
                    Err(_) => Ok(Err(TaskError::TimedOut(limit))),
                },
                None => attempt.await,
            };
            outcome.unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(&*panic))))
        };

        self.settle(run_id, task, result);
        self.process_queue();
    }

    /// Record the result of an admission and release its slot.
    fn settle(&self, run_id: u64, mut task: Task, result: Result<(), TaskError>) {
        let mut state = self.state();

        if state.cancelled_runs.remove(&run_id) {
            debug!(task_id = %task.id, "dropping result of cancelled task");
            return;
        }
        let Some(mut entry) = state.running.remove(&task.id) else {
            // Cleared by destroy while running.
            return;
        };
        if entry.run_id != run_id {
            state.running.insert(task.id.clone(), entry);
            return;
        }

        let elapsed = entry.started.elapsed();
        match result {
            Ok(()) => {
                debug!(task_id = %task.id, ?elapsed, "task completed");
                state.counters.record_completed(task.priority, elapsed);
                entry.notify(TaskOutcome::Completed);
            }
            Err(TaskError::Aborted) => {
                debug!(task_id = %task.id, "task aborted by its signal");
                state.counters.record_cancelled(task.priority);
                entry.notify(TaskOutcome::Aborted);
            }
            Err(err) if task.can_retry() => {
                task.attempts += 1;
                warn!(
                    task_id = %task.id,
                    attempt = task.attempts,
                    max_retries = task.max_retries,
                    error = %err,
                    "task failed, requeueing"
                );
                state.counters.record_retry(task.priority);
                task.completion = entry.completion.take();
                state.queues[task.priority.index()].push_front(task);
            }
            Err(err) => {
                warn!(
                    task_id = %task.id,
                    attempts = task.attempts + 1,
                    error = %err,
                    "task failed"
                );
                state.counters.record_failed(task.priority);
                entry.notify(TaskOutcome::Failed(err));
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
