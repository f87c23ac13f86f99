use tokio::time::Instant;
use tracing::debug;

use crate::task::Task;
use crate::types::eligible_priorities;

use super::core::{RunningTask, SchedulerState};
use super::ConcurrencyManager;

impl SchedulerState {
    /// Pop the next task eligible under the current memory pressure:
    /// highest eligible bucket first, FIFO within a bucket.
    pub(super) fn take_next(&mut self) -> Option<Task> {
        eligible_priorities(self.pressure)
            .iter()
            .find_map(|p| self.queues[p.index()].pop_front())
    }

    /// Whether another task may be admitted right now.
    fn has_capacity(&self) -> bool {
        !self.paused && !self.destroyed && self.running.len() < self.limit
    }

    /// Move `task` into the running set and return its admission id.
    fn admit(&mut self, task: &mut Task) -> u64 {
        self.next_run_id += 1;
        let run_id = self.next_run_id;
        self.running.insert(
            task.id.clone(),
            RunningTask {
                run_id,
                priority: task.priority,
                tags: task.tags.clone(),
                started: Instant::now(),
                completion: task.completion.take(),
            },
        );
        run_id
    }
}

impl ConcurrencyManager {
    /// Admit queued tasks until capacity or eligible work runs out.
    ///
    /// Called after every enqueue, completion, cancellation, priority or
    /// limit change, resume, and host signal. Iterative: admissions are
    /// collected under the lock and spawned after it is released.
    pub(crate) fn process_queue(&self) {
        let admitted = {
            let mut state = self.state();
            let mut admitted = Vec::new();
            while state.has_capacity() {
                let Some(mut task) = state.take_next() else {
                    break;
                };
                let run_id = state.admit(&mut task);
                debug!(
                    task_id = %task.id,
                    priority = %task.priority,
                    attempt = task.attempts + 1,
                    running = state.running.len(),
                    "task admitted"
                );
                admitted.push((run_id, task));
            }
            admitted
        };

        for (run_id, task) in admitted {
            let manager = self.clone();
            tokio::spawn(async move {
                manager.run_task(run_id, task).await;
            });
        }
    }
}
