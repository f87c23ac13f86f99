use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use liftlog_core::{MemoryPressure, SchedulerConfig};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::handle::{OutputSlot, TaskHandle};
use crate::stats::{Counters, PriorityStats, SchedulerStats};
use crate::task::{Task, TaskBuilder, TaskError, TaskOutcome};
use crate::types::{effective_limit, Priority};

/// A task that has been admitted and holds a concurrency slot.
pub(super) struct RunningTask {
    /// Distinguishes this admission from a later one reusing the same id.
    pub run_id: u64,
    pub priority: Priority,
    pub tags: HashSet<String>,
    pub started: Instant,
    pub completion: Option<oneshot::Sender<TaskOutcome>>,
}

impl RunningTask {
    pub fn notify(&mut self, outcome: TaskOutcome) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// All mutable scheduler state. Guarded by one mutex that is never held
/// across an await point.
pub(super) struct SchedulerState {
    pub queues: [VecDeque<Task>; 3],
    pub running: HashMap<String, RunningTask>,
    /// Admissions cancelled while running; their eventual result is dropped.
    pub cancelled_runs: HashSet<u64>,
    pub counters: Counters,
    pub configured_limit: usize,
    pub limit: usize,
    pub paused: bool,
    pub visible: bool,
    pub pressure: MemoryPressure,
    pub destroyed: bool,
    pub next_run_id: u64,
}

impl SchedulerState {
    fn new(limit: usize) -> Self {
        Self {
            queues: Default::default(),
            running: HashMap::new(),
            cancelled_runs: HashSet::new(),
            counters: Counters::default(),
            configured_limit: limit,
            limit,
            paused: false,
            visible: true,
            pressure: MemoryPressure::Low,
            destroyed: false,
            next_run_id: 0,
        }
    }

    pub fn is_queued(&self, id: &str) -> bool {
        self.queues.iter().any(|q| q.iter().any(|t| t.id == id))
    }

    fn queued_count(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Remove a task from whichever bucket holds it.
    pub fn take_queued(&mut self, id: &str) -> Option<Task> {
        for queue in self.queues.iter_mut() {
            if let Some(pos) = queue.iter().position(|t| t.id == id) {
                return queue.remove(pos);
            }
        }
        None
    }

    pub fn cancel_running(&mut self, id: &str) -> bool {
        let Some(mut entry) = self.running.remove(id) else {
            return false;
        };
        self.cancelled_runs.insert(entry.run_id);
        self.counters.record_cancelled(entry.priority);
        entry.notify(TaskOutcome::Cancelled);
        debug!(task_id = %id, "cancelled running task");
        true
    }

    pub fn cancel_queued(&mut self, id: &str) -> bool {
        let Some(mut task) = self.take_queued(id) else {
            return false;
        };
        self.counters.record_cancelled(task.priority);
        task.notify(TaskOutcome::Cancelled);
        debug!(task_id = %id, "cancelled queued task");
        true
    }

    fn snapshot(&self) -> SchedulerStats {
        let mut by_priority: BTreeMap<Priority, PriorityStats> = Priority::ALL
            .iter()
            .map(|&p| {
                let i = p.index();
                let stats = PriorityStats {
                    queued: self.queues[i].len(),
                    running: 0,
                    completed: self.counters.completed[i],
                    failed: self.counters.failed[i],
                    cancelled: self.counters.cancelled[i],
                    retried: self.counters.retried[i],
                };
                (p, stats)
            })
            .collect();

        let mut running: Vec<(&String, &RunningTask)> = self.running.iter().collect();
        running.sort_by_key(|(_, r)| r.run_id);
        for (_, r) in &running {
            if let Some(stats) = by_priority.get_mut(&r.priority) {
                stats.running += 1;
            }
        }

        SchedulerStats {
            total_enqueued: self.counters.total_enqueued,
            running: self.running.len(),
            queued: self.queued_count(),
            completed: self.counters.completed.iter().sum(),
            failed: self.counters.failed.iter().sum(),
            cancelled: self.counters.cancelled.iter().sum(),
            retried: self.counters.retried.iter().sum(),
            by_priority,
            running_task_ids: running.into_iter().map(|(id, _)| id.clone()).collect(),
            queued_task_ids: self
                .queues
                .iter()
                .flat_map(|q| q.iter().map(|t| t.id.clone()))
                .collect(),
            memory_pressure: self.pressure,
            concurrency_limit: self.limit,
            configured_limit: self.configured_limit,
            paused: self.paused,
            visible: self.visible,
            average_execution_ms: self.counters.average_execution().as_secs_f64() * 1000.0,
        }
    }
}

pub(super) struct Shared {
    pub state: Mutex<SchedulerState>,
}

/// Priority task scheduler with bounded concurrency.
///
/// Cheap to clone; clones share one queue set and one admission budget.
/// Must be used from within a tokio runtime, since admitted tasks are
/// spawned onto it.
#[derive(Clone)]
pub struct ConcurrencyManager {
    pub(super) shared: Arc<Shared>,
}

impl ConcurrencyManager {
    /// Create a manager admitting at most `max_concurrent_tasks` at once.
    pub fn new(config: &SchedulerConfig) -> Self {
        Self::with_limit(config.max_concurrent_tasks)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::new(limit)),
            }),
        }
    }

    pub(super) fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a task and try to admit it right away.
    ///
    /// Returns the task id. A task whose id is already queued or running is
    /// dropped without replacing the existing one.
    pub fn enqueue(&self, mut task: Task) -> String {
        let id = task.id.clone();
        {
            let mut state = self.state();
            if state.destroyed {
                warn!(task_id = %id, "enqueue after destroy ignored");
                task.notify(TaskOutcome::Rejected(TaskError::ShutDown));
                return id;
            }
            if state.running.contains_key(&id) || state.is_queued(&id) {
                warn!(task_id = %id, "task already queued or running, ignoring duplicate");
                task.notify(TaskOutcome::Rejected(TaskError::Duplicate(id.clone())));
                return id;
            }
            debug!(task_id = %id, priority = %task.priority, "task enqueued");
            state.counters.total_enqueued += 1;
            state.queues[task.priority.index()].push_back(task);
        }
        self.process_queue();
        id
    }

    /// Queue a value-producing task and return a handle to await it.
    ///
    /// The body runs once per attempt; only the final outcome reaches the
    /// handle.
    pub fn enqueue_with_handle<T, F, Fut>(&self, builder: TaskBuilder, run: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let output: OutputSlot<T> = Arc::new(Mutex::new(None));
        let writer = Arc::clone(&output);
        let mut task = builder.build(move || {
            let attempt = run();
            let writer = Arc::clone(&writer);
            async move {
                let value = attempt.await?;
                *writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
                Ok(())
            }
        });

        let (tx, rx) = oneshot::channel();
        task.completion = Some(tx);
        let id = self.enqueue(task);
        TaskHandle::new(id, rx, output)
    }

    /// Cancel a running or queued task. Returns whether it was found.
    ///
    /// A running task's future keeps going in the background; only its slot
    /// is released and its result discarded. The admission is remembered
    /// until that future settles, so a `run()` that never finishes is held
    /// until [`destroy`](Self::destroy) unless the task sets a timeout.
    pub fn cancel(&self, id: &str) -> bool {
        let found = {
            let mut state = self.state();
            state.cancel_running(id) || state.cancel_queued(id)
        };
        if found {
            self.process_queue();
        }
        found
    }

    /// Cancel every running and queued task carrying `tag`.
    ///
    /// Running tasks are treated as in [`cancel`](Self::cancel).
    pub fn cancel_by_tag(&self, tag: &str) -> usize {
        let cancelled = {
            let mut state = self.state();
            let running: Vec<String> = state
                .running
                .iter()
                .filter(|(_, r)| r.tags.contains(tag))
                .map(|(id, _)| id.clone())
                .collect();
            let queued: Vec<String> = state
                .queues
                .iter()
                .flat_map(|q| q.iter().filter(|t| t.has_tag(tag)).map(|t| t.id.clone()))
                .collect();

            let mut count = 0;
            for id in &running {
                if state.cancel_running(id) {
                    count += 1;
                }
            }
            for id in &queued {
                if state.cancel_queued(id) {
                    count += 1;
                }
            }
            count
        };
        if cancelled > 0 {
            debug!(tag, cancelled, "cancelled tasks by tag");
            self.process_queue();
        }
        cancelled
    }

    /// Move a queued task to another priority bucket. Running tasks are
    /// unaffected and return `false`.
    pub fn prioritize(&self, id: &str, priority: Priority) -> bool {
        {
            let mut state = self.state();
            let Some(mut task) = state.take_queued(id) else {
                return false;
            };
            debug!(task_id = %id, from = %task.priority, to = %priority, "task reprioritized");
            task.priority = priority;
            state.queues[priority.index()].push_back(task);
        }
        self.process_queue();
        true
    }

    /// Change the configured admission bound. Under memory pressure the
    /// pressure cap still applies on top of it.
    pub fn set_concurrency_limit(&self, limit: usize) {
        {
            let mut state = self.state();
            state.configured_limit = limit;
            state.limit = effective_limit(limit, state.pressure);
            info!(configured = limit, effective = state.limit, "concurrency limit changed");
        }
        self.process_queue();
    }

    /// Stop admitting new tasks. Running tasks continue.
    pub fn pause(&self) {
        self.state().paused = true;
        info!("scheduler paused");
    }

    pub fn resume(&self) {
        self.state().paused = false;
        info!("scheduler resumed");
        self.process_queue();
    }

    /// Snapshot of the current scheduler state.
    pub fn stats(&self) -> SchedulerStats {
        self.state().snapshot()
    }

    /// Cancel all outstanding work and clear every queue, set, and counter.
    ///
    /// Idempotent. Later enqueues are rejected with [`TaskError::ShutDown`].
    pub fn destroy(&self) {
        let mut state = self.state();
        let running: Vec<String> = state.running.keys().cloned().collect();
        let queued: Vec<String> = state
            .queues
            .iter()
            .flat_map(|q| q.iter().map(|t| t.id.clone()))
            .collect();

        state.destroyed = true;
        for id in &running {
            state.cancel_running(id);
        }
        for id in &queued {
            state.cancel_queued(id);
        }

        state.queues.iter_mut().for_each(VecDeque::clear);
        state.running.clear();
        state.cancelled_runs.clear();
        state.counters = Counters::default();

        if !running.is_empty() || !queued.is_empty() {
            info!(running = running.len(), queued = queued.len(), "scheduler destroyed");
        }
    }
}

impl Default for ConcurrencyManager {
    fn default() -> Self {
        Self::new(&SchedulerConfig::default())
    }
}

impl std::fmt::Debug for ConcurrencyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ConcurrencyManager")
            .field("running", &state.running.len())
            .field("queued", &state.queued_count())
            .field("limit", &state.limit)
            .field("pressure", &state.pressure)
            .finish()
    }
}
