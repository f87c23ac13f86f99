use std::collections::BTreeMap;
use std::time::Duration;

use liftlog_core::MemoryPressure;
use serde::{Deserialize, Serialize};

use crate::types::Priority;

/// Per-priority counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityStats {
    pub queued: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retried: u64,
}

/// Read-only scheduler snapshot exposed to dashboards and developer tooling.
///
/// Rebuilt from live state on every [`stats`](crate::ConcurrencyManager::stats)
/// call; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Tasks accepted since construction (duplicates excluded).
    pub total_enqueued: u64,
    pub running: usize,
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Failed attempts that were requeued.
    pub retried: u64,
    pub by_priority: BTreeMap<Priority, PriorityStats>,
    /// Running task ids in admission order.
    pub running_task_ids: Vec<String>,
    /// Queued task ids in admission order (high bucket first).
    pub queued_task_ids: Vec<String>,
    pub memory_pressure: MemoryPressure,
    /// Admission bound currently in force.
    pub concurrency_limit: usize,
    /// Bound restored when memory pressure returns to low.
    pub configured_limit: usize,
    pub paused: bool,
    pub visible: bool,
    /// Mean wall time of successful tasks, in milliseconds.
    pub average_execution_ms: f64,
}

/// Cumulative counters owned by the scheduler state.
#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
    pub total_enqueued: u64,
    pub completed: [u64; 3],
    pub failed: [u64; 3],
    pub cancelled: [u64; 3],
    pub retried: [u64; 3],
    executions: u64,
    avg_duration: Duration,
}

impl Counters {
    /// Record a successful execution.
    pub fn record_completed(&mut self, priority: Priority, duration: Duration) {
        self.completed[priority.index()] += 1;
        self.executions += 1;

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_duration = if self.executions == 1 {
            duration
        } else {
            let prev_nanos = self.avg_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / self.executions as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    pub fn record_failed(&mut self, priority: Priority) {
        self.failed[priority.index()] += 1;
    }

    pub fn record_cancelled(&mut self, priority: Priority) {
        self.cancelled[priority.index()] += 1;
    }

    pub fn record_retry(&mut self, priority: Priority) {
        self.retried[priority.index()] += 1;
    }

    pub fn average_execution(&self) -> Duration {
        self.avg_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_execution() {
        let mut c = Counters::default();
        c.record_completed(Priority::High, Duration::from_millis(100));

        assert_eq!(c.completed, [1, 0, 0]);
        assert_eq!(c.average_execution(), Duration::from_millis(100));
    }

    #[test]
    fn record_multiple_executions_averages() {
        let mut c = Counters::default();
        c.record_completed(Priority::Normal, Duration::from_millis(100));
        c.record_completed(Priority::Low, Duration::from_millis(200));

        assert_eq!(c.completed, [0, 1, 1]);
        // Average of 100ms and 200ms = 150ms
        let avg = c.average_execution().as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn failures_do_not_touch_average() {
        let mut c = Counters::default();
        c.record_failed(Priority::Low);
        c.record_cancelled(Priority::Low);
        c.record_retry(Priority::Low);
        assert_eq!(c.failed[2], 1);
        assert_eq!(c.cancelled[2], 1);
        assert_eq!(c.retried[2], 1);
        assert_eq!(c.average_execution(), Duration::ZERO);
    }

    #[test]
    fn stats_serialize_priority_keys() {
        let mut by_priority = BTreeMap::new();
        by_priority.insert(Priority::High, PriorityStats { queued: 2, ..Default::default() });
        let stats = SchedulerStats {
            total_enqueued: 2,
            running: 0,
            queued: 2,
            completed: 0,
            failed: 0,
            cancelled: 0,
            retried: 0,
            by_priority,
            running_task_ids: vec![],
            queued_task_ids: vec!["a".into(), "b".into()],
            memory_pressure: MemoryPressure::Medium,
            concurrency_limit: 3,
            configured_limit: 4,
            paused: false,
            visible: true,
            average_execution_ms: 0.0,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["by_priority"]["high"]["queued"], 2);
        assert_eq!(json["memory_pressure"], "medium");
    }
}
