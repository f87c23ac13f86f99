//! `simulate`: synthetic load for watching the scheduler react.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use liftlog_core::{HostSignal, MemoryPressure};
use liftlog_scheduler::{tags, Priority, SchedulerStats, TaskBuilder, TaskError};
use tracing::{info, warn};

use crate::app::App;
use crate::cli::SimulateArgs;

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Deterministic spread of flaky tasks over the run.
fn is_flaky(index: usize, rate: f64) -> bool {
    (index as f64 * 0.618_033_988_75).fract() < rate
}

fn priority_for(index: usize) -> Priority {
    match index % 3 {
        0 => Priority::High,
        1 => Priority::Normal,
        _ => Priority::Low,
    }
}

pub async fn run(app: &App, args: &SimulateArgs) -> Result<SchedulerStats> {
    let scheduler = &app.scheduler;
    if let Some(limit) = args.limit {
        scheduler.set_concurrency_limit(limit);
    }

    let work = Duration::from_millis(args.work_ms);
    let retries = app.config.scheduler.default_max_retries;
    for index in 0..args.tasks {
        let priority = priority_for(index);
        let flaky = is_flaky(index, args.failure_rate);
        let attempts = Arc::new(AtomicU32::new(0));

        let mut builder = TaskBuilder::new(format!("sim-{index:03}"))
            .priority(priority)
            .retry(retries);
        if priority == Priority::Low {
            builder = builder.with_tags([tags::PREFETCH, tags::LOW_PRIORITY]);
        }
        scheduler.enqueue(builder.build(move || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(work).await;
                if flaky && attempt == 0 {
                    Err(TaskError::failed("simulated failure"))
                } else {
                    Ok(())
                }
            }
        }));
    }
    info!(
        tasks = args.tasks,
        limit = scheduler.stats().concurrency_limit,
        "synthetic tasks enqueued"
    );

    if let Some(level) = args.pressure {
        let signals = app.signal_sender();
        let after = Duration::from_millis(args.pressure_after_ms);
        let hold = Duration::from_millis(args.pressure_for_ms);
        let spike = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let levels = [
                HostSignal::MemoryPressure(level),
                HostSignal::MemoryPressure(MemoryPressure::Low),
            ];
            for signal in levels {
                if signals.send(signal).is_err() {
                    warn!(?signal, "no listener for host signal");
                }
                tokio::time::sleep(hold).await;
            }
        });
        spike.await.context("pressure spike task failed")?;
    }

    loop {
        let stats = scheduler.stats();
        if stats.running == 0 && stats.queued == 0 {
            return Ok(stats);
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}
