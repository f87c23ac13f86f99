use std::path::PathBuf;

use clap::{Parser, Subcommand};
use liftlog_core::MemoryPressure;

/// Task scheduling and search caching for liftlog.
///
/// Settings come from the environment (and `.env`); `LIFTLOG_PROFILE`
/// selects a prefixed profile.
#[derive(Parser, Debug)]
#[command(name = "liftlog", version, about = "Task scheduling and search caching for liftlog")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive synthetic tasks through the scheduler and print its stats.
    Simulate(SimulateArgs),
    /// Index an exercise catalog and search it.
    Search(SearchArgs),
    /// Print the resolved configuration.
    Config,
}

#[derive(clap::Args, Debug)]
pub struct SimulateArgs {
    /// Number of tasks to enqueue
    #[arg(long, default_value = "24")]
    pub tasks: usize,

    /// Concurrency limit override (uses MAX_CONCURRENT_TASKS if not set)
    #[arg(long)]
    pub limit: Option<usize>,

    /// Share of tasks whose first attempt fails, between 0 and 1
    #[arg(long, default_value = "0.1", value_parser = parse_rate)]
    pub failure_rate: f64,

    /// Simulated work per task, in milliseconds
    #[arg(long, default_value = "50")]
    pub work_ms: u64,

    /// Report this memory pressure level partway through the run
    #[arg(long)]
    pub pressure: Option<MemoryPressure>,

    /// Delay before the pressure report, in milliseconds
    #[arg(long, default_value = "100")]
    pub pressure_after_ms: u64,

    /// How long the pressure lasts before dropping back to low, in milliseconds
    #[arg(long, default_value = "300")]
    pub pressure_for_ms: u64,
}

#[derive(clap::Args, Debug)]
pub struct SearchArgs {
    /// Queries to run, in order
    #[arg(required = true)]
    pub queries: Vec<String>,

    /// Filter as field=value; values that parse as JSON are used as JSON
    #[arg(long = "filter", short = 'f', value_parser = parse_filter)]
    pub filters: Vec<(String, serde_json::Value)>,

    /// JSON file with an array of exercises (uses the built-in sample if not set)
    #[arg(long, env = "LIFTLOG_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// Number of suggestions to print per query
    #[arg(long, default_value = "5")]
    pub suggestions: usize,
}

fn parse_rate(raw: &str) -> Result<f64, String> {
    let rate: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("{rate} is not between 0 and 1"))
    }
}

fn parse_filter(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got '{raw}'"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("missing field name in '{raw}'"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((field.to_string(), value))
}
