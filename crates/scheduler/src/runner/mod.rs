//! Concurrency manager -- queues, admission, execution, and host signals.
//!
//! Split into focused submodules:
//! - `core`: manager struct, shared state, and the public queue operations
//! - `scheduling`: admission loop and pressure-aware task selection
//! - `execution`: per-task run, settlement, and retry requeue
//! - `signals`: memory-pressure / visibility handling and signal sources

mod core;
mod execution;
mod scheduling;
mod signals;

pub use self::core::ConcurrencyManager;
