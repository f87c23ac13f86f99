pub mod config;
pub mod error;
pub mod signal;

pub use config::{CacheConfig, Config, PredictiveConfig, SchedulerConfig, SearchConfig};
pub use error::CoreError;
pub use signal::{HostSignal, MemoryPressure};
