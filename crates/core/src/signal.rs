//! Host signals consumed by the scheduler and the other managers.
//!
//! The host application owns the actual sources (OS memory notifications,
//! window visibility) and forwards them as [`HostSignal`] values over a
//! broadcast channel. Nothing in this workspace subscribes to a platform
//! event source directly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Coarse memory headroom reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    /// Plenty of headroom. All priorities admitted.
    #[default]
    Low,
    /// Background work is shed, low-priority work starves.
    Medium,
    /// Only high-priority work is admitted.
    High,
}

impl MemoryPressure {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryPressure::Low => "low",
            MemoryPressure::Medium => "medium",
            MemoryPressure::High => "high",
        }
    }

    /// Concurrency cap imposed while at this level. `None` means the
    /// configured limit applies unchanged.
    pub fn concurrency_cap(&self) -> Option<usize> {
        match self {
            MemoryPressure::Low => None,
            MemoryPressure::Medium => Some(3),
            MemoryPressure::High => Some(2),
        }
    }
}

impl fmt::Display for MemoryPressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps both our own level names and the native strings reported by
/// common hosts (`nominal`, `warn`, `critical`, ...) onto the 3-value scale.
impl FromStr for MemoryPressure {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "normal" | "nominal" | "none" => Ok(MemoryPressure::Low),
            "medium" | "moderate" | "warn" | "warning" | "fair" => Ok(MemoryPressure::Medium),
            "high" | "critical" | "urgent" | "serious" => Ok(MemoryPressure::High),
            other => Err(CoreError::UnknownPressureLevel(other.to_string())),
        }
    }
}

/// An externally delivered host event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum HostSignal {
    MemoryPressure(MemoryPressure),
    /// `true` when the page/window became visible.
    Visibility(bool),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_levels_map_onto_scale() {
        assert_eq!("nominal".parse::<MemoryPressure>().unwrap(), MemoryPressure::Low);
        assert_eq!("moderate".parse::<MemoryPressure>().unwrap(), MemoryPressure::Medium);
        assert_eq!("WARN".parse::<MemoryPressure>().unwrap(), MemoryPressure::Medium);
        assert_eq!(" critical ".parse::<MemoryPressure>().unwrap(), MemoryPressure::High);
        assert_eq!("high".parse::<MemoryPressure>().unwrap(), MemoryPressure::High);
    }

    #[test]
    fn unknown_level_is_rejected() {
        let err = "purple".parse::<MemoryPressure>().unwrap_err();
        assert_eq!(err, CoreError::UnknownPressureLevel("purple".into()));
    }

    #[test]
    fn caps_per_level() {
        assert_eq!(MemoryPressure::Low.concurrency_cap(), None);
        assert_eq!(MemoryPressure::Medium.concurrency_cap(), Some(3));
        assert_eq!(MemoryPressure::High.concurrency_cap(), Some(2));
    }

    #[test]
    fn host_signal_json_shape() {
        let signal = HostSignal::MemoryPressure(MemoryPressure::High);
        let json = serde_json::to_string(&signal).unwrap();
        assert_eq!(json, r#"{"type":"memory_pressure","value":"high"}"#);
        let back: HostSignal =
            serde_json::from_str(r#"{"type":"visibility","value":false}"#).unwrap();
        assert_eq!(back, HostSignal::Visibility(false));
    }
}
