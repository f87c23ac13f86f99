use std::fmt;
use std::str::FromStr;

use liftlog_core::MemoryPressure;
use serde::{Deserialize, Serialize};

/// Task admission priority. Lower numeric value = admitted first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// User-facing work. The only bucket admitted under high memory pressure.
    High = 0,
    #[default]
    Normal = 1,
    /// Background work. Starves under any memory pressure.
    Low = 2,
}

impl Priority {
    /// All priorities in admission order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Bucket index into the scheduler's fixed queue array.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Buckets eligible for admission at the given memory pressure, in the
/// order they are drained.
pub fn eligible_priorities(pressure: MemoryPressure) -> &'static [Priority] {
    match pressure {
        MemoryPressure::High => &[Priority::High],
        MemoryPressure::Medium => &[Priority::High, Priority::Normal],
        MemoryPressure::Low => &Priority::ALL,
    }
}

/// Admission bound after applying the pressure cap to the configured limit.
pub fn effective_limit(configured: usize, pressure: MemoryPressure) -> usize {
    match pressure.concurrency_cap() {
        Some(cap) => configured.min(cap),
        None => configured,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert_eq!(Priority::ALL.map(Priority::index), [0, 1, 2]);
    }

    #[test]
    fn eligibility_low_pressure() {
        assert_eq!(
            eligible_priorities(MemoryPressure::Low),
            &[Priority::High, Priority::Normal, Priority::Low]
        );
    }

    #[test]
    fn eligibility_medium_pressure() {
        assert_eq!(
            eligible_priorities(MemoryPressure::Medium),
            &[Priority::High, Priority::Normal]
        );
    }

    #[test]
    fn eligibility_high_pressure() {
        assert_eq!(eligible_priorities(MemoryPressure::High), &[Priority::High]);
    }

    #[test]
    fn effective_limit_caps_only_downwards() {
        assert_eq!(effective_limit(8, MemoryPressure::Low), 8);
        assert_eq!(effective_limit(8, MemoryPressure::Medium), 3);
        assert_eq!(effective_limit(8, MemoryPressure::High), 2);
        assert_eq!(effective_limit(1, MemoryPressure::High), 1);
    }

    #[test]
    fn parse_priority() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("low".parse::<Priority>().unwrap(), Priority::Low);
        assert!("urgent".parse::<Priority>().is_err());
        assert_eq!(Priority::default(), Priority::Normal);
    }
}
