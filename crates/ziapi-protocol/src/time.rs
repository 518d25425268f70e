//! Device timestamps
//!
//! Timestamps are raw tick counts of the device clock. Converting them to
//! seconds needs the device clock base, read from `/<dev>/clockbase`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device tick count (monotonically non-decreasing per device)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn ticks(self) -> u64 {
        self.0
    }

    pub fn to_seconds(self, clockbase: ClockBase) -> f64 {
        self.0 as f64 / clockbase.ticks_per_second()
    }

    /// Elapsed seconds since `earlier`; negative if `earlier` is later.
    pub fn seconds_since(self, earlier: Timestamp, clockbase: ClockBase) -> f64 {
        (self.0 as f64 - earlier.0 as f64) / clockbase.ticks_per_second()
    }

    pub fn saturating_add_ticks(self, ticks: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(ticks))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device clock base (ticks per second)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct ClockBase(f64);

impl ClockBase {
    /// Returns `None` for non-finite or non-positive rates.
    pub fn new(ticks_per_second: f64) -> Option<Self> {
        (ticks_per_second.is_finite() && ticks_per_second > 0.0).then_some(Self(ticks_per_second))
    }

    pub fn ticks_per_second(self) -> f64 {
        self.0
    }

    /// Number of ticks covering `seconds` (rounded to nearest).
    pub fn ticks_for(self, seconds: f64) -> u64 {
        (seconds * self.0).round().max(0.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clockbase_validation() {
        assert!(ClockBase::new(0.0).is_none());
        assert!(ClockBase::new(-1.0).is_none());
        assert!(ClockBase::new(f64::NAN).is_none());
        assert!(ClockBase::new(60e6).is_some());
    }

    #[test]
    fn test_conversion() {
        let cb = ClockBase::new(1_000.0).unwrap();
        assert_eq!(Timestamp(2_500).to_seconds(cb), 2.5);
        assert_eq!(Timestamp(3_000).seconds_since(Timestamp(1_000), cb), 2.0);
        assert_eq!(Timestamp(1_000).seconds_since(Timestamp(3_000), cb), -2.0);
        assert_eq!(cb.ticks_for(0.25), 250);
    }
}
