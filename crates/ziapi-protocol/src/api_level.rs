//! API levels
//!
//! The API level is negotiated at connect time. Lower levels narrow the set of
//! event kinds a session can receive; there is no second type hierarchy.

use crate::event::EventKind;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
#[serde(into = "u8", try_from = "u8")]
pub enum ApiLevel {
    /// Legacy level (HF2 only)
    V1 = 1,
    V4 = 4,
    V5 = 5,
    #[default]
    V6 = 6,
}

impl ApiLevel {
    /// Highest level this client supports
    pub const MAX: ApiLevel = ApiLevel::V6;

    /// Highest supported level not above `raw`, if any.
    pub fn clamp_from(raw: u8) -> Option<ApiLevel> {
        match raw {
            0 => None,
            1..=3 => Some(ApiLevel::V1),
            4 => Some(ApiLevel::V4),
            5 => Some(ApiLevel::V5),
            _ => Some(ApiLevel::V6),
        }
    }

    /// Whether a session at this level can receive `kind`.
    pub fn supports(self, kind: EventKind) -> bool {
        use EventKind::*;
        match kind {
            DoubleScalar | IntegerScalar | DemodSample | ScopeWave | AuxInSample | DioSample
            | ByteArray | TreeChange => true,
            DoubleScalarTimed | IntegerScalarTimed | ComplexScalar | ByteArrayTimed
            | CounterSample | TriggerSample | VectorData | PwaWave | AsyncReply => {
                self >= ApiLevel::V4
            },
            ScopeWaveEx | SweeperWave | SpectrumWave | AdvisorWave => self >= ApiLevel::V5,
            ImpedanceSample => self >= ApiLevel::V6,
        }
    }

    /// Async commands with reply correlation need level 4+.
    pub fn supports_async(self) -> bool {
        self >= ApiLevel::V4
    }
}

impl fmt::Display for ApiLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp() {
        assert_eq!(ApiLevel::clamp_from(0), None);
        assert_eq!(ApiLevel::clamp_from(3), Some(ApiLevel::V1));
        assert_eq!(ApiLevel::clamp_from(4), Some(ApiLevel::V4));
        assert_eq!(ApiLevel::clamp_from(200), Some(ApiLevel::MAX));
    }

    #[test]
    fn test_narrowing() {
        assert!(ApiLevel::V1.supports(EventKind::DemodSample));
        assert!(!ApiLevel::V1.supports(EventKind::DoubleScalarTimed));
        assert!(!ApiLevel::V1.supports(EventKind::AsyncReply));
        assert!(ApiLevel::V4.supports(EventKind::AsyncReply));
        assert!(!ApiLevel::V4.supports(EventKind::ScopeWaveEx));
        assert!(ApiLevel::V5.supports(EventKind::ScopeWaveEx));
        assert!(!ApiLevel::V5.supports(EventKind::ImpedanceSample));
        assert!(ApiLevel::V6.supports(EventKind::ImpedanceSample));
        assert!(!ApiLevel::V1.supports_async());
    }
}
