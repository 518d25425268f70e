//! Events
//!
//! An [`Event`] is one message of the data stream: a node path plus a typed
//! [`Payload`]. The payload is a closed sum type, so reading it under the
//! wrong kind is impossible; accessors return `None` instead.

use crate::path::NodePath;
use crate::samples::*;
use crate::waves::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Event kind with its wire code
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize,
)]
#[repr(u16)]
pub enum EventKind {
    DoubleScalar = 1,
    IntegerScalar = 2,
    DemodSample = 3,
    AuxInSample = 5,
    DioSample = 6,
    ByteArray = 7,
    PwaWave = 8,
    DoubleScalarTimed = 32,
    IntegerScalarTimed = 33,
    ComplexScalar = 34,
    ScopeWave = 35,
    ScopeWaveEx = 36,
    ByteArrayTimed = 38,
    CounterSample = 46,
    TriggerSample = 47,
    TreeChange = 48,
    AsyncReply = 50,
    SweeperWave = 64,
    SpectrumWave = 65,
    AdvisorWave = 66,
    VectorData = 67,
    ImpedanceSample = 68,
}

impl EventKind {
    /// Kinds carrying streamed node data (as opposed to control notifications).
    pub fn is_data(self) -> bool {
        !matches!(self, EventKind::AsyncReply | EventKind::TreeChange)
    }
}

/// Typed event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    DoubleScalar(Vec<f64>),
    DoubleScalarTimed(Vec<DoubleSample>),
    IntegerScalar(Vec<i64>),
    IntegerScalarTimed(Vec<IntegerSample>),
    ComplexScalar(Vec<ComplexSample>),
    DemodSample(Vec<DemodSample>),
    AuxInSample(Vec<AuxInSample>),
    DioSample(Vec<DioSample>),
    CounterSample(Vec<CounterSample>),
    TriggerSample(Vec<TriggerSample>),
    ByteArray(Vec<u8>),
    ByteArrayTimed(Vec<ByteArraySample>),
    VectorData(Vec<VectorData>),
    ScopeWave(Vec<ScopeWave>),
    PwaWave(Vec<PwaWave>),
    SweeperWave(Vec<SweeperWave>),
    SpectrumWave(Vec<SpectrumWave>),
    AdvisorWave(Vec<AdvisorWave>),
    ImpedanceSample(Vec<ImpedanceSample>),
    AsyncReply(Vec<AsyncReply>),
    TreeChange(Vec<TreeChange>),
}

macro_rules! payload_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> Option<&[$ty]> {
            match self {
                Payload::$variant(v) => Some(v),
                _ => None,
            }
        }
    };
}

impl Payload {
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::DoubleScalar(_) => EventKind::DoubleScalar,
            Payload::DoubleScalarTimed(_) => EventKind::DoubleScalarTimed,
            Payload::IntegerScalar(_) => EventKind::IntegerScalar,
            Payload::IntegerScalarTimed(_) => EventKind::IntegerScalarTimed,
            Payload::ComplexScalar(_) => EventKind::ComplexScalar,
            Payload::DemodSample(_) => EventKind::DemodSample,
            Payload::AuxInSample(_) => EventKind::AuxInSample,
            Payload::DioSample(_) => EventKind::DioSample,
            Payload::CounterSample(_) => EventKind::CounterSample,
            Payload::TriggerSample(_) => EventKind::TriggerSample,
            Payload::ByteArray(_) => EventKind::ByteArray,
            Payload::ByteArrayTimed(_) => EventKind::ByteArrayTimed,
            Payload::VectorData(_) => EventKind::VectorData,
            Payload::ScopeWave(waves) => {
                if waves.iter().any(|w| w.revision == ScopeRevision::Extended) {
                    EventKind::ScopeWaveEx
                } else {
                    EventKind::ScopeWave
                }
            },
            Payload::PwaWave(_) => EventKind::PwaWave,
            Payload::SweeperWave(_) => EventKind::SweeperWave,
            Payload::SpectrumWave(_) => EventKind::SpectrumWave,
            Payload::AdvisorWave(_) => EventKind::AdvisorWave,
            Payload::ImpedanceSample(_) => EventKind::ImpedanceSample,
            Payload::AsyncReply(_) => EventKind::AsyncReply,
            Payload::TreeChange(_) => EventKind::TreeChange,
        }
    }

    /// Number of values carried
    pub fn len(&self) -> usize {
        match self {
            Payload::DoubleScalar(v) => v.len(),
            Payload::DoubleScalarTimed(v) => v.len(),
            Payload::IntegerScalar(v) => v.len(),
            Payload::IntegerScalarTimed(v) => v.len(),
            Payload::ComplexScalar(v) => v.len(),
            Payload::DemodSample(v) => v.len(),
            Payload::AuxInSample(v) => v.len(),
            Payload::DioSample(v) => v.len(),
            Payload::CounterSample(v) => v.len(),
            Payload::TriggerSample(v) => v.len(),
            Payload::ByteArray(v) => v.len(),
            Payload::ByteArrayTimed(v) => v.len(),
            Payload::VectorData(v) => v.len(),
            Payload::ScopeWave(v) => v.len(),
            Payload::PwaWave(v) => v.len(),
            Payload::SweeperWave(v) => v.len(),
            Payload::SpectrumWave(v) => v.len(),
            Payload::AdvisorWave(v) => v.len(),
            Payload::ImpedanceSample(v) => v.len(),
            Payload::AsyncReply(v) => v.len(),
            Payload::TreeChange(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    payload_accessor!(as_doubles, DoubleScalar, f64);
    payload_accessor!(as_double_samples, DoubleScalarTimed, DoubleSample);
    payload_accessor!(as_integers, IntegerScalar, i64);
    payload_accessor!(as_integer_samples, IntegerScalarTimed, IntegerSample);
    payload_accessor!(as_complex, ComplexScalar, ComplexSample);
    payload_accessor!(as_demod, DemodSample, DemodSample);
    payload_accessor!(as_auxin, AuxInSample, AuxInSample);
    payload_accessor!(as_dio, DioSample, DioSample);
    payload_accessor!(as_counter, CounterSample, CounterSample);
    payload_accessor!(as_trigger, TriggerSample, TriggerSample);
    payload_accessor!(as_bytes, ByteArray, u8);
    payload_accessor!(as_byte_samples, ByteArrayTimed, ByteArraySample);
    payload_accessor!(as_vector, VectorData, VectorData);
    payload_accessor!(as_scope, ScopeWave, ScopeWave);
    payload_accessor!(as_pwa, PwaWave, PwaWave);
    payload_accessor!(as_sweeper, SweeperWave, SweeperWave);
    payload_accessor!(as_spectrum, SpectrumWave, SpectrumWave);
    payload_accessor!(as_advisor, AdvisorWave, AdvisorWave);
    payload_accessor!(as_impedance, ImpedanceSample, ImpedanceSample);
    payload_accessor!(as_async_replies, AsyncReply, AsyncReply);
    payload_accessor!(as_tree_changes, TreeChange, TreeChange);

    /// Keep only the last `n` values (no-op for shorter payloads).
    pub fn truncate_front(&mut self, n: usize) {
        fn keep_tail<T>(v: &mut Vec<T>, n: usize) {
            if v.len() > n {
                v.drain(..v.len() - n);
            }
        }
        match self {
            Payload::DoubleScalar(v) => keep_tail(v, n),
            Payload::DoubleScalarTimed(v) => keep_tail(v, n),
            Payload::IntegerScalar(v) => keep_tail(v, n),
            Payload::IntegerScalarTimed(v) => keep_tail(v, n),
            Payload::ComplexScalar(v) => keep_tail(v, n),
            Payload::DemodSample(v) => keep_tail(v, n),
            Payload::AuxInSample(v) => keep_tail(v, n),
            Payload::DioSample(v) => keep_tail(v, n),
            Payload::CounterSample(v) => keep_tail(v, n),
            Payload::TriggerSample(v) => keep_tail(v, n),
            Payload::ByteArray(v) => keep_tail(v, n),
            Payload::ByteArrayTimed(v) => keep_tail(v, n),
            Payload::VectorData(v) => keep_tail(v, n),
            Payload::ScopeWave(v) => keep_tail(v, n),
            Payload::PwaWave(v) => keep_tail(v, n),
            Payload::SweeperWave(v) => keep_tail(v, n),
            Payload::SpectrumWave(v) => keep_tail(v, n),
            Payload::AdvisorWave(v) => keep_tail(v, n),
            Payload::ImpedanceSample(v) => keep_tail(v, n),
            Payload::AsyncReply(v) => keep_tail(v, n),
            Payload::TreeChange(v) => keep_tail(v, n),
        }
    }
}

/// One event of the data stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub path: NodePath,
    pub payload: Payload,
}

impl Event {
    pub fn new(path: NodePath, payload: Payload) -> Self {
        Self { path, payload }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn count(&self) -> usize {
        self.payload.len()
    }
}
