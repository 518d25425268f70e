//! Scalar and per-sample payload structures

use crate::path::NodePath;
use crate::result::ResultCode;
use crate::time::Timestamp;
use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Timestamped double value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoubleSample {
    pub timestamp: Timestamp,
    pub value: f64,
}

/// Timestamped integer value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegerSample {
    pub timestamp: Timestamp,
    pub value: i64,
}

/// Timestamped complex value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexSample {
    pub timestamp: Timestamp,
    pub real: f64,
    pub imag: f64,
}

/// Timestamped byte array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteArraySample {
    pub timestamp: Timestamp,
    pub bytes: Vec<u8>,
}

/// Demodulator sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemodSample {
    pub timestamp: Timestamp,
    /// In-phase component
    pub x: f64,
    /// Quadrature component
    pub y: f64,
    /// Oscillator frequency at this sample
    pub frequency: f64,
    /// Oscillator phase at this sample
    pub phase: f64,
    pub dio_bits: u32,
    pub trigger: u32,
    pub aux_in: [f64; 2],
}

impl DemodSample {
    /// Magnitude `sqrt(x² + y²)`
    pub fn r(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Phase angle `atan2(y, x)` in radians
    pub fn theta(&self) -> f64 {
        self.y.atan2(self.x)
    }
}

/// Auxiliary input sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuxInSample {
    pub timestamp: Timestamp,
    pub ch0: f64,
    pub ch1: f64,
}

/// Digital IO sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DioSample {
    pub timestamp: Timestamp,
    pub bits: u32,
}

/// Pulse counter sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSample {
    pub timestamp: Timestamp,
    pub counter: i32,
    pub trigger: u32,
}

/// Trigger sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSample {
    pub timestamp: Timestamp,
    pub sample_tick: u64,
    pub trigger: u32,
    pub missed_triggers: u32,
    pub awg_trigger: u32,
    pub dio: u32,
    pub sequence_index: u32,
}

bitflags! {
    /// Impedance sample status flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ImpedanceFlags: u32 {
        const VALID_INTERNAL = 0x0000_0001;
        const VALID_USER = 0x0000_0002;
        const AUTORANGE_GATING = 0x0000_0004;
        const OVERFLOW_VOLTAGE = 0x0000_0010;
        const OVERFLOW_CURRENT = 0x0000_0020;
        const UNDERFLOW_VOLTAGE = 0x0000_0040;
        const UNDERFLOW_CURRENT = 0x0000_0080;
        const FREQ_EXACT = 0x0000_0100;
        const FREQ_INTERPOLATION = 0x0000_0200;
        const FREQ_EXTRAPOLATION = 0x0000_0400;
        const LOW_DUT_2T = 0x0000_0800;
        const SUPPRESSION_PARAM0 = 0x0000_1000;
        const SUPPRESSION_PARAM1 = 0x0000_2000;
        const FREQLIMIT_RANGE_VOLTAGE = 0x0000_4000;
        const FREQLIMIT_RANGE_CURRENT = 0x0000_8000;
        const STRONG_COMPENSATION_PARAM0 = 0x0001_0000;
        const STRONG_COMPENSATION_PARAM1 = 0x0002_0000;
        const NEGATIVE_QFACTOR = 0x0004_0000;
        const BWC_MASK = 0x00f0_0000;
        const OPEN_DETECTION = 0x0100_0000;
        const OVERFLOW_SIGIN0 = 0x0400_0000;
        const OVERFLOW_SIGIN1 = 0x0800_0000;
        const MODEL_MASK = 0xf000_0000;
    }
}

/// Impedance analyser sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpedanceSample {
    pub timestamp: Timestamp,
    pub real_z: f64,
    pub imag_z: f64,
    pub frequency: f64,
    pub phase: f64,
    pub flags: ImpedanceFlags,
    pub trigger: u32,
    pub param0: f64,
    pub param1: f64,
    pub drive: f64,
    pub bias: f64,
}

impl ImpedanceSample {
    pub fn abs_z(&self) -> f64 {
        self.real_z.hypot(self.imag_z)
    }
}

/// Node tree change action
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize,
)]
#[repr(u32)]
pub enum TreeAction {
    Remove = 0,
    Add = 1,
    Change = 2,
}

/// Node tree change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeChange {
    pub timestamp: Timestamp,
    pub action: TreeAction,
    pub name: String,
}

/// Command kind echoed in an [`AsyncReply`]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize,
)]
#[repr(u16)]
pub enum AsyncCommandKind {
    SetDouble = 1,
    SetInteger = 2,
    SetBytes = 3,
    Subscribe = 4,
    Unsubscribe = 5,
    GetAsEvent = 6,
}

/// Caller-supplied correlation token of an async command
pub type Tag = u32;

/// Outcome of an async command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncReply {
    /// Time the server processed the command
    pub timestamp: Timestamp,
    /// Timestamp of the affected sample, if any
    pub sample_timestamp: Timestamp,
    pub command: AsyncCommandKind,
    pub result: ResultCode,
    pub tag: Tag,
    /// Path the command addressed
    pub path: NodePath,
}
