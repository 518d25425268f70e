//! Waveform payloads
//!
//! Large captures (scope shots, vectors) are split into blocks. Each block
//! carries `sequence_number`, `block_number` and the shot's `total_samples`
//! so the receiver can reassemble in (sequence, block) order.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

// ============================================================================
// Scope
// ============================================================================

/// Scope header revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScopeRevision {
    /// API level 4 header
    #[default]
    Standard,
    /// API level 5+ header, adds per-channel offsets
    Extended,
}

/// Scope sample storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScopeData {
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Float(Vec<f32>),
}

impl ScopeData {
    pub fn len(&self) -> usize {
        match self {
            ScopeData::Int16(v) => v.len(),
            ScopeData::Int32(v) => v.len(),
            ScopeData::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample at `idx` scaled to f64 (no channel scaling applied).
    pub fn get_f64(&self, idx: usize) -> Option<f64> {
        match self {
            ScopeData::Int16(v) => v.get(idx).map(|x| *x as f64),
            ScopeData::Int32(v) => v.get(idx).map(|x| *x as f64),
            ScopeData::Float(v) => v.get(idx).map(|x| *x as f64),
        }
    }

    /// Append another block of the same format; returns false on mismatch.
    pub fn extend_from(&mut self, other: &ScopeData) -> bool {
        match (self, other) {
            (ScopeData::Int16(a), ScopeData::Int16(b)) => a.extend_from_slice(b),
            (ScopeData::Int32(a), ScopeData::Int32(b)) => a.extend_from_slice(b),
            (ScopeData::Float(a), ScopeData::Float(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }
}

/// One scope block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeWave {
    pub revision: ScopeRevision,
    pub timestamp: Timestamp,
    pub trigger_timestamp: Timestamp,
    /// Time between samples in seconds
    pub dt: f64,
    pub channel_enable: [u8; 4],
    pub channel_input: [u8; 4],
    pub trigger_enable: u8,
    pub trigger_input: u8,
    pub channel_bw_limit: [u8; 4],
    pub channel_math: [u8; 4],
    pub channel_scaling: [f32; 4],
    /// Only present with [`ScopeRevision::Extended`]
    pub channel_offset: Option<[f64; 4]>,
    pub sequence_number: u32,
    pub segment_number: u32,
    pub block_number: u32,
    /// Samples per channel of the whole shot
    pub total_samples: u64,
    pub data_transfer_mode: u8,
    pub block_marker: u8,
    pub flags: u8,
    /// Samples per channel in this block
    pub sample_count: u32,
    /// Multi-channel data is interleaved when true
    pub interleaved: bool,
    pub data: ScopeData,
}

impl ScopeWave {
    /// Block marker bit set on the last block of a shot
    pub const BLOCK_MARKER_END: u8 = 0x01;

    /// Number of enabled channels (at least 1).
    pub fn channel_count(&self) -> usize {
        self.channel_enable.iter().filter(|&&e| e != 0).count().max(1)
    }

    pub fn is_last_block(&self) -> bool {
        self.block_marker & Self::BLOCK_MARKER_END != 0
    }
}

// ============================================================================
// Periodic waveform analyser
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PwaSample {
    pub bin_phase: f64,
    pub x: f64,
    pub y: f64,
    pub count_bin: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PwaWave {
    pub timestamp: Timestamp,
    pub sample_count: u64,
    pub input_select: u32,
    pub osc_select: u32,
    pub harmonic: u32,
    pub frequency: f64,
    pub pwa_type: u8,
    /// 0: zoom PWA, 1: harmonic PWA
    pub mode: u8,
    pub overflow: u8,
    pub commensurable: u8,
    pub samples: Vec<PwaSample>,
}

// ============================================================================
// Module result waves
// ============================================================================

/// Average, standard deviation and power of a set of values
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatisticSample {
    pub avg: f64,
    pub stddev: f64,
    pub pwr: f64,
}

impl StatisticSample {
    /// Population statistics; zeroed for an empty input.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let avg = values.iter().sum::<f64>() / n;
        let pwr = values.iter().map(|v| v * v).sum::<f64>() / n;
        let var = values.iter().map(|v| (v - avg) * (v - avg)).sum::<f64>() / n;
        Self {
            avg,
            stddev: var.sqrt(),
            pwr,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweeperDoubleSample {
    pub grid: f64,
    pub bandwidth: f64,
    pub count: u64,
    pub value: StatisticSample,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweeperDemodSample {
    pub grid: f64,
    pub bandwidth: f64,
    pub count: u64,
    pub tc: f64,
    pub tc_meas: f64,
    pub settling: f64,
    pub set_timestamp: Timestamp,
    pub next_timestamp: Timestamp,
    pub x: StatisticSample,
    pub y: StatisticSample,
    pub r: StatisticSample,
    pub phase: StatisticSample,
    pub frequency: StatisticSample,
    pub auxin0: StatisticSample,
    pub auxin1: StatisticSample,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweeperImpedanceSample {
    pub grid: f64,
    pub bandwidth: f64,
    pub count: u64,
    pub settling: f64,
    pub set_timestamp: Timestamp,
    pub next_timestamp: Timestamp,
    pub real_z: StatisticSample,
    pub imag_z: StatisticSample,
    pub abs_z: StatisticSample,
    pub phase_z: StatisticSample,
    pub frequency: StatisticSample,
    pub param0: StatisticSample,
    pub param1: StatisticSample,
    pub drive: StatisticSample,
    pub bias: StatisticSample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SweepMode {
    #[default]
    Sequential,
    Binary,
    Bidirectional,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BandwidthMode {
    Manual,
    #[default]
    Fixed,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SweeperHeader {
    pub sample_count: u64,
    /// Bit 0: phase unwrap, bit 1: sinc filter
    pub flags: u8,
    pub sweep_mode: SweepMode,
    pub bandwidth_mode: BandwidthMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SweeperData {
    Double(Vec<SweeperDoubleSample>),
    Demod(Vec<SweeperDemodSample>),
    Impedance(Vec<SweeperImpedanceSample>),
}

impl SweeperData {
    pub fn len(&self) -> usize {
        match self {
            SweeperData::Double(v) => v.len(),
            SweeperData::Demod(v) => v.len(),
            SweeperData::Impedance(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweeperWave {
    pub timestamp: Timestamp,
    pub header: SweeperHeader,
    pub data: SweeperData,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumDemodSample {
    pub grid: f64,
    /// Filter strength at this grid point
    pub filter: f64,
    pub x: f64,
    pub y: f64,
    pub r: f64,
}

/// FFT window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpectrumWindow {
    Rectangular,
    #[default]
    Hann,
    Hamming,
    BlackmanHarris,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpectrumHeader {
    pub sample_count: u64,
    /// Bit 0: power, bit 1: spectral density, bit 2: absolute frequency, bit 3: full span
    pub flags: u8,
    /// 0: FFT(x+iy), 1: FFT(r), 2: FFT(theta), 3: FFT(freq), 4: FFT(dtheta/dt)/2pi
    pub spectrum_mode: u8,
    pub window: SpectrumWindow,
    pub bandwidth: f64,
    pub rate: f64,
    pub center: f64,
    pub resolution: f64,
    pub aliasing_reject: f64,
    /// Window correction factor for spectral density
    pub nenbw: f64,
    pub overlap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumWave {
    pub timestamp: Timestamp,
    pub header: SpectrumHeader,
    pub data: Vec<SpectrumDemodSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdvisorSample {
    pub grid: f64,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AdvisorFormat {
    #[default]
    Bode,
    Step,
    Impulse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdvisorHeader {
    pub sample_count: u64,
    pub flags: u8,
    pub sample_format: AdvisorFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorWave {
    pub timestamp: Timestamp,
    pub header: AdvisorHeader,
    pub data: Vec<AdvisorSample>,
}

// ============================================================================
// Vector data
// ============================================================================

/// Typed vector elements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VectorElements {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    /// Text vector (no terminator on the wire)
    Ascii(String),
}

impl VectorElements {
    pub fn len(&self) -> usize {
        match self {
            VectorElements::U8(v) => v.len(),
            VectorElements::U16(v) => v.len(),
            VectorElements::U32(v) => v.len(),
            VectorElements::U64(v) => v.len(),
            VectorElements::Float(v) => v.len(),
            VectorElements::Double(v) => v.len(),
            VectorElements::Ascii(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One block of a vector transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorData {
    pub timestamp: Timestamp,
    pub sequence_number: u32,
    pub block_number: u32,
    pub total_elements: u64,
    pub block_offset: u64,
    pub block_elements: u64,
    pub flags: u32,
    pub data: VectorElements,
}

impl VectorData {
    /// Single-block vector holding `data`.
    pub fn single(timestamp: Timestamp, data: VectorElements) -> Self {
        let n = data.len() as u64;
        Self {
            timestamp,
            sequence_number: 0,
            block_number: 0,
            total_elements: n,
            block_offset: 0,
            block_elements: n,
            flags: 0,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics() {
        let stats = StatisticSample::from_values(&[1.0, 3.0]);
        assert_eq!(stats.avg, 2.0);
        assert_eq!(stats.stddev, 1.0);
        assert_eq!(stats.pwr, 5.0);
        assert_eq!(StatisticSample::from_values(&[]), StatisticSample::default());
    }

    #[test]
    fn test_scope_data_extend() {
        let mut a = ScopeData::Int16(vec![1, 2]);
        assert!(a.extend_from(&ScopeData::Int16(vec![3])));
        assert_eq!(a.len(), 3);
        assert!(!a.extend_from(&ScopeData::Float(vec![1.0])));
        assert_eq!(a.get_f64(2), Some(3.0));
    }

    #[test]
    fn test_vector_single() {
        let v = VectorData::single(Timestamp(5), VectorElements::Ascii("abc".into()));
        assert_eq!(v.total_elements, 3);
        assert_eq!(v.block_elements, 3);
    }
}
