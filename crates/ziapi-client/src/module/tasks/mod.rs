//! Per-kind worker tasks

mod accumulator;
mod pid_advisor;
mod recorder;
mod scope;
mod settings;
mod spectrum;
mod sweeper;

use super::{ModuleKind, TaskContext};
use crate::error::ModuleError;
use ziapi_protocol::{Payload, Timestamp};

pub(super) fn run(ctx: &mut TaskContext<'_>) -> Result<(), ModuleError> {
    match ctx.kind() {
        ModuleKind::Sweeper => sweeper::run(ctx),
        ModuleKind::Recorder | ModuleKind::DataAcquisition => recorder::run(ctx),
        ModuleKind::ScopeAssembler => scope::run(ctx),
        ModuleKind::SpectrumZoomFft => spectrum::run(ctx),
        ModuleKind::PidAdvisor => pid_advisor::run(ctx),
        ModuleKind::DeviceSettings => settings::run(ctx),
        ModuleKind::AwgCompiler | ModuleKind::ImpedanceCompensation | ModuleKind::MultiDeviceSync => {
            accumulator::run(ctx)
        },
    }
}

/// Device timestamps of the first and last sample of `payload`.
pub(crate) fn time_span(payload: &Payload) -> Option<(Timestamp, Timestamp)> {
    fn span<T>(items: &[T], ts: impl Fn(&T) -> Timestamp) -> Option<(Timestamp, Timestamp)> {
        Some((ts(items.first()?), ts(items.last()?)))
    }
    match payload {
        Payload::DoubleScalarTimed(v) => span(v, |s| s.timestamp),
        Payload::IntegerScalarTimed(v) => span(v, |s| s.timestamp),
        Payload::ComplexScalar(v) => span(v, |s| s.timestamp),
        Payload::DemodSample(v) => span(v, |s| s.timestamp),
        Payload::AuxInSample(v) => span(v, |s| s.timestamp),
        Payload::DioSample(v) => span(v, |s| s.timestamp),
        Payload::CounterSample(v) => span(v, |s| s.timestamp),
        Payload::TriggerSample(v) => span(v, |s| s.timestamp),
        Payload::ByteArrayTimed(v) => span(v, |s| s.timestamp),
        Payload::VectorData(v) => span(v, |s| s.timestamp),
        Payload::ScopeWave(v) => span(v, |s| s.timestamp),
        Payload::PwaWave(v) => span(v, |s| s.timestamp),
        Payload::SweeperWave(v) => span(v, |s| s.timestamp),
        Payload::SpectrumWave(v) => span(v, |s| s.timestamp),
        Payload::AdvisorWave(v) => span(v, |s| s.timestamp),
        Payload::ImpedanceSample(v) => span(v, |s| s.timestamp),
        Payload::AsyncReply(v) => span(v, |s| s.timestamp),
        Payload::TreeChange(v) => span(v, |s| s.timestamp),
        Payload::DoubleScalar(_) | Payload::IntegerScalar(_) | Payload::ByteArray(_) => None,
    }
}

/// Span covering all `payloads`.
pub(crate) fn merged_span<'a>(payloads: impl IntoIterator<Item = &'a Payload>) -> (Timestamp, Timestamp) {
    payloads
        .into_iter()
        .filter_map(time_span)
        .fold(None, |acc: Option<(Timestamp, Timestamp)>, (a, b)| match acc {
            None => Some((a, b)),
            Some((lo, hi)) => Some((lo.min(a), hi.max(b))),
        })
        .unwrap_or_default()
}

/// Scalar reading of each sample, used for level triggers.
///
/// Demodulator samples read as their magnitude.
pub(crate) fn scalar_series(payload: &Payload) -> Vec<f64> {
    match payload {
        Payload::DoubleScalar(v) => v.clone(),
        Payload::DoubleScalarTimed(v) => v.iter().map(|s| s.value).collect(),
        Payload::IntegerScalar(v) => v.iter().map(|x| *x as f64).collect(),
        Payload::IntegerScalarTimed(v) => v.iter().map(|s| s.value as f64).collect(),
        Payload::DemodSample(v) => v.iter().map(|s| s.x.hypot(s.y)).collect(),
        Payload::ComplexScalar(v) => v.iter().map(|s| s.real.hypot(s.imag)).collect(),
        Payload::AuxInSample(v) => v.iter().map(|s| s.ch0).collect(),
        Payload::DioSample(v) => v.iter().map(|s| f64::from(s.bits)).collect(),
        Payload::CounterSample(v) => v.iter().map(|s| f64::from(s.counter)).collect(),
        Payload::TriggerSample(v) => v.iter().map(|s| f64::from(s.trigger)).collect(),
        _ => Vec::new(),
    }
}
