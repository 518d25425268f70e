//! Sample generation for streaming nodes
//!
//! Each connected device runs a small physical model: the signal output drives
//! a resonator (demodulators see its response), the PID controllers report
//! their error, and the impedance analyser measures an R||C load.

use super::device::SimDeviceConfig;
use super::tree::{NodeTree, NodeValue, StreamKind};
use rand::Rng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::f64::consts::{PI, SQRT_2};
use ziapi_protocol::*;

/// Parameters of the simulated signal chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalModel {
    /// Resonance frequency in Hz
    pub resonance: f64,
    pub quality: f64,
    /// Peak noise amplitude added to every sample
    pub noise: f64,
    /// Load resistance in Ohm
    pub load_r: f64,
    /// Load capacitance in Farad
    pub load_c: f64,
}

impl Default for SignalModel {
    fn default() -> Self {
        Self {
            resonance: 1.0e6,
            quality: 10.0,
            noise: 1e-4,
            load_r: 1.0e3,
            load_c: 1.0e-9,
        }
    }
}

impl SignalModel {
    /// Complex transfer function of the resonator at `freq`.
    pub fn response(&self, freq: f64) -> (f64, f64) {
        if freq <= 0.0 {
            return (0.0, 0.0);
        }
        // H = 1 / (1 + jQ(f/f0 - f0/f))
        let detune = self.quality * (freq / self.resonance - self.resonance / freq);
        let denom = 1.0 + detune * detune;
        (1.0 / denom, -detune / denom)
    }

    /// Load impedance at `freq`.
    pub fn impedance(&self, freq: f64) -> (f64, f64) {
        let wrc = 2.0 * PI * freq * self.load_r * self.load_c;
        let denom = 1.0 + wrc * wrc;
        (self.load_r / denom, -self.load_r * wrc / denom)
    }
}

/// Scope acquisition settings shared by all devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeTiming {
    /// Samples per scope block
    pub block_size: usize,
    /// Generator ticks between two shots
    pub interval_ticks: u64,
}

/// Per-device generator state
#[derive(Debug, Default)]
pub struct DeviceStreams {
    /// Next demod sample time in device ticks, per demod index
    next_demod: HashMap<u8, f64>,
    last_tick: Option<Timestamp>,
    ticks: u64,
    scope_sequence: u32,
    counter: i32,
    dio_phase: u32,
    /// Latest sample per streaming node, served by `GetSample`
    latest: HashMap<NodePath, Payload>,
}

impl DeviceStreams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, path: &NodePath) -> Option<&Payload> {
        self.latest.get(path)
    }

    /// Forget generator state after a reset or disconnect.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Upper bound on demod samples emitted per tick and node
const MAX_DEMOD_BURST: usize = 4096;

struct Ctx<'a> {
    tree: &'a NodeTree,
    serial: &'a str,
    clockbase: f64,
    model: SignalModel,
}

impl Ctx<'_> {
    fn f64(&self, tail: &str) -> f64 {
        self.tree
            .f64_at(&format!("/{}/{}", self.serial, tail))
            .unwrap_or(0.0)
    }

    fn i64(&self, tail: &str) -> i64 {
        self.tree
            .i64_at(&format!("/{}/{}", self.serial, tail))
            .unwrap_or(0)
    }

    fn drive(&self) -> f64 {
        if self.i64("sigouts/0/on") != 0 {
            self.f64("sigouts/0/amplitude")
        } else {
            0.0
        }
    }

    fn demod_frequency(&self, demod: u8) -> f64 {
        let osc = self.i64(&format!("demods/{demod}/oscselect"));
        let harmonic = self.i64(&format!("demods/{demod}/harmonic")).max(1);
        self.f64(&format!("oscs/{osc}/freq")) * harmonic as f64
    }

    fn noise(&self, rng: &mut StdRng) -> f64 {
        if self.model.noise > 0.0 {
            rng.gen_range(-self.model.noise..self.model.noise)
        } else {
            0.0
        }
    }
}

/// Produce the events of one generator tick for device `dev`.
///
/// Only streaming nodes accepted by `wanted` are emitted; the latest sample of
/// every node is kept regardless.
#[allow(clippy::too_many_arguments)]
pub fn generate(
    dev: &SimDeviceConfig,
    tree: &NodeTree,
    state: &mut DeviceStreams,
    now: Timestamp,
    model: SignalModel,
    scope: ScopeTiming,
    rng: &mut StdRng,
    wanted: impl Fn(&NodePath) -> bool,
) -> Vec<Event> {
    let ctx = Ctx {
        tree,
        serial: &dev.serial,
        clockbase: dev.family.clockbase(),
        model,
    };
    let last = state.last_tick.replace(now).unwrap_or(now);
    state.ticks += 1;

    let Ok(prefix) = NodePath::new(&format!("/{}", dev.serial)) else {
        return Vec::new();
    };
    let streams: Vec<(NodePath, StreamKind)> = tree
        .covered(&prefix)
        .filter_map(|(p, e)| match e.value {
            NodeValue::Stream(kind) => Some((p.clone(), kind)),
            _ => None,
        })
        .collect();

    let mut events = Vec::new();
    for (path, kind) in streams {
        let payload = match kind {
            StreamKind::Demod(d) => demod_samples(&ctx, state, d, last, now, rng),
            StreamKind::AuxIn(_) => Some(Payload::AuxInSample(vec![AuxInSample {
                timestamp: now,
                ch0: ctx.drive() * 0.1 + ctx.noise(rng),
                ch1: ctx.noise(rng),
            }])),
            StreamKind::Dio(_) => {
                state.dio_phase = state.dio_phase.wrapping_add(1);
                let bits = ctx.i64("dios/0/output") as u32 ^ (state.dio_phase & 1);
                Some(Payload::DioSample(vec![DioSample {
                    timestamp: now,
                    bits,
                }]))
            },
            StreamKind::PidValue(pid) => pid_value(&ctx, pid, now, rng),
            StreamKind::Counter(_) => (ctx.i64("cnts/0/enable") != 0).then(|| {
                state.counter = state.counter.wrapping_add(1);
                Payload::CounterSample(vec![CounterSample {
                    timestamp: now,
                    counter: state.counter,
                    trigger: 0,
                }])
            }),
            StreamKind::Trigger(_) => (state.ticks % 10 == 0).then(|| {
                Payload::TriggerSample(vec![TriggerSample {
                    timestamp: now,
                    sample_tick: now.ticks(),
                    trigger: 1,
                    missed_triggers: 0,
                    awg_trigger: 0,
                    dio: 0,
                    sequence_index: 0,
                }])
            }),
            StreamKind::Impedance(_) => impedance_sample(&ctx, now, rng),
            StreamKind::Scope(_) => scope_shot(&ctx, state, now, scope),
        };
        let Some(payload) = payload else {
            continue;
        };
        if payload.is_empty() {
            continue;
        }
        state.latest.insert(path.clone(), last_sample(&payload));
        if wanted(&path) {
            events.push(Event::new(path, payload));
        }
    }
    events
}

fn demod_samples(
    ctx: &Ctx<'_>,
    state: &mut DeviceStreams,
    demod: u8,
    last: Timestamp,
    now: Timestamp,
    rng: &mut StdRng,
) -> Option<Payload> {
    if ctx.i64(&format!("demods/{demod}/enable")) == 0 {
        state.next_demod.remove(&demod);
        return None;
    }
    let rate = ctx.f64(&format!("demods/{demod}/rate")).max(1.0);
    let step = ctx.clockbase / rate;
    let next = state.next_demod.entry(demod).or_insert(last.ticks() as f64);

    let freq = ctx.demod_frequency(demod);
    let (hr, hi) = ctx.model.response(freq);
    let amp = ctx.drive() / SQRT_2;
    let shift = ctx.f64(&format!("demods/{demod}/phaseshift")).to_radians();
    let (sin, cos) = shift.sin_cos();
    let x0 = amp * (hr * cos + hi * sin);
    let y0 = amp * (hi * cos - hr * sin);

    let mut samples = Vec::new();
    while *next <= now.ticks() as f64 && samples.len() < MAX_DEMOD_BURST {
        let x = x0 + ctx.noise(rng);
        let y = y0 + ctx.noise(rng);
        samples.push(DemodSample {
            timestamp: Timestamp(*next as u64),
            x,
            y,
            frequency: freq,
            phase: 0.0,
            dio_bits: 0,
            trigger: 0,
            aux_in: [0.0; 2],
        });
        *next += step;
    }
    // Skip samples the burst cap could not cover.
    if *next <= now.ticks() as f64 {
        *next = now.ticks() as f64 + step;
    }
    Some(Payload::DemodSample(samples))
}

fn pid_value(ctx: &Ctx<'_>, pid: u8, now: Timestamp, rng: &mut StdRng) -> Option<Payload> {
    if ctx.i64(&format!("pids/{pid}/enable")) == 0 {
        return None;
    }
    let setpoint = ctx.f64(&format!("pids/{pid}/setpoint"));
    let center = ctx.f64(&format!("pids/{pid}/center"));
    // Settled controller: output tracks the setpoint around its center.
    let value = center + setpoint + ctx.noise(rng);
    Some(Payload::DoubleScalarTimed(vec![DoubleSample {
        timestamp: now,
        value,
    }]))
}

fn impedance_sample(ctx: &Ctx<'_>, now: Timestamp, rng: &mut StdRng) -> Option<Payload> {
    if ctx.i64("imps/0/enable") == 0 {
        return None;
    }
    let freq = ctx.f64("oscs/0/freq");
    let (real_z, imag_z) = ctx.model.impedance(freq);
    Some(Payload::ImpedanceSample(vec![ImpedanceSample {
        timestamp: now,
        real_z: real_z * (1.0 + ctx.noise(rng)),
        imag_z: imag_z * (1.0 + ctx.noise(rng)),
        frequency: freq,
        phase: imag_z.atan2(real_z),
        flags: ImpedanceFlags::VALID_INTERNAL | ImpedanceFlags::VALID_USER,
        trigger: 0,
        param0: real_z,
        param1: -1.0 / (2.0 * PI * freq.max(1.0) * imag_z.min(-f64::MIN_POSITIVE)),
        drive: ctx.drive(),
        bias: 0.0,
    }]))
}

/// One scope shot, split into blocks.
fn scope_shot(
    ctx: &Ctx<'_>,
    state: &mut DeviceStreams,
    now: Timestamp,
    timing: ScopeTiming,
) -> Option<Payload> {
    if ctx.i64("scopes/0/enable") == 0 || state.ticks % timing.interval_ticks.max(1) != 0 {
        return None;
    }
    let length = ctx.i64("scopes/0/length").max(1) as usize;
    let dt = 1.0 / ctx.clockbase;
    let freq = ctx.f64("oscs/0/freq");
    let amp = ctx.drive() as f32;
    let full: Vec<f32> = (0..length)
        .map(|i| amp * (2.0 * PI * freq * i as f64 * dt).sin() as f32)
        .collect();

    state.scope_sequence = state.scope_sequence.wrapping_add(1);
    let block_size = timing.block_size.max(1);
    let block_count = length.div_ceil(block_size);
    let waves = full
        .chunks(block_size)
        .enumerate()
        .map(|(block, data)| ScopeWave {
            revision: ScopeRevision::Extended,
            timestamp: now,
            trigger_timestamp: now,
            dt,
            channel_enable: [1, 0, 0, 0],
            channel_input: [0; 4],
            trigger_enable: 1,
            trigger_input: 0,
            channel_bw_limit: [0; 4],
            channel_math: [0; 4],
            channel_scaling: [1.0; 4],
            channel_offset: Some([0.0; 4]),
            sequence_number: state.scope_sequence,
            segment_number: 0,
            block_number: block as u32,
            total_samples: length as u64,
            data_transfer_mode: 0,
            block_marker: u8::from(block + 1 == block_count),
            flags: 0,
            sample_count: data.len() as u32,
            interleaved: false,
            data: ScopeData::Float(data.to_vec()),
        })
        .collect();
    Some(Payload::ScopeWave(waves))
}

/// Last element of a non-empty payload, used as the node's current sample.
fn last_sample(payload: &Payload) -> Payload {
    let mut last = payload.clone();
    last.truncate_front(1);
    last
}

/// Event announcing a setting change.
pub fn change_event(path: NodePath, value: &Value, now: Timestamp) -> Event {
    let payload = match value {
        Value::Double(v) => Payload::DoubleScalarTimed(vec![DoubleSample {
            timestamp: now,
            value: *v,
        }]),
        Value::Integer(v) => Payload::IntegerScalarTimed(vec![IntegerSample {
            timestamp: now,
            value: *v,
        }]),
        Value::String(s) => Payload::ByteArrayTimed(vec![ByteArraySample {
            timestamp: now,
            bytes: s.as_bytes().to_vec(),
        }]),
        Value::Bytes(b) => Payload::ByteArrayTimed(vec![ByteArraySample {
            timestamp: now,
            bytes: b.clone(),
        }]),
        Value::Complex { real, imag } => Payload::ComplexScalar(vec![ComplexSample {
            timestamp: now,
            real: *real,
            imag: *imag,
        }]),
    };
    Event::new(path, payload)
}

/// Rewrite `event` for a session at `level`, or drop it.
///
/// Extended scope waves degrade to standard ones and timed scalars to untimed
/// ones; kinds without a lower-level form are dropped.
pub fn adapt_for_level(event: Event, level: ApiLevel) -> Option<Event> {
    if level.supports(event.kind()) {
        return Some(event);
    }
    let Event { path, payload } = event;
    let adapted = match payload {
        Payload::ScopeWave(waves) => Payload::ScopeWave(
            waves
                .into_iter()
                .map(|mut w| {
                    w.revision = ScopeRevision::Standard;
                    w.channel_offset = None;
                    w
                })
                .collect(),
        ),
        Payload::DoubleScalarTimed(s) => {
            Payload::DoubleScalar(s.into_iter().map(|s| s.value).collect())
        },
        Payload::IntegerScalarTimed(s) => {
            Payload::IntegerScalar(s.into_iter().map(|s| s.value).collect())
        },
        Payload::ByteArrayTimed(s) => Payload::ByteArray(s.into_iter().last()?.bytes),
        _ => return None,
    };
    let event = Event::new(path, adapted);
    level.supports(event.kind()).then_some(event)
}
