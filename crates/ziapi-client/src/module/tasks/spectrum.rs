//! Zoom FFT of complex demodulator data

use crate::error::ModuleError;
use crate::module::{ChunkHeader, TaskContext};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use ziapi_protocol::{
    ChunkFlags, NodePath, Payload, SpectrumDemodSample, SpectrumHeader, SpectrumWave, SpectrumWindow, Timestamp,
};

const POLL_SLICE: Duration = Duration::from_millis(10);

/// Parse the `window` parameter.
pub(crate) fn window_kind(code: i64) -> Result<SpectrumWindow, ModuleError> {
    match code {
        0 => Ok(SpectrumWindow::Rectangular),
        1 => Ok(SpectrumWindow::Hann),
        2 => Ok(SpectrumWindow::Hamming),
        3 => Ok(SpectrumWindow::BlackmanHarris),
        other => Err(ModuleError::invalid_parameter(
            "window",
            format!("expected 0..=3, got {}", other),
        )),
    }
}

/// Periodic window coefficients of length `n`.
pub(crate) fn window_coefficients(kind: SpectrumWindow, n: usize) -> Vec<f64> {
    let phase = |k: usize, m: f64| (m * 2.0 * PI * k as f64 / n as f64).cos();
    (0..n)
        .map(|k| match kind {
            SpectrumWindow::Rectangular => 1.0,
            SpectrumWindow::Hann => 0.5 - 0.5 * phase(k, 1.0),
            SpectrumWindow::Hamming => 0.54 - 0.46 * phase(k, 1.0),
            SpectrumWindow::BlackmanHarris => {
                0.35875 - 0.48829 * phase(k, 1.0) + 0.14128 * phase(k, 2.0) - 0.01168 * phase(k, 3.0)
            },
        })
        .collect()
}

/// Equivalent noise bandwidth of the window, in bins.
pub(crate) fn nenbw(kind: SpectrumWindow) -> f64 {
    match kind {
        SpectrumWindow::Rectangular => 1.0,
        SpectrumWindow::Hann => 1.5,
        SpectrumWindow::Hamming => 1.3628,
        SpectrumWindow::BlackmanHarris => 2.0044,
    }
}

/// Windowed, amplitude-normalised spectrum with DC in the middle.
pub(crate) struct Transform {
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    gain: f64,
}

impl Transform {
    pub fn new(kind: SpectrumWindow, n: usize) -> Self {
        let window = window_coefficients(kind, n);
        let gain = window.iter().sum::<f64>();
        let fft = FftPlanner::new().plan_fft_forward(n);
        Self { fft, window, gain }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Output bin `j` is frequency offset `j - n/2` bins.
    pub fn process(&self, samples: &[Complex<f64>]) -> Vec<Complex<f64>> {
        let n = self.len();
        let mut buffer: Vec<Complex<f64>> = samples
            .iter()
            .zip(&self.window)
            .map(|(s, w)| *s * *w)
            .collect();
        buffer.resize(n, Complex::new(0.0, 0.0));
        self.fft.process(&mut buffer);
        let gain = if self.gain > 0.0 { self.gain } else { 1.0 };
        (0..n).map(|j| buffer[(j + n - n / 2) % n] / gain).collect()
    }
}

/// Samples of one node waiting for a full frame
#[derive(Default)]
struct Frame {
    samples: Vec<Complex<f64>>,
    timestamps: Vec<Timestamp>,
    frequencies: Vec<f64>,
    spectra: usize,
}

impl Frame {
    fn add(&mut self, payload: &Payload) {
        match payload {
            Payload::DemodSample(v) => {
                for s in v {
                    self.samples.push(Complex::new(s.x, s.y));
                    self.timestamps.push(s.timestamp);
                    self.frequencies.push(s.frequency);
                }
            },
            Payload::ComplexScalar(v) => {
                for s in v {
                    self.samples.push(Complex::new(s.real, s.imag));
                    self.timestamps.push(s.timestamp);
                    self.frequencies.push(0.0);
                }
            },
            _ => {},
        }
    }

    /// Sample interval in ticks over the first `n` samples.
    fn mean_dt(&self, n: usize) -> f64 {
        if n < 2 {
            return 0.0;
        }
        let first = self.timestamps[0].ticks() as f64;
        let last = self.timestamps[n - 1].ticks() as f64;
        (last - first) / (n - 1) as f64
    }

    fn drain(&mut self, n: usize) {
        self.samples.drain(..n);
        self.timestamps.drain(..n);
        self.frequencies.drain(..n);
    }
}

pub(super) fn run(ctx: &mut TaskContext<'_>) -> Result<(), ModuleError> {
    let params = ctx.params();
    let n = params.count("grid/cols")?;
    if n < 2 {
        return Err(ModuleError::invalid_parameter("grid/cols", "needs at least 2 points"));
    }
    let window = window_kind(params.i64("window")?)?;
    let loops = params.count("loopcount")?;
    let absolute = params.flag("absolute")?;
    let transform = Transform::new(window, n);

    let mut frames: BTreeMap<NodePath, Frame> = BTreeMap::new();
    let mut clockbases: HashMap<String, f64> = HashMap::new();
    debug!(cols = n, ?window, loops, "Spectrum started");

    while !ctx.should_stop() {
        if loops > 0 && all_done(ctx.subscriptions(), &frames, loops) {
            break;
        }
        let Some(event) = ctx.poll(POLL_SLICE)? else {
            continue;
        };
        if !ctx.is_subscribed(&event.path) {
            continue;
        }
        let frame = frames.entry(event.path.clone()).or_default();
        frame.add(&event.payload);
        if frame.samples.len() < n || (loops > 0 && frame.spectra >= loops) {
            continue;
        }

        let dt = frame.mean_dt(n);
        let rate = match event.path.device() {
            Some(device) if dt > 0.0 => {
                let clockbase = match clockbases.get(device) {
                    Some(cb) => *cb,
                    None => {
                        let cb = match ctx.conn().clockbase(device) {
                            Ok(cb) => cb.ticks_per_second(),
                            Err(e) => {
                                warn!(device, "Clock base unavailable, spectrum in bins: {}", e);
                                0.0
                            },
                        };
                        clockbases.insert(device.to_string(), cb);
                        cb
                    },
                };
                if clockbase > 0.0 { clockbase / dt } else { n as f64 }
            },
            _ => n as f64,
        };
        let Some(frame) = frames.get_mut(&event.path) else {
            continue;
        };
        let center = frame.frequencies[..n].iter().sum::<f64>() / n as f64;
        let spectrum = transform.process(&frame.samples[..n]);
        let resolution = rate / n as f64;
        let offset = if absolute { center } else { 0.0 };
        let data: Vec<SpectrumDemodSample> = spectrum
            .iter()
            .enumerate()
            .map(|(j, c)| SpectrumDemodSample {
                grid: (j as f64 - (n / 2) as f64) * resolution + offset,
                filter: 1.0,
                x: c.re,
                y: c.im,
                r: c.norm(),
            })
            .collect();
        let first = frame.timestamps[0];
        let last = frame.timestamps[n - 1];
        frame.drain(n);
        frame.spectra += 1;
        let number = frame.spectra as u64;

        let wave = SpectrumWave {
            timestamp: first,
            header: SpectrumHeader {
                sample_count: n as u64,
                flags: if absolute { 0x04 } else { 0 },
                spectrum_mode: 0,
                window,
                bandwidth: resolution * nenbw(window),
                rate,
                center,
                resolution,
                aliasing_reject: 0.0,
                nenbw: nenbw(window),
                overlap: 0.0,
            },
            data,
        };
        let flags = ctx.chunk_flags(true) | ChunkFlags::FREQDOMAIN | ChunkFlags::SPECTRUM;
        let header = ChunkHeader::new(ctx.kind().name(), number, flags).with_times(first, last);
        ctx.push_chunk(event.path.clone(), header, vec![Payload::SpectrumWave(vec![wave])]);

        if loops > 0 {
            let done: usize = frames.values().map(|f| f.spectra.min(loops)).sum();
            let wanted = ctx.subscriptions().len().max(frames.len()) * loops;
            ctx.set_progress(done as f64 / wanted as f64);
        }
    }
    Ok(())
}

/// Every subscription has a node with `loops` spectra.
fn all_done(subscriptions: &[NodePath], frames: &BTreeMap<NodePath, Frame>, loops: usize) -> bool {
    !subscriptions.is_empty()
        && subscriptions.iter().all(|sub| {
            frames
                .iter()
                .any(|(path, frame)| sub.covers(path) && frame.spectra >= loops)
        })
}
