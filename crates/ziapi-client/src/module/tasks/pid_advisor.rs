//! PID advisor: frequency response of a PID controller

use crate::error::ModuleError;
use crate::module::{ChunkHeader, TaskContext};
use std::f64::consts::PI;
use ziapi_protocol::{
    AdvisorFormat, AdvisorHeader, AdvisorSample, AdvisorWave, ChunkFlags, NodePath, Payload,
    Timestamp,
};

/// Result node of the Bode plot
pub(crate) const BODE_PATH: &str = "/pidadvisor/bode";

/// Controller gains
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PidGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

impl PidGains {
    /// `C(jw) = P + I/(jw) + D·jw`
    pub fn response(&self, freq: f64) -> (f64, f64) {
        let w = 2.0 * PI * freq;
        (self.p, self.d * w - self.i / w)
    }
}

/// `points` log-spaced frequencies from `start` to `stop`.
pub(crate) fn log_grid(start: f64, stop: f64, points: usize) -> Vec<f64> {
    if points <= 1 {
        return vec![start];
    }
    let ratio = stop / start;
    (0..points)
        .map(|k| start * ratio.powf(k as f64 / (points - 1) as f64))
        .collect()
}

pub(super) fn run(ctx: &mut TaskContext<'_>) -> Result<(), ModuleError> {
    let params = ctx.params();
    let gains = PidGains {
        p: params.f64("pid/p")?,
        i: params.f64("pid/i")?,
        d: params.f64("pid/d")?,
    };
    let start = params.f64("bode/start")?;
    let stop = params.f64("bode/stop")?;
    let points = params.count("bode/points")?;
    if !(start > 0.0 && stop > 0.0) {
        return Err(ModuleError::invalid_parameter(
            "bode/start",
            format!("frequency range {}..{} must be positive", start, stop),
        ));
    }
    if points == 0 {
        return Err(ModuleError::invalid_parameter("bode/points", "must be at least 1"));
    }

    let data: Vec<AdvisorSample> = log_grid(start, stop, points)
        .into_iter()
        .map(|f| {
            let (x, y) = gains.response(f);
            AdvisorSample { grid: f, x, y }
        })
        .collect();
    let wave = AdvisorWave {
        timestamp: Timestamp::ZERO,
        header: AdvisorHeader {
            sample_count: data.len() as u64,
            flags: 0,
            sample_format: AdvisorFormat::Bode,
        },
        data,
    };

    let path = NodePath::new(BODE_PATH).map_err(ziapi_driver::ApiError::from)?;
    let flags = ctx.chunk_flags(true) | ChunkFlags::FREQDOMAIN;
    ctx.push_chunk(
        path,
        ChunkHeader::new(ctx.kind().name(), 1, flags),
        vec![Payload::AdvisorWave(vec![wave])],
    );
    ctx.set_progress(1.0);
    Ok(())
}
