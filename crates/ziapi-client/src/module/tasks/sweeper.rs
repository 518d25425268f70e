//! Sweeper: step a grid node and average the response at each point

use super::merged_span;
use crate::error::ModuleError;
use crate::module::{ChunkHeader, ModuleParams, TaskContext};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::f64::consts::PI;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use ziapi_driver::ApiError;
use ziapi_protocol::{
    BandwidthMode, DemodSample, ImpedanceSample, NodePath, Payload, StatisticSample, SweepMode,
    SweeperData, SweeperDemodSample, SweeperDoubleSample, SweeperHeader, SweeperImpedanceSample,
    SweeperWave, Timestamp,
};

const POLL_SLICE: Duration = Duration::from_millis(10);

/// Sweep settings read from the module parameters
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SweepPlan {
    pub gridnode: String,
    pub start: f64,
    pub stop: f64,
    pub points: usize,
    pub log: bool,
    pub mode: SweepMode,
    pub settling: Duration,
    pub averaging: usize,
    /// Zero sweeps until finished
    pub loops: usize,
}

impl SweepPlan {
    pub fn from_params(params: &ModuleParams) -> Result<Self, ModuleError> {
        let gridnode = params.str("gridnode")?.trim().to_string();
        if gridnode.is_empty() {
            return Err(ModuleError::invalid_parameter("gridnode", "not set"));
        }
        let points = params.count("samplecount")?;
        if points == 0 {
            return Err(ModuleError::invalid_parameter("samplecount", "must be at least 1"));
        }
        let start = params.f64("start")?;
        let stop = params.f64("stop")?;
        let log = params.flag("xmapping")?;
        if log && !(start > 0.0 && stop > 0.0) {
            return Err(ModuleError::invalid_parameter(
                "xmapping",
                format!("logarithmic grid needs a positive range, got {}..{}", start, stop),
            ));
        }
        let mode = match params.i64("scan")? {
            0 => SweepMode::Sequential,
            1 => SweepMode::Binary,
            2 => SweepMode::Bidirectional,
            3 => SweepMode::Reverse,
            other => {
                return Err(ModuleError::invalid_parameter("scan", format!("unknown mode {}", other)));
            },
        };
        let settling = params.f64("settling/time")?;
        Ok(Self {
            gridnode,
            start,
            stop,
            points,
            log,
            mode,
            settling: Duration::from_secs_f64(settling.max(0.0)),
            averaging: params.count("averaging/sample")?.max(1),
            loops: params.count("loopcount")?,
        })
    }

    /// Grid values in index order.
    pub fn grid(&self) -> Vec<f64> {
        if self.points == 1 {
            return vec![self.start];
        }
        let last = (self.points - 1) as f64;
        (0..self.points)
            .map(|i| {
                let t = i as f64 / last;
                if self.log {
                    self.start * (self.stop / self.start).powf(t)
                } else {
                    self.start + (self.stop - self.start) * t
                }
            })
            .collect()
    }

    /// Order in which grid indices are visited in sweep number `sweep`.
    pub fn order(&self, sweep: usize) -> Vec<usize> {
        let n = self.points;
        match self.mode {
            SweepMode::Sequential => (0..n).collect(),
            SweepMode::Reverse => (0..n).rev().collect(),
            SweepMode::Bidirectional if sweep % 2 == 1 => (0..n).rev().collect(),
            SweepMode::Bidirectional => (0..n).collect(),
            SweepMode::Binary => binary_order(n),
        }
    }
}

/// Bisection order: middle first, then the middles of each half.
fn binary_order(n: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(n);
    let mut ranges = VecDeque::new();
    if n > 0 {
        ranges.push_back((0, n - 1));
    }
    while let Some((lo, hi)) = ranges.pop_front() {
        let mid = lo + (hi - lo) / 2;
        order.push(mid);
        if mid > lo {
            ranges.push_back((lo, mid - 1));
        }
        if mid < hi {
            ranges.push_back((mid + 1, hi));
        }
    }
    order
}

/// Samples gathered at one grid point for one node
#[derive(Debug, Default)]
struct Collected {
    demod: Vec<DemodSample>,
    impedance: Vec<ImpedanceSample>,
    scalar: Vec<(Timestamp, f64)>,
}

impl Collected {
    /// Adds the samples of `payload`; returns how many were usable.
    fn add(&mut self, payload: &Payload) -> usize {
        match payload {
            Payload::DemodSample(v) => {
                self.demod.extend_from_slice(v);
                v.len()
            },
            Payload::ImpedanceSample(v) => {
                self.impedance.extend_from_slice(v);
                v.len()
            },
            Payload::DoubleScalarTimed(v) => {
                self.scalar.extend(v.iter().map(|s| (s.timestamp, s.value)));
                v.len()
            },
            Payload::IntegerScalarTimed(v) => {
                self.scalar.extend(v.iter().map(|s| (s.timestamp, s.value as f64)));
                v.len()
            },
            Payload::DoubleScalar(v) => {
                self.scalar.extend(v.iter().map(|x| (Timestamp::ZERO, *x)));
                v.len()
            },
            Payload::AuxInSample(v) => {
                self.scalar.extend(v.iter().map(|s| (s.timestamp, s.ch0)));
                v.len()
            },
            _ => 0,
        }
    }
}

/// Averaged result of one grid point
#[derive(Debug, Clone, Copy)]
enum Point {
    Demod(SweeperDemodSample),
    Impedance(SweeperImpedanceSample),
    Double(SweeperDoubleSample),
}

fn stats<T>(items: &[T], f: impl Fn(&T) -> f64) -> StatisticSample {
    let values: Vec<f64> = items.iter().map(f).collect();
    StatisticSample::from_values(&values)
}

fn average(grid: f64, settling: f64, tc: f64, data: Collected, n: usize) -> Option<Point> {
    let bandwidth = if tc > 0.0 { 1.0 / (2.0 * PI * tc) } else { 0.0 };
    if !data.demod.is_empty() {
        let s = &data.demod[..data.demod.len().min(n)];
        return Some(Point::Demod(SweeperDemodSample {
            grid,
            bandwidth,
            count: s.len() as u64,
            tc,
            tc_meas: tc,
            settling,
            set_timestamp: s[0].timestamp,
            next_timestamp: s[s.len() - 1].timestamp,
            x: stats(s, |d| d.x),
            y: stats(s, |d| d.y),
            r: stats(s, |d| d.x.hypot(d.y)),
            phase: stats(s, |d| d.y.atan2(d.x)),
            frequency: stats(s, |d| d.frequency),
            auxin0: stats(s, |d| d.aux_in[0]),
            auxin1: stats(s, |d| d.aux_in[1]),
        }));
    }
    if !data.impedance.is_empty() {
        let s = &data.impedance[..data.impedance.len().min(n)];
        return Some(Point::Impedance(SweeperImpedanceSample {
            grid,
            bandwidth,
            count: s.len() as u64,
            settling,
            set_timestamp: s[0].timestamp,
            next_timestamp: s[s.len() - 1].timestamp,
            real_z: stats(s, |d| d.real_z),
            imag_z: stats(s, |d| d.imag_z),
            abs_z: stats(s, |d| d.real_z.hypot(d.imag_z)),
            phase_z: stats(s, |d| d.imag_z.atan2(d.real_z)),
            frequency: stats(s, |d| d.frequency),
            param0: stats(s, |d| d.param0),
            param1: stats(s, |d| d.param1),
            drive: stats(s, |d| d.drive),
            bias: stats(s, |d| d.bias),
        }));
    }
    if !data.scalar.is_empty() {
        let s = &data.scalar[..data.scalar.len().min(n)];
        return Some(Point::Double(SweeperDoubleSample {
            grid,
            bandwidth,
            count: s.len() as u64,
            value: stats(s, |(_, v)| *v),
        }));
    }
    None
}

/// One node's sweep in progress, indexed by grid point
struct Column {
    points: Vec<Option<Point>>,
}

impl Column {
    /// Points in grid order; the data kind follows the first point.
    fn into_data(self) -> Option<SweeperData> {
        let points: Vec<Point> = self.points.into_iter().flatten().collect();
        match points.first()? {
            Point::Demod(_) => Some(SweeperData::Demod(
                points
                    .iter()
                    .filter_map(|p| match p {
                        Point::Demod(d) => Some(*d),
                        _ => None,
                    })
                    .collect(),
            )),
            Point::Impedance(_) => Some(SweeperData::Impedance(
                points
                    .iter()
                    .filter_map(|p| match p {
                        Point::Impedance(d) => Some(*d),
                        _ => None,
                    })
                    .collect(),
            )),
            Point::Double(_) => Some(SweeperData::Double(
                points
                    .iter()
                    .filter_map(|p| match p {
                        Point::Double(d) => Some(*d),
                        _ => None,
                    })
                    .collect(),
            )),
        }
    }
}

/// Poll until every subscription saw `n` samples, or the deadline passes.
fn collect(
    ctx: &mut TaskContext<'_>,
    n: usize,
    timeout: Duration,
) -> Result<BTreeMap<NodePath, Collected>, ModuleError> {
    let subscriptions = ctx.subscriptions();
    let mut counts = vec![0usize; subscriptions.len()];
    let mut out: BTreeMap<NodePath, Collected> = BTreeMap::new();
    let deadline = Instant::now() + timeout;

    while counts.iter().any(|c| *c < n) && !ctx.should_stop() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            if out.is_empty() {
                let pending: Vec<String> = subscriptions.iter().map(|s| s.to_string()).collect();
                return Err(ApiError::Timeout {
                    operation: format!("sweep: no samples from {}", pending.join(", ")),
                }
                .into());
            }
            warn!(
                expected = n,
                "Sweep point incomplete, averaging what arrived"
            );
            break;
        }
        let Some(event) = ctx.poll(remaining.min(POLL_SLICE))? else {
            continue;
        };
        let added = out.entry(event.path.clone()).or_default().add(&event.payload);
        for (sub, count) in subscriptions.iter().zip(counts.iter_mut()) {
            if sub.covers(&event.path) {
                *count += added;
            }
        }
    }
    Ok(out)
}

/// Demodulator time constant next to a `.../sample` node, if there is one.
fn time_constant(ctx: &mut TaskContext<'_>, path: &NodePath) -> f64 {
    let Some(parent) = path.parent() else {
        return 0.0;
    };
    ctx.conn()
        .get_double(&format!("{}/timeconstant", parent))
        .unwrap_or(0.0)
}

fn store_sweep(
    ctx: &mut TaskContext<'_>,
    plan: &SweepPlan,
    sweep: usize,
    columns: BTreeMap<NodePath, Column>,
    finished: bool,
) {
    for (path, column) in columns {
        let Some(data) = column.into_data() else {
            continue;
        };
        let header = SweeperHeader {
            sample_count: data.len() as u64,
            flags: 0,
            sweep_mode: plan.mode,
            bandwidth_mode: BandwidthMode::Fixed,
        };
        let payload = Payload::SweeperWave(vec![SweeperWave {
            timestamp: Timestamp::ZERO,
            header,
            data,
        }]);
        let (first, last) = sweep_span(&payload);
        let flags = ctx.chunk_flags(finished);
        let chunk = ChunkHeader::new(ctx.kind().name(), sweep as u64 + 1, flags).with_times(first, last);
        ctx.push_chunk(path, chunk, vec![payload]);
    }
}

fn sweep_span(payload: &Payload) -> (Timestamp, Timestamp) {
    let Some(wave) = payload.as_sweeper().and_then(|w| w.first()) else {
        return merged_span([payload]);
    };
    match &wave.data {
        SweeperData::Demod(v) => (
            v.iter().map(|s| s.set_timestamp).min().unwrap_or_default(),
            v.iter().map(|s| s.next_timestamp).max().unwrap_or_default(),
        ),
        SweeperData::Impedance(v) => (
            v.iter().map(|s| s.set_timestamp).min().unwrap_or_default(),
            v.iter().map(|s| s.next_timestamp).max().unwrap_or_default(),
        ),
        SweeperData::Double(_) => (Timestamp::ZERO, Timestamp::ZERO),
    }
}

pub(super) fn run(ctx: &mut TaskContext<'_>) -> Result<(), ModuleError> {
    let plan = SweepPlan::from_params(ctx.params())?;
    let grid = plan.grid();
    let timeout = ctx.conn().config().request_timeout();
    let mut time_constants: HashMap<NodePath, f64> = HashMap::new();
    let per_sweep = plan.points as f64;
    let mut done = 0usize;

    debug!(
        gridnode = %plan.gridnode,
        points = plan.points,
        loops = plan.loops,
        "Sweep started"
    );

    let mut sweep = 0usize;
    while plan.loops == 0 || sweep < plan.loops {
        let mut columns: BTreeMap<NodePath, Column> = BTreeMap::new();
        for index in plan.order(sweep) {
            if ctx.should_stop() {
                store_sweep(ctx, &plan, sweep, columns, false);
                return Ok(());
            }
            let effective = ctx.conn().sync_set_double(&plan.gridnode, grid[index])?;
            if !ctx.sleep(plan.settling) {
                store_sweep(ctx, &plan, sweep, columns, false);
                return Ok(());
            }
            // Samples queued before the grid node settled belong to the previous point.
            ctx.drain()?;

            if !ctx.subscriptions().is_empty() {
                for (path, data) in collect(ctx, plan.averaging, timeout)? {
                    let tc = match time_constants.get(&path) {
                        Some(tc) => *tc,
                        None => {
                            let tc = time_constant(ctx, &path);
                            time_constants.insert(path.clone(), tc);
                            tc
                        },
                    };
                    let point = average(effective, plan.settling.as_secs_f64(), tc, data, plan.averaging);
                    let column = columns.entry(path).or_insert_with(|| Column {
                        points: vec![None; plan.points],
                    });
                    column.points[index] = point;
                }
            }

            done += 1;
            let progress = if plan.loops == 0 {
                (done as f64 % per_sweep) / per_sweep
            } else {
                done as f64 / (per_sweep * plan.loops as f64)
            };
            ctx.set_progress(progress);
        }
        store_sweep(ctx, &plan, sweep, columns, true);
        sweep += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleKind;
    use ziapi_protocol::Value;

    fn plan(f: impl FnOnce(&mut ModuleParams)) -> Result<SweepPlan, ModuleError> {
        let mut params = ModuleParams::defaults(ModuleKind::Sweeper);
        params.set("gridnode", Value::String("/dev1/oscs/0/freq".into()));
        f(&mut params);
        SweepPlan::from_params(&params)
    }

    #[test]
    fn test_linear_grid() {
        let p = plan(|p| {
            p.set("start", Value::Double(10.0));
            p.set("stop", Value::Double(50.0));
            p.set("samplecount", Value::Integer(5));
        })
        .unwrap();
        assert_eq!(p.grid(), vec![10.0, 20.0, 30.0, 40.0, 50.0]);
    }

    #[test]
    fn test_log_grid() {
        let p = plan(|p| {
            p.set("start", Value::Double(1.0));
            p.set("stop", Value::Double(100.0));
            p.set("samplecount", Value::Integer(3));
            p.set("xmapping", Value::Integer(1));
        })
        .unwrap();
        let g = p.grid();
        assert!((g[1] - 10.0).abs() < 1e-9);
        assert!((g[2] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_plans() {
        assert!(plan(|p| p.set("gridnode", Value::String(String::new()))).is_err());
        assert!(plan(|p| p.set("samplecount", Value::Integer(0))).is_err());
        assert!(plan(|p| {
            p.set("xmapping", Value::Integer(1));
            p.set("start", Value::Double(0.0));
        })
        .is_err());
        assert!(plan(|p| p.set("scan", Value::Integer(9))).is_err());
    }

    #[test]
    fn test_visit_orders_cover_every_point() {
        for scan in 0..4 {
            let p = plan(|p| {
                p.set("samplecount", Value::Integer(9));
                p.set("scan", Value::Integer(scan));
            })
            .unwrap();
            for sweep in 0..2 {
                let mut order = p.order(sweep);
                order.sort();
                assert_eq!(order, (0..9).collect::<Vec<_>>(), "scan {}", scan);
            }
        }
        assert_eq!(binary_order(7)[0], 3);
    }

    #[test]
    fn test_bidirectional_alternates() {
        let p = plan(|p| {
            p.set("samplecount", Value::Integer(3));
            p.set("scan", Value::Integer(2));
        })
        .unwrap();
        assert_eq!(p.order(0), vec![0, 1, 2]);
        assert_eq!(p.order(1), vec![2, 1, 0]);
    }

    #[test]
    fn test_average_limits_to_n() {
        let data = Collected {
            scalar: vec![(Timestamp(1), 1.0), (Timestamp(2), 3.0), (Timestamp(3), 100.0)],
            ..Default::default()
        };
        match average(5.0, 0.0, 0.0, data, 2) {
            Some(Point::Double(d)) => {
                assert_eq!(d.count, 2);
                assert_eq!(d.value.avg, 2.0);
                assert_eq!(d.grid, 5.0);
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
