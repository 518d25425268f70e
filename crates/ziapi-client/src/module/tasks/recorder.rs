//! Recorder and data acquisition: triggered capture windows

use super::{merged_span, scalar_series};
use crate::error::ModuleError;
use crate::module::{ChunkHeader, ModuleParams, TaskContext};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use ziapi_protocol::{NodePath, Payload};

const POLL_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriggerType {
    /// Windows follow each other back to back
    Continuous,
    /// A level crossing on `trigger/node` opens a window
    Edge,
    /// Only software triggers open a window
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Edge {
    Rising,
    Falling,
    Both,
}

/// Level crossing detector; remembers the last value across events.
#[derive(Debug, Clone)]
pub(crate) struct EdgeDetector {
    level: f64,
    edge: Edge,
    last: Option<f64>,
}

impl EdgeDetector {
    pub fn new(level: f64, edge: Edge) -> Self {
        Self {
            level,
            edge,
            last: None,
        }
    }

    /// Feeds `values` in order; true if any of them crossed the level.
    pub fn feed(&mut self, values: &[f64]) -> bool {
        let mut fired = false;
        for &v in values {
            if let Some(prev) = self.last {
                let rising = prev < self.level && v >= self.level;
                let falling = prev > self.level && v <= self.level;
                fired |= match self.edge {
                    Edge::Rising => rising,
                    Edge::Falling => falling,
                    Edge::Both => rising || falling,
                };
            }
            self.last = Some(v);
        }
        fired
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordPlan {
    pub trigger: TriggerType,
    pub node: Option<NodePath>,
    pub level: f64,
    pub edge: Edge,
    pub duration: Duration,
    /// `None` records until finished
    pub count: Option<u64>,
}

impl RecordPlan {
    pub fn from_params(params: &ModuleParams) -> Result<Self, ModuleError> {
        let trigger = match params.i64("trigger/type")? {
            0 => TriggerType::Continuous,
            1 => TriggerType::Edge,
            2 => TriggerType::Manual,
            other => {
                return Err(ModuleError::invalid_parameter(
                    "trigger/type",
                    format!("unknown trigger type {}", other),
                ));
            },
        };
        let edge = match params.i64("trigger/edge")? {
            1 => Edge::Rising,
            2 => Edge::Falling,
            3 => Edge::Both,
            other => {
                return Err(ModuleError::invalid_parameter(
                    "trigger/edge",
                    format!("expected 1, 2 or 3, got {}", other),
                ));
            },
        };
        let node = params.str("trigger/node")?.trim();
        let node = if node.is_empty() {
            None
        } else {
            Some(NodePath::new(node).map_err(|e| ModuleError::invalid_parameter("trigger/node", e.to_string()))?)
        };
        if trigger == TriggerType::Edge && node.is_none() {
            return Err(ModuleError::invalid_parameter("trigger/node", "edge trigger needs a node"));
        }
        let duration = params.f64("duration")?;
        if !(duration.is_finite() && duration > 0.0) {
            return Err(ModuleError::invalid_parameter(
                "duration",
                format!("must be positive, got {}", duration),
            ));
        }
        let count = if params.flag("endless")? {
            None
        } else {
            Some(params.count("count")?.max(1) as u64)
        };
        Ok(Self {
            trigger,
            node,
            level: params.f64("trigger/level")?,
            edge,
            duration: Duration::from_secs_f64(duration),
            count,
        })
    }
}

/// An open capture window
struct Window {
    number: u64,
    until: Instant,
    data: BTreeMap<NodePath, Vec<Payload>>,
}

impl Window {
    fn open(number: u64, duration: Duration) -> Self {
        Self {
            number,
            until: Instant::now() + duration,
            data: BTreeMap::new(),
        }
    }
}

fn close(ctx: &mut TaskContext<'_>, window: Window, finished: bool) {
    let flags = ctx.chunk_flags(finished);
    for (path, events) in window.data {
        let (first, last) = merged_span(&events);
        let header = ChunkHeader::new(ctx.kind().name(), window.number, flags).with_times(first, last);
        ctx.push_chunk(path, header, events);
    }
    trace!(module = ctx.kind().name(), trigger = window.number, "Capture window closed");
}

pub(super) fn run(ctx: &mut TaskContext<'_>) -> Result<(), ModuleError> {
    let plan = RecordPlan::from_params(ctx.params())?;

    // The trigger node feeds the detector without necessarily being recorded.
    let mut detector = EdgeDetector::new(plan.level, plan.edge);
    let mut extra_subscription = false;
    if plan.trigger == TriggerType::Edge
        && let Some(node) = &plan.node
        && !ctx.is_subscribed(node)
    {
        ctx.conn().subscribe(node.as_str())?;
        extra_subscription = true;
    }
    debug!(module = ctx.kind().name(), trigger = ?plan.trigger, count = ?plan.count, "Recording started");

    let mut triggers = 0u64;
    let mut window: Option<Window> = None;

    loop {
        if ctx.should_stop() {
            if let Some(w) = window.take() {
                close(ctx, w, false);
            }
            break;
        }
        if let Some(count) = plan.count
            && triggers >= count
            && window.is_none()
        {
            break;
        }

        // Windows close on wall time.
        if window.as_ref().is_some_and(|w| Instant::now() >= w.until)
            && let Some(w) = window.take()
        {
            close(ctx, w, true);
            if let Some(count) = plan.count {
                ctx.set_progress(triggers as f64 / count as f64);
            }
            continue;
        }

        let may_open = window.is_none() && plan.count.is_none_or(|count| triggers < count);
        if may_open && (plan.trigger == TriggerType::Continuous || ctx.take_trigger()) {
            triggers += 1;
            window = Some(Window::open(triggers, plan.duration));
        }

        let Some(event) = ctx.poll(POLL_SLICE)? else {
            continue;
        };

        if plan.trigger == TriggerType::Edge && plan.node.as_ref().is_some_and(|n| n.covers(&event.path)) {
            let fired = detector.feed(&scalar_series(&event.payload));
            if fired && window.is_none() && plan.count.is_none_or(|count| triggers < count) {
                triggers += 1;
                trace!(module = ctx.kind().name(), trigger = triggers, "Edge trigger");
                window = Some(Window::open(triggers, plan.duration));
            }
        }

        if let Some(w) = window.as_mut()
            && ctx.is_subscribed(&event.path)
        {
            w.data.entry(event.path).or_default().push(event.payload);
        }
    }

    if extra_subscription
        && let Some(node) = &plan.node
    {
        ctx.conn().unsubscribe(node.as_str())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleKind;
    use ziapi_protocol::Value;

    #[test]
    fn test_rising_edge() {
        let mut d = EdgeDetector::new(0.5, Edge::Rising);
        assert!(!d.feed(&[0.0, 0.2]));
        assert!(d.feed(&[0.6]));
        assert!(!d.feed(&[0.4]));
        assert!(!d.feed(&[]));
    }

    #[test]
    fn test_falling_and_both() {
        let mut falling = EdgeDetector::new(1.0, Edge::Falling);
        assert!(!falling.feed(&[0.0, 2.0]));
        assert!(falling.feed(&[0.5]));

        let mut both = EdgeDetector::new(1.0, Edge::Both);
        assert!(both.feed(&[0.0, 2.0]));
        assert!(both.feed(&[0.0]));
    }

    #[test]
    fn test_plan_validation() {
        let mut params = ModuleParams::defaults(ModuleKind::Recorder);
        let plan = RecordPlan::from_params(&params).unwrap();
        assert_eq!(plan.trigger, TriggerType::Continuous);
        assert_eq!(plan.count, Some(1));

        params.set("trigger/type", Value::Integer(1));
        assert!(RecordPlan::from_params(&params).is_err());
        params.set("trigger/node", Value::String("/dev1/demods/0/sample".into()));
        assert!(RecordPlan::from_params(&params).is_ok());

        params.set("endless", Value::Integer(1));
        assert_eq!(RecordPlan::from_params(&params).unwrap().count, None);

        params.set("duration", Value::Double(0.0));
        assert!(RecordPlan::from_params(&params).is_err());
    }
}
