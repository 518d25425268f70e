//! Generic accumulation for the AWG, impedance compensation and
//! multi-device sync modules

use super::time_span;
use crate::error::ModuleError;
use crate::module::{ChunkHeader, ModuleKind, TaskContext};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use ziapi_protocol::{ChunkFlags, NodePath};

const POLL_SLICE: Duration = Duration::from_millis(10);

/// Device serials listed in `devices`, split on commas and whitespace.
pub(crate) fn device_list(devices: &str) -> Vec<String> {
    devices
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|s| s.trim().trim_matches('/').to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn start_sync(ctx: &mut TaskContext<'_>) -> Result<(), ModuleError> {
    let devices = device_list(ctx.params().str("devices")?);
    for device in &devices {
        ctx.conn().sync_set_integer(&format!("/{}/system/sync/start", device), 1)?;
    }
    info!(devices = ?devices, "Device clocks synchronised");
    Ok(())
}

pub(super) fn run(ctx: &mut TaskContext<'_>) -> Result<(), ModuleError> {
    if ctx.kind() == ModuleKind::MultiDeviceSync {
        start_sync(ctx)?;
    }
    let duration = ctx.params().f64("duration")?;
    let deadline = (duration.is_finite() && duration > 0.0).then(|| Instant::now() + Duration::from_secs_f64(duration));
    debug!(module = ctx.kind().name(), ?deadline, "Accumulating");

    // One open chunk per node, appended to as events arrive.
    let mut open: BTreeMap<NodePath, u64> = BTreeMap::new();

    while !ctx.should_stop() {
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let total = Duration::from_secs_f64(duration);
            ctx.set_progress(1.0 - (deadline - now).as_secs_f64() / total.as_secs_f64());
        } else if ctx.subscriptions().is_empty() {
            // Nothing to wait for.
            break;
        }

        let Some(event) = ctx.poll(POLL_SLICE)? else {
            continue;
        };
        if !ctx.is_subscribed(&event.path) {
            continue;
        }
        let span = time_span(&event.payload);
        match open.get(&event.path).copied() {
            Some(index) => ctx.with_buffer(|buffer| {
                if let Some(chunk) = buffer.chunk_mut(&event.path, index) {
                    if let Some((_, last)) = span {
                        chunk.header.changed = chunk.header.changed.max(last);
                    }
                    chunk.events.push(event.payload);
                }
            }),
            None => {
                let flags = ctx.chunk_flags(false);
                let (first, last) = span.unwrap_or_default();
                let header = ChunkHeader::new(ctx.kind().name(), 1, flags).with_times(first, last);
                let index = ctx.push_chunk(event.path.clone(), header, vec![event.payload]);
                open.insert(event.path, index);
            },
        }
    }

    let finished = !ctx.should_stop();
    ctx.with_buffer(|buffer| {
        for (path, index) in &open {
            if let Some(chunk) = buffer.chunk_mut(path, *index) {
                chunk.header.flags.set(ChunkFlags::FINISHED, finished);
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_list() {
        assert_eq!(device_list("dev1, DEV2\n/dev3/"), vec!["dev1", "dev2", "dev3"]);
        assert!(device_list("  ").is_empty());
    }
}
