//! Scope module: reassembled shots split into history chunks

use crate::error::ModuleError;
use crate::module::{ChunkHeader, TaskContext};
use crate::scope::{ScopeReassembler, ScopeShot};
use std::time::Duration;
use tracing::{debug, warn};
use ziapi_protocol::{Payload, ScopeWave};

const POLL_SLICE: Duration = Duration::from_millis(10);

/// Blocks of a shot grouped `per_chunk` at a time.
pub(crate) fn group_blocks(blocks: Vec<ScopeWave>, per_chunk: usize) -> Vec<Vec<ScopeWave>> {
    let per_chunk = per_chunk.max(1);
    let mut groups = Vec::with_capacity(blocks.len().div_ceil(per_chunk));
    let mut current = Vec::with_capacity(per_chunk);
    for block in blocks {
        current.push(block);
        if current.len() == per_chunk {
            groups.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn store_shot(ctx: &mut TaskContext<'_>, number: u64, shot: ScopeShot, per_chunk: usize) {
    let path = shot.path.clone();
    let groups = group_blocks(shot.blocks, per_chunk);
    let last = groups.len().saturating_sub(1);
    for (i, group) in groups.into_iter().enumerate() {
        let first_ts = group.first().map(|b| b.timestamp).unwrap_or_default();
        let last_ts = group.last().map(|b| b.timestamp).unwrap_or_default();
        let flags = ctx.chunk_flags(i == last);
        let header = ChunkHeader::new(ctx.kind().name(), number, flags).with_times(first_ts, last_ts);
        ctx.push_chunk(path.clone(), header, vec![Payload::ScopeWave(group)]);
    }
}

pub(super) fn run(ctx: &mut TaskContext<'_>) -> Result<(), ModuleError> {
    let params = ctx.params();
    // Zero records until finished.
    let shots_wanted = params.count("averager/count")? as u64;
    let per_chunk = params.count("historylength")?.max(1);
    let mut reassembler = ScopeReassembler::new();
    let mut shots = 0u64;

    debug!(shots = shots_wanted, per_chunk, "Scope module started");

    while !ctx.should_stop() && (shots_wanted == 0 || shots < shots_wanted) {
        let Some(event) = ctx.poll(POLL_SLICE)? else {
            continue;
        };
        if !ctx.is_subscribed(&event.path) {
            continue;
        }
        for shot in reassembler.push_event(&event) {
            if shots_wanted != 0 && shots >= shots_wanted {
                break;
            }
            shots += 1;
            store_shot(ctx, shots, shot, per_chunk);
            if shots_wanted != 0 {
                ctx.set_progress(shots as f64 / shots_wanted as f64);
            }
        }
    }

    if reassembler.discarded() > 0 {
        warn!(discarded = reassembler.discarded(), "Scope module dropped incomplete shots");
    }
    Ok(())
}
