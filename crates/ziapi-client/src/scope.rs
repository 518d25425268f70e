//! Scope shot reassembly
//!
//! A scope shot longer than one block arrives as several `ScopeWave` blocks
//! sharing a `sequence_number`. Blocks of different shots may interleave and
//! blocks of one shot may arrive out of order; the reassembler keys them by
//! `(path, sequence_number)`, orders them by `block_number`, and emits the
//! shot once the collected samples reach `total_samples`.

use std::collections::BTreeMap;
use tracing::{trace, warn};
use ziapi_protocol::{Event, NodePath, ScopeData, ScopeWave, Timestamp};

/// Incomplete shots kept before the oldest is discarded
pub const DEFAULT_MAX_PENDING: usize = 16;

/// A complete scope shot
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeShot {
    pub path: NodePath,
    pub sequence_number: u32,
    pub total_samples: u64,
    /// Blocks in ascending `block_number` order
    pub blocks: Vec<ScopeWave>,
}

impl ScopeShot {
    pub fn sample_count(&self) -> u64 {
        self.blocks.iter().map(|b| u64::from(b.sample_count)).sum()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.blocks.first().map(|b| b.timestamp).unwrap_or_default()
    }

    /// All blocks concatenated; `None` if the blocks disagree on format.
    pub fn data(&self) -> Option<ScopeData> {
        let mut blocks = self.blocks.iter();
        let mut data = blocks.next()?.data.clone();
        for block in blocks {
            if !data.extend_from(&block.data) {
                return None;
            }
        }
        Some(data)
    }
}

#[derive(Debug)]
struct PendingShot {
    total_samples: u64,
    samples: u64,
    blocks: BTreeMap<u32, ScopeWave>,
    /// Arrival order of the first block, for eviction
    arrival: u64,
}

/// Collects scope blocks into complete shots
#[derive(Debug)]
pub struct ScopeReassembler {
    pending: BTreeMap<(NodePath, u32), PendingShot>,
    max_pending: usize,
    arrivals: u64,
    discarded: u64,
}

impl ScopeReassembler {
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            max_pending: max_pending.max(1),
            arrivals: 0,
            discarded: 0,
        }
    }

    /// Add one block; returns the shot it completes, if any.
    pub fn push(&mut self, path: &NodePath, wave: ScopeWave) -> Option<ScopeShot> {
        let key = (path.clone(), wave.sequence_number);
        let arrival = self.arrivals;
        self.arrivals += 1;

        let shot = self.pending.entry(key.clone()).or_insert_with(|| PendingShot {
            total_samples: wave.total_samples,
            samples: 0,
            blocks: BTreeMap::new(),
            arrival,
        });
        let samples = u64::from(wave.sample_count);
        if let Some(old) = shot.blocks.insert(wave.block_number, wave) {
            // Retransmitted block replaces the earlier copy.
            shot.samples -= u64::from(old.sample_count);
        }
        shot.samples += samples;

        // A zero total means the header did not announce one: single-block shot.
        if shot.samples >= shot.total_samples {
            let shot = self.pending.remove(&key)?;
            trace!(path = %key.0, sequence = key.1, blocks = shot.blocks.len(), "Scope shot complete");
            return Some(ScopeShot {
                path: key.0,
                sequence_number: key.1,
                total_samples: shot.total_samples.max(shot.samples),
                blocks: shot.blocks.into_values().collect(),
            });
        }

        self.evict();
        None
    }

    /// Feed every block of a scope event; returns completed shots in order.
    pub fn push_event(&mut self, event: &Event) -> Vec<ScopeShot> {
        let Some(waves) = event.payload.as_scope() else {
            return Vec::new();
        };
        waves
            .iter()
            .filter_map(|w| self.push(&event.path, w.clone()))
            .collect()
    }

    fn evict(&mut self) {
        while self.pending.len() > self.max_pending {
            let Some(oldest) = self
                .pending
                .iter()
                .min_by_key(|(_, s)| s.arrival)
                .map(|(k, _)| k.clone())
            else {
                return;
            };
            self.pending.remove(&oldest);
            self.discarded += 1;
            warn!(path = %oldest.0, sequence = oldest.1, "Discarding incomplete scope shot");
        }
    }

    /// Shots still waiting for blocks
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Incomplete shots dropped so far
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Default for ScopeReassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;
    use ziapi_protocol::ScopeRevision;

    pub(crate) fn block(sequence: u32, block: u32, samples: &[f32], total: u64) -> ScopeWave {
        ScopeWave {
            revision: ScopeRevision::Extended,
            timestamp: Timestamp(u64::from(sequence) * 1000),
            trigger_timestamp: Timestamp(u64::from(sequence) * 1000),
            dt: 1e-6,
            channel_enable: [1, 0, 0, 0],
            channel_input: [0; 4],
            trigger_enable: 1,
            trigger_input: 0,
            channel_bw_limit: [0; 4],
            channel_math: [0; 4],
            channel_scaling: [1.0; 4],
            channel_offset: Some([0.0; 4]),
            sequence_number: sequence,
            segment_number: 0,
            block_number: block,
            total_samples: total,
            data_transfer_mode: 0,
            block_marker: 0,
            flags: 0,
            sample_count: samples.len() as u32,
            interleaved: false,
            data: ScopeData::Float(samples.to_vec()),
        }
    }

    /// Split `0..total` into blocks of `size`.
    pub(crate) fn shot(sequence: u32, total: usize, size: usize) -> Vec<ScopeWave> {
        let samples: Vec<f32> = (0..total).map(|i| i as f32).collect();
        samples
            .chunks(size.max(1))
            .enumerate()
            .map(|(i, c)| block(sequence, i as u32, c, total as u64))
            .collect()
    }

    fn path() -> NodePath {
        NodePath::new("/dev1/scopes/0/wave").unwrap()
    }

    #[test]
    fn test_in_order_shot() {
        let mut r = ScopeReassembler::new();
        let blocks = shot(1, 10, 4);
        assert_eq!(blocks.len(), 3);
        assert!(r.push(&path(), blocks[0].clone()).is_none());
        assert!(r.push(&path(), blocks[1].clone()).is_none());
        let done = r.push(&path(), blocks[2].clone()).unwrap();
        assert_eq!(done.sample_count(), 10);
        assert_eq!(done.total_samples, 10);
        assert_eq!(r.pending_count(), 0);
        match done.data().unwrap() {
            ScopeData::Float(v) => assert_eq!(v, (0..10).map(|i| i as f32).collect::<Vec<_>>()),
            other => panic!("unexpected data {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_block_replaces() {
        let mut r = ScopeReassembler::new();
        let blocks = shot(7, 8, 4);
        assert!(r.push(&path(), blocks[0].clone()).is_none());
        assert!(r.push(&path(), blocks[0].clone()).is_none());
        let done = r.push(&path(), blocks[1].clone()).unwrap();
        assert_eq!(done.blocks.len(), 2);
        assert_eq!(done.sample_count(), 8);
    }

    #[test]
    fn test_single_block_without_total() {
        let mut r = ScopeReassembler::new();
        let done = r.push(&path(), block(3, 0, &[1.0, 2.0], 0)).unwrap();
        assert_eq!(done.total_samples, 2);
    }

    #[test]
    fn test_oldest_incomplete_shot_evicted() {
        let mut r = ScopeReassembler::with_max_pending(2);
        for seq in 0..3 {
            assert!(r.push(&path(), shot(seq, 8, 4)[0].clone()).is_none());
        }
        assert_eq!(r.pending_count(), 2);
        assert_eq!(r.discarded(), 1);
        // Shot 0 is gone: its second block starts a new incomplete shot.
        assert!(r.push(&path(), shot(0, 8, 4)[1].clone()).is_none());
        // Shot 2 is still complete-able.
        assert!(r.push(&path(), shot(2, 8, 4)[1].clone()).is_some());
    }

    #[test]
    fn test_mixed_formats_have_no_data() {
        let mut r = ScopeReassembler::new();
        let mut second = block(1, 1, &[], 4);
        second.data = ScopeData::Int16(vec![1, 2]);
        second.sample_count = 2;
        r.push(&path(), block(1, 0, &[0.0, 1.0], 4));
        let done = r.push(&path(), second).unwrap();
        assert!(done.data().is_none());
    }

    /// Two interleaved shots in arbitrary block order.
    fn shuffled_shots() -> impl Strategy<Value = (usize, usize, Vec<ScopeWave>)> {
        (1usize..200, 1usize..200, 1usize..64).prop_flat_map(|(total_a, total_b, size)| {
            let blocks: Vec<ScopeWave> = shot(1, total_a, size)
                .into_iter()
                .chain(shot(2, total_b, size))
                .collect();
            (Just(total_a), Just(total_b), Just(blocks).prop_shuffle())
        })
    }

    proptest! {
        #[test]
        fn prop_shuffled_interleaved_shots_reassemble((total_a, total_b, blocks) in shuffled_shots()) {
            let mut r = ScopeReassembler::new();
            let mut done = Vec::new();
            for b in blocks {
                done.extend(r.push(&path(), b));
            }
            prop_assert_eq!(done.len(), 2);
            prop_assert_eq!(r.pending_count(), 0);
            for s in done {
                let expected = if s.sequence_number == 1 { total_a } else { total_b };
                prop_assert_eq!(s.sample_count(), expected as u64);
                prop_assert!(s.blocks.windows(2).all(|w| w[0].block_number < w[1].block_number));
            }
        }
    }
}
