//! Module result buffer
//!
//! Results are stored per node as a list of chunks. Each chunk holds one
//! unit of work (a sweep, a triggered capture, a spectrum) and a header
//! describing it. Chunk indices grow monotonically across the whole buffer,
//! so chunks of a node are always in ascending index order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use ziapi_protocol::{ChunkFlags, NodePath, Payload, Timestamp};

/// Header of one result chunk
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChunkHeader {
    /// Wall clock at creation, milliseconds since the Unix epoch
    pub system_time: u64,
    /// Device time of the first event
    pub created: Timestamp,
    /// Device time of the latest event
    pub changed: Timestamp,
    pub flags: ChunkFlags,
    pub trigger_number: u64,
    pub name: String,
}

impl ChunkHeader {
    pub fn new(name: impl Into<String>, trigger_number: u64, flags: ChunkFlags) -> Self {
        let system_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            system_time,
            created: Timestamp::ZERO,
            changed: Timestamp::ZERO,
            flags,
            trigger_number,
            name: name.into(),
        }
    }

    pub fn with_times(mut self, created: Timestamp, changed: Timestamp) -> Self {
        self.created = created;
        self.changed = changed;
        self
    }
}

/// One result chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: u64,
    pub header: ChunkHeader,
    pub events: Vec<Payload>,
}

impl Chunk {
    /// Samples over all events.
    pub fn event_count(&self) -> usize {
        self.events.iter().map(Payload::len).sum()
    }

    pub fn is_finished(&self) -> bool {
        self.header.flags.contains(ChunkFlags::FINISHED)
    }
}

/// Growable per-node chunk store shared between worker and caller
#[derive(Debug, Default)]
pub struct ResultBuffer {
    nodes: BTreeMap<NodePath, Vec<Chunk>>,
    next_index: u64,
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new chunk for `path`; returns its index.
    pub fn push_chunk(&mut self, path: NodePath, header: ChunkHeader, events: Vec<Payload>) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        self.nodes.entry(path).or_default().push(Chunk {
            index,
            header,
            events,
        });
        index
    }

    pub fn chunk_mut(&mut self, path: &NodePath, index: u64) -> Option<&mut Chunk> {
        self.nodes
            .get_mut(path)?
            .iter_mut()
            .rev()
            .find(|c| c.index == index)
    }

    pub fn get_chunk(&self, path: &NodePath, index: u64) -> Option<&Chunk> {
        self.nodes.get(path)?.iter().find(|c| c.index == index)
    }

    pub fn node_paths(&self) -> Vec<NodePath> {
        self.nodes.keys().cloned().collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Snapshot of all nodes, or of the nodes at or under `filter`.
    pub fn readout(&self, filter: Option<&NodePath>) -> ModuleReadout {
        let nodes = self
            .nodes
            .iter()
            .filter(|(path, _)| filter.is_none_or(|f| f.covers(path)))
            .map(|(path, chunks)| (path.clone(), chunks.clone()))
            .collect();
        ModuleReadout { nodes }
    }
}

/// Snapshot of module results, nodes in path order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleReadout {
    nodes: Vec<(NodePath, Vec<Chunk>)>,
}

impl ModuleReadout {
    pub fn iter(&self) -> impl Iterator<Item = (&NodePath, &[Chunk])> {
        self.nodes.iter().map(|(p, c)| (p, c.as_slice()))
    }

    pub fn get(&self, path: &NodePath) -> Option<&[Chunk]> {
        self.nodes
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, c)| c.as_slice())
    }

    pub fn paths(&self) -> impl Iterator<Item = &NodePath> {
        self.nodes.iter().map(|(p, _)| p)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl IntoIterator for ModuleReadout {
    type Item = (NodePath, Vec<Chunk>);
    type IntoIter = std::vec::IntoIter<(NodePath, Vec<Chunk>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> NodePath {
        NodePath::new(s).unwrap()
    }

    fn header(n: u64) -> ChunkHeader {
        ChunkHeader::new("test", n, ChunkFlags::VALID | ChunkFlags::DATA)
    }

    #[test]
    fn test_indices_ascend_per_node() {
        let mut buf = ResultBuffer::new();
        let a = p("/dev1/demods/0/sample");
        let b = p("/dev1/demods/1/sample");
        buf.push_chunk(a.clone(), header(1), vec![]);
        buf.push_chunk(b.clone(), header(1), vec![]);
        buf.push_chunk(a.clone(), header(2), vec![]);

        let readout = buf.readout(None);
        let chunks = readout.get(&a).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].index < chunks[1].index);
        assert_eq!(buf.chunk_count(), 3);
    }

    #[test]
    fn test_readout_filter() {
        let mut buf = ResultBuffer::new();
        buf.push_chunk(p("/dev1/demods/0/sample"), header(1), vec![]);
        buf.push_chunk(p("/dev1/auxins/0/sample"), header(1), vec![]);
        buf.push_chunk(p("/dev2/demods/0/sample"), header(1), vec![]);

        assert_eq!(buf.readout(Some(&p("/dev1"))).len(), 2);
        assert_eq!(buf.readout(Some(&p("/dev1/demods"))).len(), 1);
        assert_eq!(buf.readout(Some(&p("/*/demods/0/sample"))).len(), 2);
        assert!(buf.readout(Some(&p("/dev3"))).is_empty());
    }

    #[test]
    fn test_chunk_mut_appends() {
        let mut buf = ResultBuffer::new();
        let a = p("/dev1/demods/0/sample");
        let idx = buf.push_chunk(a.clone(), header(1), vec![Payload::DoubleScalar(vec![1.0])]);
        buf.chunk_mut(&a, idx)
            .unwrap()
            .events
            .push(Payload::DoubleScalar(vec![2.0, 3.0]));
        assert_eq!(buf.get_chunk(&a, idx).unwrap().event_count(), 3);
        assert!(buf.get_chunk(&a, idx + 1).is_none());
    }
}
