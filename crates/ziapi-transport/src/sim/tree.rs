//! Node tree of the simulated server

use std::collections::{BTreeMap, BTreeSet};
use ziapi_protocol::{ListNodesFlags, NodePath, ResultCode, Value, ValueType, VectorElements};

/// Streaming node kinds; the index is the channel number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Demod(u8),
    AuxIn(u8),
    Dio(u8),
    PidValue(u8),
    Scope(u8),
    Counter(u8),
    Trigger(u8),
    Impedance(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Scalar(Value),
    Vector(VectorElements),
    Stream(StreamKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeProps {
    pub read_only: bool,
    pub setting: bool,
    pub streaming: bool,
    pub gettable: bool,
}

/// Hardware limits applied to numeric sets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub min: f64,
    pub max: f64,
}

impl Limits {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeEntry {
    pub value: NodeValue,
    pub props: NodeProps,
    pub limits: Option<Limits>,
}

/// Leaf nodes keyed by path; branches are implied by leaf ancestry.
#[derive(Debug, Default, Clone)]
pub struct NodeTree {
    nodes: BTreeMap<NodePath, NodeEntry>,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn insert_setting(&mut self, path: NodePath, value: Value, limits: Option<Limits>) {
        self.nodes.insert(
            path,
            NodeEntry {
                value: NodeValue::Scalar(value),
                props: NodeProps {
                    read_only: false,
                    setting: true,
                    streaming: false,
                    gettable: true,
                },
                limits,
            },
        );
    }

    pub fn insert_read_only(&mut self, path: NodePath, value: Value) {
        self.nodes.insert(
            path,
            NodeEntry {
                value: NodeValue::Scalar(value),
                props: NodeProps {
                    read_only: true,
                    setting: false,
                    streaming: false,
                    gettable: true,
                },
                limits: None,
            },
        );
    }

    pub fn insert_stream(&mut self, path: NodePath, kind: StreamKind) {
        self.nodes.insert(
            path,
            NodeEntry {
                value: NodeValue::Stream(kind),
                props: NodeProps {
                    read_only: true,
                    setting: false,
                    streaming: true,
                    gettable: false,
                },
                limits: None,
            },
        );
    }

    pub fn insert_vector(&mut self, path: NodePath, initial: VectorElements) {
        self.nodes.insert(
            path,
            NodeEntry {
                value: NodeValue::Vector(initial),
                props: NodeProps {
                    read_only: false,
                    setting: true,
                    streaming: false,
                    gettable: true,
                },
                limits: None,
            },
        );
    }

    pub fn get(&self, path: &NodePath) -> Option<&NodeEntry> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &NodePath) -> bool {
        self.nodes.contains_key(path)
    }

    /// Scalar value of a leaf, if present.
    pub fn scalar(&self, path: &NodePath) -> Option<&Value> {
        match self.nodes.get(path).map(|e| &e.value) {
            Some(NodeValue::Scalar(v)) => Some(v),
            _ => None,
        }
    }

    pub fn f64_at(&self, path: &str) -> Option<f64> {
        NodePath::new(path)
            .ok()
            .and_then(|p| self.scalar(&p).and_then(Value::as_f64))
    }

    pub fn i64_at(&self, path: &str) -> Option<i64> {
        NodePath::new(path)
            .ok()
            .and_then(|p| self.scalar(&p).and_then(Value::as_i64))
    }

    /// Leaves matching `pattern` at the same depth, in path order.
    pub fn matching<'a>(
        &'a self,
        pattern: &'a NodePath,
    ) -> impl Iterator<Item = (&'a NodePath, &'a NodeEntry)> + 'a {
        self.nodes.iter().filter(move |(p, _)| pattern.matches(p))
    }

    /// Leaves at or below `pattern`.
    pub fn covered<'a>(
        &'a self,
        pattern: &'a NodePath,
    ) -> impl Iterator<Item = (&'a NodePath, &'a NodeEntry)> + 'a {
        self.nodes.iter().filter(move |(p, _)| pattern.covers(p))
    }

    /// First leaf matching `pattern`.
    pub fn resolve_first<'a>(&'a self, pattern: &'a NodePath) -> Option<(&'a NodePath, &'a NodeEntry)> {
        if !pattern.is_wildcard() {
            return self.nodes.get_key_value(pattern);
        }
        self.matching(pattern).next()
    }

    /// Remove every leaf at or below `prefix`.
    pub fn remove_subtree(&mut self, prefix: &NodePath) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|p, _| !prefix.is_ancestor_or_self_of(p));
        before - self.nodes.len()
    }

    /// Write `value` to the leaf at `path`, returning the effective value.
    pub fn set(&mut self, path: &NodePath, value: Value) -> Result<Value, ResultCode> {
        let entry = self.nodes.get_mut(path).ok_or(ResultCode::NotFound)?;
        if entry.props.read_only {
            return Err(ResultCode::ReadOnly);
        }
        match &mut entry.value {
            NodeValue::Stream(_) => Err(ResultCode::ReadOnly),
            NodeValue::Vector(current) => {
                *current = match value {
                    Value::Bytes(b) => VectorElements::U8(b),
                    Value::String(s) => VectorElements::Ascii(s),
                    _ => return Err(ResultCode::DataTypeMismatch),
                };
                Ok(vector_as_value(current))
            },
            NodeValue::Scalar(current) => {
                let target = current.value_type();
                let mut coerced = value
                    .coerce(target)
                    .map_err(|_| ResultCode::DataTypeMismatch)?;
                if let Some(limits) = entry.limits {
                    coerced = match coerced {
                        Value::Double(v) => Value::Double(limits.clamp(v)),
                        Value::Integer(v) => Value::Integer(limits.clamp(v as f64).round() as i64),
                        other => other,
                    };
                }
                *current = coerced.clone();
                Ok(coerced)
            },
        }
    }

    /// Replace a vector leaf.
    pub fn write_vector(&mut self, path: &NodePath, data: VectorElements) -> Result<(), ResultCode> {
        let entry = self.nodes.get_mut(path).ok_or(ResultCode::NotFound)?;
        match &mut entry.value {
            NodeValue::Vector(current) => {
                *current = data;
                Ok(())
            },
            _ => Err(ResultCode::DataTypeMismatch),
        }
    }

    /// List nodes for `pattern` under `flags`.
    ///
    /// Non-recursive listing returns the nodes at the pattern's own depth for
    /// wildcard or leaf patterns, and the direct children of a concrete branch
    /// otherwise. Branch nodes are only listed when no leaf-only filter is set.
    pub fn list(
        &self,
        pattern: &NodePath,
        flags: ListNodesFlags,
        is_subscribed: impl Fn(&NodePath) -> bool,
    ) -> Vec<NodePath> {
        let leaf_filters = ListNodesFlags::SETTINGS_ONLY
            | ListNodesFlags::STREAMING_ONLY
            | ListNodesFlags::GET_ONLY
            | ListNodesFlags::SUBSCRIBED_ONLY
            | ListNodesFlags::LEAVES_ONLY;
        let include_branches = !flags.intersects(leaf_filters);
        let recursive = flags.contains(ListNodesFlags::RECURSIVE);

        let base_depth = pattern.depth();
        let target_depth = if pattern.is_wildcard() || self.nodes.contains_key(pattern) {
            base_depth
        } else {
            base_depth + 1
        };

        let mut out = BTreeSet::new();
        for (leaf, entry) in self.nodes.iter().filter(|(p, _)| pattern.covers(p)) {
            let segments: Vec<&str> = leaf.segments().collect();
            let leaf_depth = segments.len();
            if leaf_depth < target_depth {
                continue;
            }
            let max_depth = if recursive { leaf_depth } else { target_depth };

            for depth in target_depth.max(1)..=max_depth {
                let is_leaf = depth == leaf_depth;
                if !is_leaf && !include_branches {
                    continue;
                }
                let candidate_segments = &segments[..depth];
                if flags.contains(ListNodesFlags::BASE_CHANNEL)
                    && !is_base_channel(candidate_segments)
                {
                    continue;
                }
                let Ok(candidate) = NodePath::new(&candidate_segments.join("/")) else {
                    continue;
                };
                if is_leaf && !leaf_passes(&candidate, entry, flags, &is_subscribed) {
                    continue;
                }
                out.insert(candidate);
            }
        }
        out.into_iter().collect()
    }
}

fn is_base_channel(segments: &[&str]) -> bool {
    segments
        .iter()
        .filter(|s| s.chars().all(|c| c.is_ascii_digit()))
        .all(|s| *s == "0")
}

fn leaf_passes(
    path: &NodePath,
    entry: &NodeEntry,
    flags: ListNodesFlags,
    is_subscribed: &impl Fn(&NodePath) -> bool,
) -> bool {
    (!flags.contains(ListNodesFlags::SETTINGS_ONLY) || entry.props.setting)
        && (!flags.contains(ListNodesFlags::STREAMING_ONLY) || entry.props.streaming)
        && (!flags.contains(ListNodesFlags::GET_ONLY) || entry.props.gettable)
        && (!flags.contains(ListNodesFlags::SUBSCRIBED_ONLY) || is_subscribed(path))
}

/// Scalar view of a vector node for get replies.
pub fn vector_as_value(v: &VectorElements) -> Value {
    match v {
        VectorElements::U8(b) => Value::Bytes(b.clone()),
        VectorElements::Ascii(s) => Value::String(s.clone()),
        other => Value::Bytes(
            format!("<vector of {} elements>", other.len()).into_bytes(),
        ),
    }
}

/// Value type a get on `entry` naturally yields.
pub fn natural_type(entry: &NodeEntry) -> Option<ValueType> {
    match &entry.value {
        NodeValue::Scalar(v) => Some(v.value_type()),
        NodeValue::Vector(VectorElements::Ascii(_)) => Some(ValueType::String),
        NodeValue::Vector(_) => Some(ValueType::Bytes),
        NodeValue::Stream(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(s: &str) -> NodePath {
        NodePath::new(s).unwrap()
    }

    fn tree() -> NodeTree {
        let mut t = NodeTree::new();
        for i in 0..3 {
            t.insert_setting(p(&format!("/dev1/demods/{i}/enable")), Value::Integer(0), None);
            t.insert_setting(
                p(&format!("/dev1/demods/{i}/rate")),
                Value::Double(1e3),
                Some(Limits::new(1.0, 1e6)),
            );
            t.insert_stream(p(&format!("/dev1/demods/{i}/sample")), StreamKind::Demod(i));
        }
        t.insert_read_only(p("/dev1/clockbase"), Value::Double(60e6));
        t
    }

    #[test]
    fn test_list_wildcard_non_recursive() {
        let t = tree();
        let out = t.list(&p("/dev1/demods/*/enable"), ListNodesFlags::empty(), |_| false);
        assert_eq!(
            out,
            vec![
                p("/dev1/demods/0/enable"),
                p("/dev1/demods/1/enable"),
                p("/dev1/demods/2/enable")
            ]
        );
    }

    #[test]
    fn test_list_children_of_branch() {
        let t = tree();
        let out = t.list(&p("/dev1"), ListNodesFlags::empty(), |_| false);
        assert_eq!(out, vec![p("/dev1/clockbase"), p("/dev1/demods")]);

        let roots = t.list(&NodePath::root(), ListNodesFlags::empty(), |_| false);
        assert_eq!(roots, vec![p("/dev1")]);
    }

    #[test]
    fn test_list_recursive_filters() {
        let t = tree();
        let all = t.list(&p("/dev1/demods"), ListNodesFlags::RECURSIVE, |_| false);
        assert!(all.contains(&p("/dev1/demods/0")));
        assert!(all.contains(&p("/dev1/demods/2/sample")));

        let streaming = t.list(
            &p("/dev1"),
            ListNodesFlags::RECURSIVE | ListNodesFlags::STREAMING_ONLY,
            |_| false,
        );
        assert_eq!(streaming.len(), 3);

        let settings_base = t.list(
            &p("/dev1"),
            ListNodesFlags::RECURSIVE
                | ListNodesFlags::SETTINGS_ONLY
                | ListNodesFlags::BASE_CHANNEL,
            |_| false,
        );
        assert_eq!(
            settings_base,
            vec![p("/dev1/demods/0/enable"), p("/dev1/demods/0/rate")]
        );

        let subscribed = t.list(
            &p("/dev1"),
            ListNodesFlags::RECURSIVE | ListNodesFlags::SUBSCRIBED_ONLY,
            |path| path.as_str().starts_with("/dev1/demods/1"),
        );
        assert_eq!(subscribed.len(), 3);

        let gettable = t.list(
            &p("/dev1"),
            ListNodesFlags::RECURSIVE | ListNodesFlags::GET_ONLY,
            |_| false,
        );
        assert!(!gettable.iter().any(|n| n.name() == Some("sample")));
    }

    #[test]
    fn test_list_no_match() {
        let t = tree();
        assert!(t.list(&p("/dev2"), ListNodesFlags::RECURSIVE, |_| false).is_empty());
    }

    #[test]
    fn test_set_clamps_and_guards() {
        let mut t = tree();
        assert_eq!(
            t.set(&p("/dev1/demods/0/rate"), Value::Double(5e6)),
            Ok(Value::Double(1e6))
        );
        assert_eq!(
            t.set(&p("/dev1/demods/0/enable"), Value::Double(1.4)),
            Ok(Value::Integer(1))
        );
        assert_eq!(
            t.set(&p("/dev1/clockbase"), Value::Double(1.0)),
            Err(ResultCode::ReadOnly)
        );
        assert_eq!(
            t.set(&p("/dev1/demods/0/sample"), Value::Double(1.0)),
            Err(ResultCode::ReadOnly)
        );
        assert_eq!(
            t.set(&p("/dev1/nothing"), Value::Double(1.0)),
            Err(ResultCode::NotFound)
        );
        assert_eq!(
            t.set(&p("/dev1/demods/0/rate"), Value::from("fast")),
            Err(ResultCode::DataTypeMismatch)
        );
    }

    #[test]
    fn test_remove_subtree() {
        let mut t = tree();
        let removed = t.remove_subtree(&p("/dev1/demods/1"));
        assert_eq!(removed, 3);
        assert!(!t.contains(&p("/dev1/demods/1/rate")));
        assert!(t.contains(&p("/dev1/demods/2/rate")));
    }

    #[test]
    fn test_resolve_first() {
        let t = tree();
        let pattern = p("/dev1/demods/*/rate");
        let (path, _) = t.resolve_first(&pattern).unwrap();
        assert_eq!(path, &p("/dev1/demods/0/rate"));
        assert!(t.resolve_first(&p("/dev1/demods/*/missing")).is_none());
    }

    proptest! {
        #[test]
        fn prop_resolve_first_agrees_with_matching(
            index in proptest::option::of(0u32..4),
            leaf in prop::sample::select(vec!["enable", "rate", "sample", "phase"]),
        ) {
            let t = tree();
            let channel = index.map_or("*".to_string(), |i| i.to_string());
            let pattern = p(&format!("/dev1/demods/{channel}/{leaf}"));
            let first = t.resolve_first(&pattern).map(|(path, _)| path.clone());
            let expected = t.matching(&pattern).next().map(|(path, _)| path.clone());
            prop_assert_eq!(&first, &expected);
            if let Some(path) = first {
                prop_assert!(pattern.matches(&path));
            }
        }
    }
}
