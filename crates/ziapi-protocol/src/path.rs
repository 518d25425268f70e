//! Node paths
//!
//! A node path addresses a parameter or stream endpoint in the server's
//! hierarchical namespace, e.g. `/dev1234/demods/0/sample`.
//!
//! Paths are normalised on construction (leading `/`, no trailing `/`,
//! lowercase) because the server treats them case-insensitively. A segment may
//! contain `*`, which matches any run of characters within that one segment.

use crate::{MAX_NAME_LEN, MAX_PATH_LEN};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Wildcard character accepted inside path segments
pub const WILDCARD: char = '*';

/// Path validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Path is empty")]
    Empty,

    #[error("Path too long: {len} bytes (max {max})", max = MAX_PATH_LEN - 1)]
    TooLong { len: usize },

    #[error("Path contains an empty segment: {path:?}")]
    EmptySegment { path: String },

    #[error("Segment {segment:?} exceeds {max} bytes", max = MAX_NAME_LEN)]
    SegmentTooLong { segment: String },

    #[error("Invalid character {ch:?} in segment {segment:?}")]
    InvalidChar { ch: char, segment: String },
}

/// Validated, immutable node path
///
/// Cloning is cheap (shared string).
///
/// # Example
///
/// ```rust
/// use ziapi_protocol::NodePath;
///
/// let sub: NodePath = "/DEV1234/demods".parse().unwrap();
/// let sample: NodePath = "dev1234/demods/0/sample".parse().unwrap();
/// assert!(sub.covers(&sample));
/// assert_eq!(sample.as_str(), "/dev1234/demods/0/sample");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath(Arc<str>);

impl NodePath {
    /// Root of the namespace (`/`)
    pub fn root() -> Self {
        Self(Arc::from("/"))
    }

    /// Parse and normalise a path.
    pub fn new(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }

        let body = trimmed.trim_start_matches('/').trim_end_matches('/');
        if body.is_empty() {
            return Ok(Self::root());
        }

        let mut normalised = String::with_capacity(body.len() + 1);
        for segment in body.split('/') {
            validate_segment(segment, body)?;
            normalised.push('/');
            normalised.push_str(&segment.to_ascii_lowercase());
        }

        if normalised.len() > MAX_PATH_LEN - 1 {
            return Err(PathError::TooLong {
                len: normalised.len(),
            });
        }

        Ok(Self(Arc::from(normalised)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        &*self.0 == "/"
    }

    /// Iterate over segments (the root has none).
    pub fn segments(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    fn segment_vec(&self) -> SmallVec<[&str; 8]> {
        self.segments().collect()
    }

    /// True if any segment contains a wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.0.contains(WILDCARD)
    }

    /// First segment, conventionally the device id (e.g. `dev1234`).
    pub fn device(&self) -> Option<&str> {
        self.segments().next()
    }

    /// Last segment (the node's own name).
    pub fn name(&self) -> Option<&str> {
        self.segments().last()
    }

    pub fn parent(&self) -> Option<NodePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(Arc::from(&self.0[..idx]))),
            None => None,
        }
    }

    /// Append one or more segments (`a/b` is accepted).
    pub fn join(&self, tail: &str) -> Result<NodePath, PathError> {
        if self.is_root() {
            Self::new(tail)
        } else {
            Self::new(&format!("{}/{}", self.0, tail.trim_start_matches('/')))
        }
    }

    /// Segment-prefix test: `/a/b` is an ancestor of `/a/b/c` but not of `/a/bc`.
    ///
    /// Wildcards are compared literally; use [`NodePath::covers`] for patterns.
    pub fn is_ancestor_or_self_of(&self, other: &NodePath) -> bool {
        let mine = self.segment_vec();
        let theirs = other.segment_vec();
        mine.len() <= theirs.len() && mine.iter().zip(theirs.iter()).all(|(a, b)| a == b)
    }

    /// Pattern prefix test used for subscription routing.
    ///
    /// Each segment of `self` is glob-matched against the segment at the same
    /// depth of `other`; remaining segments of `other` are descendants.
    pub fn covers(&self, other: &NodePath) -> bool {
        let mine = self.segment_vec();
        let theirs = other.segment_vec();
        mine.len() <= theirs.len()
            && mine
                .iter()
                .zip(theirs.iter())
                .all(|(pattern, seg)| glob_match(pattern, seg))
    }

    /// Exact pattern test: same depth, every segment glob-matches.
    pub fn matches(&self, other: &NodePath) -> bool {
        self.depth() == other.depth() && self.covers(other)
    }

    /// Longest leading run of segments without wildcards.
    pub fn concrete_prefix(&self) -> NodePath {
        let mut out = String::new();
        for seg in self.segments() {
            if seg.contains(WILDCARD) {
                break;
            }
            out.push('/');
            out.push_str(seg);
        }
        if out.is_empty() {
            Self::root()
        } else {
            Self(Arc::from(out))
        }
    }

    /// Path relative to `base`, without leading slash.
    ///
    /// Returns `None` if `base` is not an ancestor of `self`.
    pub fn relative_to(&self, base: &NodePath) -> Option<String> {
        if !base.is_ancestor_or_self_of(self) {
            return None;
        }
        let rest: Vec<&str> = self.segments().skip(base.depth()).collect();
        Some(rest.join("/"))
    }
}

fn validate_segment(segment: &str, path: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::EmptySegment {
            path: path.to_string(),
        });
    }
    if segment.len() > MAX_NAME_LEN {
        return Err(PathError::SegmentTooLong {
            segment: segment.to_string(),
        });
    }
    if let Some(ch) = segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(*c, '_' | '-' | '.' | WILDCARD)))
    {
        return Err(PathError::InvalidChar {
            ch,
            segment: segment.to_string(),
        });
    }
    Ok(())
}

/// Glob match of a single segment, `*` matching any run (including empty).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ti < t.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            pi += 1;
            mark = ti;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePath({})", self.0)
    }
}

impl FromStr for NodePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for NodePath {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for NodePath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.0.to_string()
    }
}

impl AsRef<str> for NodePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(s: &str) -> NodePath {
        NodePath::new(s).unwrap()
    }

    #[test]
    fn test_normalisation() {
        assert_eq!(p("DEV1234/Demods/0/").as_str(), "/dev1234/demods/0");
        assert_eq!(p("/").as_str(), "/");
        assert!(p("///").is_root());
    }

    #[test]
    fn test_rejects_invalid() {
        assert_eq!(NodePath::new(""), Err(PathError::Empty));
        assert!(matches!(
            NodePath::new("/dev//x"),
            Err(PathError::EmptySegment { .. })
        ));
        assert!(matches!(
            NodePath::new("/dev 1"),
            Err(PathError::InvalidChar { ch: ' ', .. })
        ));
        let long_segment = "a".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            NodePath::new(&long_segment),
            Err(PathError::SegmentTooLong { .. })
        ));
        let long_path = "/abcdefgh".repeat(40);
        assert!(matches!(
            NodePath::new(&long_path),
            Err(PathError::TooLong { .. })
        ));
    }

    #[test]
    fn test_accepts_punctuation_and_wildcard() {
        assert_eq!(p("/dev1/a_b-c.d").as_str(), "/dev1/a_b-c.d");
        assert!(p("/dev1/demods/*/sample").is_wildcard());
        assert!(matches!(
            NodePath::new("/dev1/x+y"),
            Err(PathError::InvalidChar { ch: '+', .. })
        ));
    }

    #[test]
    fn test_segment_prefix_not_substring() {
        let sub = p("/dev1/demods/0");
        assert!(sub.is_ancestor_or_self_of(&p("/dev1/demods/0")));
        assert!(sub.is_ancestor_or_self_of(&p("/dev1/demods/0/sample")));
        assert!(!sub.is_ancestor_or_self_of(&p("/dev1/demods/01/sample")));
        assert!(!sub.is_ancestor_or_self_of(&p("/dev1/demods")));
        assert!(NodePath::root().is_ancestor_or_self_of(&sub));
    }

    #[test]
    fn test_wildcards() {
        let pattern = p("/dev1234/demods/*/enable");
        assert!(pattern.is_wildcard());
        assert!(pattern.matches(&p("/dev1234/demods/3/enable")));
        assert!(!pattern.matches(&p("/dev1234/demods/3/rate")));
        assert!(!pattern.matches(&p("/dev1234/demods/3/enable/x")));
        assert!(pattern.covers(&p("/dev1234/demods/3/enable/x")));
        assert!(p("/dev*/sigouts").covers(&p("/dev88/sigouts/0/on")));
        assert_eq!(pattern.concrete_prefix().as_str(), "/dev1234/demods");
    }

    #[test]
    fn test_parent_join_relative() {
        let path = p("/dev1/pids/0/setpoint");
        assert_eq!(path.parent().unwrap().as_str(), "/dev1/pids/0");
        assert_eq!(p("/dev1").parent().unwrap(), NodePath::root());
        assert_eq!(NodePath::root().parent(), None);
        assert_eq!(p("/dev1").join("pids/0").unwrap().as_str(), "/dev1/pids/0");
        assert_eq!(path.relative_to(&p("/dev1/pids")).unwrap(), "0/setpoint");
        assert_eq!(path.relative_to(&p("/dev2")), None);
        assert_eq!(path.device(), Some("dev1"));
        assert_eq!(path.name(), Some("setpoint"));
    }

    #[test]
    fn test_serde_roundtrip_normalises() {
        let json = serde_json::to_string(&p("/dev1/x")).unwrap();
        assert_eq!(json, "\"/dev1/x\"");
        let back: NodePath = serde_json::from_str("\"DEV1/X\"").unwrap();
        assert_eq!(back, p("/dev1/x"));
        assert!(serde_json::from_str::<NodePath>("\"/a b\"").is_err());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", ""));
        assert!(glob_match("dev*", "dev1234"));
        assert!(glob_match("*4", "dev1234"));
        assert!(glob_match("d*1*4", "dev1234"));
        assert!(!glob_match("dev*5", "dev1234"));
    }

    proptest! {
        #[test]
        fn prop_ancestor_of_joined(
            base in prop::collection::vec("[a-z0-9]{1,8}", 1..5),
            tail in prop::collection::vec("[a-z0-9]{1,8}", 0..4),
        ) {
            let parent = NodePath::new(&base.join("/")).unwrap();
            let child = if tail.is_empty() {
                parent.clone()
            } else {
                parent.join(&tail.join("/")).unwrap()
            };
            prop_assert!(parent.is_ancestor_or_self_of(&child));
            prop_assert!(parent.covers(&child));
            prop_assert_eq!(child.depth(), base.len() + tail.len());
        }
    }
}
