//! Subscription rules shared by the client registry and the server sessions
//!
//! Subscribing and unsubscribing are applied in order: the latest rule that
//! covers a path decides whether events on it are delivered. Unsubscribing a
//! descendant of a subscribed branch therefore carves it out of the branch.

use crate::path::{NodePath, glob_match};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Rule {
    path: NodePath,
    include: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSet {
    rules: Vec<Rule>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `path` and everything below it.
    ///
    /// Returns `false` if `path` was already subscribed.
    pub fn add(&mut self, path: NodePath) -> bool {
        let present = self.contains(&path);
        self.rules.retain(|r| !path.covers(&r.path));
        self.rules.push(Rule { path, include: true });
        !present
    }

    /// Stop delivery for `path` and everything below it.
    ///
    /// Returns how many subscriptions were dropped (zero is not an error).
    pub fn remove(&mut self, path: &NodePath) -> usize {
        let before = self.len();
        self.rules.retain(|r| !path.covers(&r.path));
        let removed = before - self.len();
        if self
            .rules
            .iter()
            .any(|r| r.include && overlaps(&r.path, path))
        {
            self.rules.push(Rule {
                path: path.clone(),
                include: false,
            });
        }
        removed
    }

    /// Whether an event on `path` is delivered.
    pub fn is_routed(&self, path: &NodePath) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|r| r.path.covers(path))
            .is_some_and(|r| r.include)
    }

    /// `path` itself was subscribed (not only covered by an ancestor).
    pub fn contains(&self, path: &NodePath) -> bool {
        self.rules.iter().any(|r| r.include && &r.path == path)
    }

    /// Subscribed paths in subscription order.
    pub fn paths(&self) -> impl Iterator<Item = &NodePath> {
        self.rules.iter().filter(|r| r.include).map(|r| &r.path)
    }

    /// Carved-out paths below a subscription.
    pub fn exclusions(&self) -> impl Iterator<Item = &NodePath> {
        self.rules.iter().filter(|r| !r.include).map(|r| &r.path)
    }

    pub fn len(&self) -> usize {
        self.paths().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `sub` may route a path at or below `path`.
fn overlaps(sub: &NodePath, path: &NodePath) -> bool {
    sub.segments()
        .zip(path.segments())
        .all(|(pattern, seg)| seg.contains('*') || glob_match(pattern, seg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(s: &str) -> NodePath {
        NodePath::new(s).unwrap()
    }

    #[test]
    fn test_unsubscribe_descendant_of_subscribed_branch() {
        let mut set = SubscriptionSet::new();
        set.add(p("/dev1/oscs"));
        assert_eq!(set.remove(&p("/dev1/oscs/0/freq")), 0);
        assert!(!set.is_routed(&p("/dev1/oscs/0/freq")));
        assert!(!set.is_routed(&p("/dev1/oscs/0/freq/sub")));
        assert!(set.is_routed(&p("/dev1/oscs/1/freq")));
        assert_eq!(set.paths().collect::<Vec<_>>(), vec![&p("/dev1/oscs")]);
        assert_eq!(set.exclusions().count(), 1);

        // subscribing again lifts the carve-out
        assert!(set.add(p("/dev1/oscs/0/freq")));
        assert!(set.is_routed(&p("/dev1/oscs/0/freq")));
        assert_eq!(set.exclusions().count(), 0);
    }

    #[test]
    fn test_wildcard_subscription_carved_by_concrete_unsubscribe() {
        let mut set = SubscriptionSet::new();
        set.add(p("/dev1/demods/*/sample"));
        set.remove(&p("/dev1/demods/2"));
        assert!(set.is_routed(&p("/dev1/demods/0/sample")));
        assert!(!set.is_routed(&p("/dev1/demods/2/sample")));
    }

    #[test]
    fn test_unrelated_unsubscribe_leaves_no_rule() {
        let mut set = SubscriptionSet::new();
        set.add(p("/dev1/demods/0/sample"));
        assert_eq!(set.remove(&p("/dev1/auxins/0/sample")), 0);
        assert_eq!(set.exclusions().count(), 0);
        assert_eq!(set.remove(&p("/dev1")), 1);
        assert!(set.is_empty());
        assert_eq!(set.exclusions().count(), 0);
    }

    #[test]
    fn test_resubscribe_inside_carved_branch() {
        let mut set = SubscriptionSet::new();
        set.add(p("/dev1/oscs"));
        set.remove(&p("/dev1/oscs/0"));
        set.add(p("/dev1/oscs/0/freq"));
        assert!(set.is_routed(&p("/dev1/oscs/0/freq")));
        assert!(!set.is_routed(&p("/dev1/oscs/0/phase")));
        assert!(set.is_routed(&p("/dev1/oscs/1/phase")));
    }

    proptest! {
        #[test]
        fn prop_latest_operation_wins(
            ops in prop::collection::vec((any::<bool>(), 0usize..4), 1..12),
            osc in 0u32..2,
        ) {
            let targets = ["/dev1/oscs", "/dev1/oscs/0", "/dev1/oscs/1", "/dev1/oscs/*/freq"];
            let mut set = SubscriptionSet::new();
            for (subscribe, target) in &ops {
                if *subscribe {
                    set.add(p(targets[*target]));
                } else {
                    set.remove(&p(targets[*target]));
                }
            }
            let leaf = p(&format!("/dev1/oscs/{osc}/freq"));
            let expected = ops
                .iter()
                .rev()
                .find(|(_, t)| p(targets[*t]).covers(&leaf))
                .is_some_and(|(subscribe, _)| *subscribe);
            prop_assert_eq!(set.is_routed(&leaf), expected);
        }
    }
}
