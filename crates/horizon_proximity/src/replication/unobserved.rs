//! Deadline queue for replicated nodes nobody is observing any more.

use crate::types::IndexNode;
use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;

/// Nodes ordered by the time they become eligible for coarsening.
///
/// A node appears at most once. Re-inserting a node that is already
/// waiting keeps its original deadline.
#[derive(Debug, Default)]
pub struct UnobservedTimeouts {
    by_deadline: BTreeMap<(Instant, u64), IndexNode>,
    by_node: HashMap<IndexNode, (Instant, u64)>,
    next_seq: u64,
}

impl UnobservedTimeouts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the node was already waiting.
    pub fn insert(&mut self, node: IndexNode, expires: Instant) -> bool {
        if self.by_node.contains_key(&node) {
            return false;
        }
        let key = (expires, self.next_seq);
        self.next_seq += 1;
        self.by_deadline.insert(key, node);
        self.by_node.insert(node, key);
        true
    }

    pub fn cancel(&mut self, node: &IndexNode) -> bool {
        match self.by_node.remove(node) {
            Some(key) => {
                self.by_deadline.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, node: &IndexNode) -> bool {
        self.by_node.contains_key(node)
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.by_deadline.keys().next().map(|(expires, _)| *expires)
    }

    /// Removes and returns every node whose deadline is at or before `now`,
    /// earliest first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<IndexNode> {
        let mut expired = Vec::new();
        while let Some(entry) = self.by_deadline.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let node = entry.remove();
            self.by_node.remove(&node);
            expired.push(node);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityId, TreeId};
    use std::time::Duration;

    fn node(tree: u32) -> IndexNode {
        IndexNode {
            tree: TreeId(tree),
            node: EntityId::new(),
        }
    }

    #[test]
    fn test_pop_expired_in_deadline_order() {
        let mut timeouts = UnobservedTimeouts::new();
        let start = Instant::now();
        let (a, b, c) = (node(1), node(1), node(2));
        timeouts.insert(b, start + Duration::from_secs(2));
        timeouts.insert(a, start + Duration::from_secs(1));
        timeouts.insert(c, start + Duration::from_secs(5));

        assert_eq!(timeouts.next_expiry(), Some(start + Duration::from_secs(1)));
        assert_eq!(timeouts.pop_expired(start + Duration::from_secs(2)), vec![a, b]);
        assert_eq!(timeouts.len(), 1);
        assert!(timeouts.pop_expired(start + Duration::from_secs(3)).is_empty());
    }

    #[test]
    fn test_reinsert_keeps_deadline_and_cancel_removes() {
        let mut timeouts = UnobservedTimeouts::new();
        let start = Instant::now();
        let a = node(1);
        assert!(timeouts.insert(a, start + Duration::from_secs(1)));
        assert!(!timeouts.insert(a, start + Duration::from_secs(9)));
        assert_eq!(timeouts.next_expiry(), Some(start + Duration::from_secs(1)));

        assert!(timeouts.cancel(&a));
        assert!(!timeouts.cancel(&a));
        assert!(timeouts.is_empty());
        assert_eq!(timeouts.next_expiry(), None);
    }
}
