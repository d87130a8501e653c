//! Tree node bookkeeping: run lists and aggregate statistics.

use crate::tree::kvset::Kvset;

/// Stable identity of a node in the tree arena.
pub type NodeId = u32;

/// Aggregate statistics for one node, recomputed whenever its run list
/// changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Number of kvsets held by the node.
    pub kvsets: usize,
    /// Total logical size of the node's kvsets in bytes.
    pub alen: u64,
    /// Total estimated garbage bytes.
    pub garbage_bytes: u64,
    /// Total key count.
    pub keys: u64,
    /// Byte-weighted scatter measure in `0..=100`.
    pub scatter_pct: u8,
    /// Scheduling cycles since the node last completed maintenance.
    pub idle_cycles: u32,
}

impl NodeStats {
    /// Garbage as a percentage of logical size, zero for an empty node.
    pub fn garbage_pct(&self) -> u8 {
        if self.alen == 0 {
            return 0;
        }
        // Widen so storage-layer stats near u64::MAX cannot overflow.
        ((u128::from(self.garbage_bytes) * 100) / u128::from(self.alen)).min(100) as u8
    }
}

/// One position in the index tree.
///
/// The arena owns every node; children are referenced by id only. A node's
/// `high_key` is the inclusive upper bound of the key range it covers, and
/// the high keys of its children partition that range in order.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) depth: u16,
    pub(crate) high_key: Vec<u8>,
    /// Child ids in key order; empty for leaves.
    pub(crate) children: Vec<NodeId>,
    /// Kvsets, newest first.
    pub(crate) kvsets: Vec<Kvset>,
    pub(crate) stats: NodeStats,
}

impl Node {
    pub(crate) fn new(id: NodeId, depth: u16, high_key: Vec<u8>) -> Self {
        Self {
            id,
            depth,
            high_key,
            children: Vec::new(),
            kvsets: Vec::new(),
            stats: NodeStats::default(),
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Recompute aggregates from the run list, preserving `idle_cycles`.
    pub(crate) fn recompute_stats(&mut self) {
        let idle = self.stats.idle_cycles;
        let mut stats = NodeStats {
            kvsets: self.kvsets.len(),
            idle_cycles: idle,
            ..NodeStats::default()
        };
        let mut scatter_weighted: u128 = 0;
        for kvset in &self.kvsets {
            let ks = kvset.stats();
            stats.alen = stats.alen.saturating_add(ks.bytes);
            stats.garbage_bytes = stats.garbage_bytes.saturating_add(ks.garbage_bytes);
            stats.keys = stats.keys.saturating_add(ks.keys);
            scatter_weighted += u128::from(ks.scatter) * u128::from(ks.bytes);
        }
        if stats.alen > 0 {
            stats.scatter_pct = (scatter_weighted / u128::from(stats.alen)).min(100) as u8;
        }
        self.stats = stats;
    }

    /// Generation numbers oldest first.
    pub(crate) fn gens_oldest_first(&self) -> Vec<u64> {
        self.kvsets.iter().rev().map(Kvset::gen).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::kvset::{Kvset, KvsetStats};

    fn kvset(gen: u64, bytes: u64, garbage: u64, scatter: u8) -> Kvset {
        Kvset::new(
            gen,
            KvsetStats {
                bytes,
                keys: 10,
                garbage_bytes: garbage,
                scatter,
                min_key: vec![0],
                max_key: vec![255],
            },
        )
    }

    #[test]
    fn stats_aggregate_over_runs() {
        let mut node = Node::new(1, 1, vec![0xff]);
        node.kvsets.insert(0, kvset(1, 100, 20, 0));
        node.kvsets.insert(0, kvset(2, 300, 60, 100));
        node.stats.idle_cycles = 5;
        node.recompute_stats();

        assert_eq!(node.stats.kvsets, 2);
        assert_eq!(node.stats.alen, 400);
        assert_eq!(node.stats.garbage_bytes, 80);
        assert_eq!(node.stats.keys, 20);
        assert_eq!(node.stats.garbage_pct(), 20);
        // 300 of 400 bytes carry scatter 100.
        assert_eq!(node.stats.scatter_pct, 75);
        // Recompute preserves the idle counter.
        assert_eq!(node.stats.idle_cycles, 5);
    }

    #[test]
    fn stats_saturate_on_extreme_sizes() {
        let mut node = Node::new(1, 1, vec![0xff]);
        node.kvsets.insert(0, kvset(1, u64::MAX, u64::MAX, 100));
        node.kvsets.insert(0, kvset(2, 1024, 1024, 50));
        node.recompute_stats();

        assert_eq!(node.stats.alen, u64::MAX);
        assert_eq!(node.stats.garbage_bytes, u64::MAX);
        assert_eq!(node.stats.garbage_pct(), 100);
        assert!(node.stats.scatter_pct <= 100);
    }

    #[test]
    fn empty_node_has_zero_garbage_pct() {
        let node = Node::new(1, 0, vec![0xff]);
        assert_eq!(node.stats.garbage_pct(), 0);
    }

    #[test]
    fn gens_are_reported_oldest_first() {
        let mut node = Node::new(1, 0, vec![0xff]);
        for gen in 1..=3 {
            node.kvsets.insert(0, kvset(gen, 10, 0, 0));
        }
        assert_eq!(node.gens_oldest_first(), vec![1, 2, 3]);
    }
}
