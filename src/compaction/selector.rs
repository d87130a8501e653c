//! Pure work selection: per-node statistics and thresholds in, an optional
//! work item out.
//!
//! `select` is deterministic and side-effect free, so policy can be tested
//! directly on synthetic snapshots without constructing a live tree. For a
//! single node, work kinds are evaluated in a fixed priority order and the
//! first eligible kind wins; ranking *across* nodes is the scheduler's job.

use crate::{
    config::{
        Thresholds, ISPILL_KVSETS_FLOOR, LCOMP_KVSETS_FLOOR, LSCATTER_KVSETS_FLOOR,
        RSPILL_KVSETS_FLOOR, RUNLEN_FLOOR,
    },
    tree::{NodeId, NodeStats},
};

/// The kinds of maintenance work, highest priority first.
///
/// Idle compaction deliberately outranks leaf scatter: a cold node is
/// cheapest to tidy before more scatter accrues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkKind {
    /// Move the root's accumulated runs down into the tree.
    RootSpill,
    /// Push an oversized internal node's content toward the leaves.
    InternalSpill,
    /// Merge runs to bound per-lookup probe cost, regardless of size.
    RunLength,
    /// Tidy a node that has been cold for too many cycles.
    Idle,
    /// Compact away superseded and tombstoned entries in a leaf.
    LeafGarbage,
    /// Split an oversized leaf into two new leaves.
    LeafSize,
    /// Restore range-scan locality in a scattered leaf.
    LeafScatter,
}

impl WorkKind {
    /// Number of work kinds.
    pub const COUNT: usize = 7;

    /// Dense index, usable for per-kind counters.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Ranking weight; higher is more urgent.
    pub(crate) fn weight(&self) -> u32 {
        (Self::COUNT - self.index()) as u32
    }

    /// Stable lowercase name for logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RootSpill => "rspill",
            Self::InternalSpill => "ispill",
            Self::RunLength => "runlen",
            Self::Idle => "idle",
            Self::LeafGarbage => "garbage",
            Self::LeafSize => "split",
            Self::LeafScatter => "scatter",
        }
    }
}

/// Where a work item's output lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkTarget {
    /// In-place compaction within the source node.
    Source,
    /// Spill into the source node's children (created if it has none).
    Children,
    /// Split into two new leaves replacing the source's range.
    Split,
}

/// A proposed unit of maintenance work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    /// Which maintenance operation to run.
    pub kind: WorkKind,
    /// The node the work reads from.
    pub node: NodeId,
    /// Participating kvset generations, oldest first.
    pub inputs: Vec<u64>,
    /// Where the output lands.
    pub target: WorkTarget,
    /// Composite urgency: kind weight plus overshoot magnitude.
    pub urgency: u32,
}

/// One node's statistics as seen by a single scheduler scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSnapshot {
    /// Node identity.
    pub node: NodeId,
    /// Depth in the tree, zero for the root.
    pub depth: u16,
    /// Whether this is the root node.
    pub is_root: bool,
    /// Whether the node currently has no children.
    pub is_leaf: bool,
    /// Child ids in key order.
    pub children: Vec<NodeId>,
    /// Aggregate statistics.
    pub stats: NodeStats,
    /// Kvset generations, oldest first.
    pub gens: Vec<u64>,
}

/// Percentage by which `value` exceeds `bound`, capped so that kind priority
/// always dominates the composite urgency.
fn overshoot(value: u64, bound: u64) -> u32 {
    if value <= bound {
        return 0;
    }
    // Byte and key stats come from the storage layer; widen instead of
    // trusting them to stay below u64::MAX / 100.
    ((u128::from(value - bound) * 100) / u128::from(bound.max(1))).min(999) as u32
}

fn item(kind: WorkKind, snap: &NodeSnapshot, take: usize, target: WorkTarget, over: u32) -> WorkItem {
    WorkItem {
        kind,
        node: snap.node,
        inputs: snap.gens.iter().take(take).copied().collect(),
        target,
        urgency: kind.weight() * 1000 + over.min(999),
    }
}

fn root_spill(snap: &NodeSnapshot, t: &Thresholds) -> Option<WorkItem> {
    let n = snap.stats.kvsets;
    if !snap.is_root || n < t.rspill_kvsets_min.max(RSPILL_KVSETS_FLOOR) {
        return None;
    }
    let take = n.min(t.rspill_kvsets_max);
    let over = overshoot(n as u64, t.rspill_kvsets_min as u64);
    Some(item(WorkKind::RootSpill, snap, take, WorkTarget::Children, over))
}

fn internal_spill(snap: &NodeSnapshot, t: &Thresholds) -> Option<WorkItem> {
    let n = snap.stats.kvsets;
    if snap.is_root || snap.is_leaf || n < t.ispill_kvsets_min.max(ISPILL_KVSETS_FLOOR) {
        return None;
    }
    let by_size = snap.stats.alen >= t.ispill_pop_size;
    let by_keys = snap.stats.keys >= t.ispill_pop_keys;
    if !by_size && !by_keys {
        return None;
    }
    let take = n.min(t.ispill_kvsets_max);
    let over = overshoot(snap.stats.alen, t.ispill_pop_size)
        .max(overshoot(snap.stats.keys, t.ispill_pop_keys));
    Some(item(
        WorkKind::InternalSpill,
        snap,
        take,
        WorkTarget::Children,
        over,
    ))
}

fn run_length(snap: &NodeSnapshot, t: &Thresholds) -> Option<WorkItem> {
    let n = snap.stats.kvsets;
    if n < RUNLEN_FLOOR || n <= t.llen_runlen_max {
        return None;
    }
    // Merge enough of the oldest runs to land back at the band's floor.
    let take = (n - t.llen_runlen_min + 1).min(t.llen_runlen_max);
    let over = overshoot(n as u64, t.llen_runlen_max as u64);
    Some(item(WorkKind::RunLength, snap, take, WorkTarget::Source, over))
}

fn idle(snap: &NodeSnapshot, t: &Thresholds) -> Option<WorkItem> {
    let n = snap.stats.kvsets;
    if snap.is_root || n < t.llen_idlec.max(RUNLEN_FLOOR) {
        return None;
    }
    if snap.stats.idle_cycles < t.llen_idlem {
        return None;
    }
    let take = n.min(t.llen_runlen_max);
    let over = overshoot(u64::from(snap.stats.idle_cycles), u64::from(t.llen_idlem));
    Some(item(WorkKind::Idle, snap, take, WorkTarget::Source, over))
}

fn leaf_garbage(snap: &NodeSnapshot, t: &Thresholds) -> Option<WorkItem> {
    let n = snap.stats.kvsets;
    if !snap.is_leaf || n < t.lcomp_kvsets_min.max(LCOMP_KVSETS_FLOOR) {
        return None;
    }
    let garbage = snap.stats.garbage_pct();
    let by_garbage = garbage >= t.lcomp_pop_pct;
    let by_len = n > t.lcomp_kvsets_max;
    if !by_garbage && !by_len {
        return None;
    }
    let take = n.min(t.lcomp_kvsets_max);
    let over = overshoot(u64::from(garbage), u64::from(t.lcomp_pop_pct))
        .max(overshoot(n as u64, t.lcomp_kvsets_max as u64));
    Some(item(WorkKind::LeafGarbage, snap, take, WorkTarget::Source, over))
}

fn leaf_size(snap: &NodeSnapshot, t: &Thresholds) -> Option<WorkItem> {
    let n = snap.stats.kvsets;
    if !snap.is_leaf || n == 0 || snap.stats.alen < t.leaf_size_hi {
        return None;
    }
    // A split rewrites the whole node.
    let over = overshoot(snap.stats.alen, t.leaf_size_hi);
    Some(item(WorkKind::LeafSize, snap, n, WorkTarget::Split, over))
}

fn leaf_scatter(snap: &NodeSnapshot, t: &Thresholds) -> Option<WorkItem> {
    let n = snap.stats.kvsets;
    if !snap.is_leaf || n < LSCATTER_KVSETS_FLOOR {
        return None;
    }
    if snap.stats.scatter_pct < t.lscatter_pct {
        return None;
    }
    let take = n.min(t.lcomp_kvsets_max);
    let over = overshoot(u64::from(snap.stats.scatter_pct), u64::from(t.lscatter_pct));
    Some(item(WorkKind::LeafScatter, snap, take, WorkTarget::Source, over))
}

/// Determine the most urgent eligible work for one node, if any.
///
/// Re-running on an unchanged snapshot yields the same result.
pub fn select(snap: &NodeSnapshot, thresholds: &Thresholds) -> Option<WorkItem> {
    root_spill(snap, thresholds)
        .or_else(|| internal_spill(snap, thresholds))
        .or_else(|| run_length(snap, thresholds))
        .or_else(|| idle(snap, thresholds))
        .or_else(|| leaf_garbage(snap, thresholds))
        .or_else(|| leaf_size(snap, thresholds))
        .or_else(|| leaf_scatter(snap, thresholds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeStats;

    fn snap(node: NodeId, depth: u16, kvsets: usize) -> NodeSnapshot {
        NodeSnapshot {
            node,
            depth,
            is_root: depth == 0,
            is_leaf: true,
            children: Vec::new(),
            stats: NodeStats {
                kvsets,
                alen: kvsets as u64 * 1024,
                garbage_bytes: 0,
                keys: kvsets as u64 * 100,
                scatter_pct: 0,
                idle_cycles: 0,
            },
            gens: (1..=kvsets as u64).collect(),
        }
    }

    fn leaf(node: NodeId, kvsets: usize) -> NodeSnapshot {
        snap(node, 2, kvsets)
    }

    fn internal(node: NodeId, kvsets: usize) -> NodeSnapshot {
        let mut s = snap(node, 1, kvsets);
        s.is_leaf = false;
        s.children = vec![100, 101];
        s
    }

    #[test]
    fn root_spill_fires_exactly_at_min() {
        let t = Thresholds::default();
        assert_eq!(select(&snap(0, 0, 0), &t), None);
        let item = select(&snap(0, 0, 1), &t).expect("eligible at rspill_kvsets_min");
        assert_eq!(item.kind, WorkKind::RootSpill);
        assert_eq!(item.target, WorkTarget::Children);
        assert_eq!(item.inputs, vec![1]);

        let t = t.rspill_kvsets(3, 8);
        assert_eq!(select(&snap(0, 0, 2), &t), None);
        assert!(select(&snap(0, 0, 3), &t).is_some());
    }

    #[test]
    fn root_spill_caps_inputs_at_max() {
        let t = Thresholds::default().rspill_kvsets(1, 4);
        let item = select(&snap(0, 0, 10), &t).expect("eligible");
        assert_eq!(item.inputs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn internal_spill_triggers_by_size_or_keys() {
        let t = Thresholds::default().ispill_pop(10_000, 10_000);
        let mut s = internal(5, 2);
        s.stats.alen = 9_999;
        s.stats.keys = 9_999;
        assert_eq!(select(&s, &t), None);

        s.stats.alen = 10_000;
        let item = select(&s, &t).expect("by size");
        assert_eq!(item.kind, WorkKind::InternalSpill);

        s.stats.alen = 0;
        s.stats.keys = 20_000;
        let item = select(&s, &t).expect("by keys");
        assert_eq!(item.kind, WorkKind::InternalSpill);
    }

    #[test]
    fn run_length_needs_ceiling_breach() {
        let t = Thresholds::default().llen_runlen(2, 4);
        assert_eq!(select(&leaf(3, 4), &t), None);
        let item = select(&leaf(3, 5), &t).expect("over ceiling");
        assert_eq!(item.kind, WorkKind::RunLength);
        assert_eq!(item.target, WorkTarget::Source);
        // 5 runs, floor 2: merging the oldest 4 lands at 2.
        assert_eq!(item.inputs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn garbage_needs_two_runs_regardless_of_pct() {
        // Scenario B: a single run over the garbage threshold is never
        // compacted, for any configuration.
        let t = Thresholds::default().lcomp_pop_pct(1);
        let mut s = leaf(7, 1);
        s.stats.alen = 1000;
        s.stats.garbage_bytes = 999;
        assert_eq!(select(&s, &t), None);

        let mut s = leaf(7, 2);
        s.stats.alen = 1000;
        s.stats.garbage_bytes = 999;
        let item = select(&s, &t).expect("two runs are compactable");
        assert_eq!(item.kind, WorkKind::LeafGarbage);
    }

    #[test]
    fn garbage_triggers_by_pct_or_run_count() {
        let t = Thresholds::default().lcomp_kvsets(2, 4).llen_runlen(8, 16);
        let mut s = leaf(7, 5);
        s.stats.alen = 1000;
        s.stats.garbage_bytes = 0;
        let item = select(&s, &t).expect("over lcomp_kvsets_max");
        assert_eq!(item.kind, WorkKind::LeafGarbage);
        assert_eq!(item.inputs.len(), 4);
    }

    #[test]
    fn leaf_size_splits_at_high_bound() {
        let t = Thresholds::default().leaf_size(1000, 2000);
        let mut s = leaf(9, 3);
        s.stats.alen = 1999;
        assert_eq!(select(&s, &t), None);
        s.stats.alen = 2000;
        let item = select(&s, &t).expect("over high bound");
        assert_eq!(item.kind, WorkKind::LeafSize);
        assert_eq!(item.target, WorkTarget::Split);
        assert_eq!(item.inputs, vec![1, 2, 3]);
    }

    #[test]
    fn scatter_triggers_over_pct_with_floor() {
        let t = Thresholds::default().lscatter_pct(40);
        let mut s = leaf(4, 1);
        s.stats.scatter_pct = 90;
        assert_eq!(select(&s, &t), None, "scatter floor is two runs");

        let mut s = leaf(4, 2);
        s.stats.scatter_pct = 39;
        assert_eq!(select(&s, &t), None);
        s.stats.scatter_pct = 40;
        let item = select(&s, &t).expect("over scatter pct");
        assert_eq!(item.kind, WorkKind::LeafScatter);
    }

    #[test]
    fn idle_needs_runs_and_cold_cycles() {
        let t = Thresholds::default().llen_idle(2, 5);
        let mut s = leaf(6, 2);
        s.stats.idle_cycles = 4;
        assert_eq!(select(&s, &t), None);
        s.stats.idle_cycles = 5;
        let item = select(&s, &t).expect("cold enough");
        assert_eq!(item.kind, WorkKind::Idle);

        let mut s = leaf(6, 1);
        s.stats.idle_cycles = 100;
        assert_eq!(select(&s, &t), None, "idle floor is two runs");
    }

    #[test]
    fn idle_outranks_scatter() {
        let t = Thresholds::default().llen_idle(2, 5).lscatter_pct(10);
        let mut s = leaf(6, 3);
        s.stats.idle_cycles = 50;
        s.stats.scatter_pct = 99;
        let item = select(&s, &t).expect("both eligible");
        assert_eq!(item.kind, WorkKind::Idle);
    }

    #[test]
    fn priority_order_prefers_spill_over_leaf_kinds() {
        // A root qualifying for run-length still spills first.
        let t = Thresholds::default().llen_runlen(2, 4);
        let item = select(&snap(0, 0, 9), &t).expect("eligible");
        assert_eq!(item.kind, WorkKind::RootSpill);
    }

    #[test]
    fn selection_is_idempotent_on_unchanged_snapshot() {
        let t = Thresholds::default().lcomp_pop_pct(10);
        let mut s = leaf(3, 4);
        s.stats.garbage_bytes = s.stats.alen / 2;
        let first = select(&s, &t);
        for _ in 0..8 {
            assert_eq!(select(&s, &t), first);
        }
    }

    #[test]
    fn urgency_scales_with_overshoot_within_a_kind() {
        let t = Thresholds::default().lcomp_pop_pct(50);
        let mut a = leaf(1, 2);
        a.stats.alen = 100;
        a.stats.garbage_bytes = 60;
        let mut b = leaf(2, 2);
        b.stats.alen = 100;
        b.stats.garbage_bytes = 90;
        let ia = select(&a, &t).expect("a");
        let ib = select(&b, &t).expect("b");
        assert_eq!(ia.kind, ib.kind);
        assert!(ib.urgency > ia.urgency);
    }

    #[test]
    fn urgency_is_capped_for_extreme_stats() {
        let t = Thresholds::default().leaf_size(1000, 2000);
        let mut huge = leaf(1, 2);
        huge.stats.alen = u64::MAX;
        let mut capped = leaf(2, 2);
        // Overshoot of 1100% already hits the cap.
        capped.stats.alen = 24_000;
        let ih = select(&huge, &t).expect("huge");
        let ic = select(&capped, &t).expect("capped");
        assert_eq!(ih.kind, WorkKind::LeafSize);
        assert_eq!(ih.urgency, ic.urgency);
    }

    #[test]
    fn kind_priority_dominates_urgency() {
        // Maximum overshoot of a lower kind never outranks a higher kind.
        let t = Thresholds::default();
        let spill = select(&snap(0, 0, 1), &t).expect("rspill");
        let mut s = leaf(9, 2);
        s.stats.alen = 100;
        s.stats.garbage_bytes = 100;
        let garbage = select(&s, &t).expect("garbage");
        assert!(spill.urgency > garbage.urgency);
    }
}
