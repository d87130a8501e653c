//! Authoritative in-memory state of node topology, run membership, and
//! statistics.
//!
//! All mutation happens under one write lock so that a node's run list and
//! statistics change atomically together: concurrent readers observe either
//! the fully-pre-job or fully-post-job state, never a partial one.

mod kvset;
mod node;

use std::{collections::HashSet, sync::Arc};

use async_lock::RwLock;
use thiserror::Error;

pub use self::{
    kvset::{Kvset, KvsetStats},
    node::{NodeId, NodeStats},
};
#[cfg(test)]
pub(crate) use self::kvset::kvset_for_test;
use crate::{
    compaction::selector::{NodeSnapshot, WorkItem},
    config::ConfigError,
    logging::engine_log,
    route,
};

use self::node::Node;

/// Errors raised by tree model operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The referenced node does not exist.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    /// A kvset generation named by a work item is not present in its node.
    #[error("kvset gen {gen} missing from node {node}")]
    MissingKvset {
        /// Node the work item named as the source.
        node: NodeId,
        /// Generation that could not be found.
        gen: u64,
    },
    /// A structural or accounting invariant would be violated; the tree is
    /// left unchanged.
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}

/// A kvset produced by completed work, destined for an existing node.
#[derive(Clone, Debug)]
pub struct OutputRun {
    /// Node receiving the run: the source node itself or one of its children.
    pub node: NodeId,
    /// The newly persisted run.
    pub kvset: Kvset,
}

/// A new leaf created by a spill or split, replacing part of the source
/// node's key range.
#[derive(Clone, Debug)]
pub struct NewChild {
    /// Inclusive upper bound of the child's key range, at prefix length.
    pub high_key: Vec<u8>,
    /// Runs installed into the child, newest first.
    pub kvsets: Vec<Kvset>,
}

/// The outcome of an executed work item, ready to commit.
#[derive(Clone, Debug, Default)]
pub struct CommitResult {
    /// Output runs for existing nodes.
    pub outputs: Vec<OutputRun>,
    /// Replacement child set for the source node, when the work spilled into
    /// or split off new leaves.
    pub new_children: Vec<NewChild>,
    /// Garbage bytes eliminated by the merge.
    pub reclaimed_bytes: u64,
}

struct TreeInner {
    nodes: Vec<Node>,
    prefix_len: usize,
}

impl TreeInner {
    fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes.get(id as usize).ok_or(TreeError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.nodes
            .get_mut(id as usize)
            .ok_or(TreeError::UnknownNode(id))
    }
}

/// The in-memory index tree: a flat arena of nodes indexed by [`NodeId`].
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Tree {
    inner: Arc<RwLock<TreeInner>>,
}

/// Root node id; the root is created with the tree and never replaced.
pub const ROOT: NodeId = 0;

impl Tree {
    /// Create a tree holding only the root node.
    ///
    /// `prefix_len` is the fixed routing-prefix length, immutable for the
    /// life of the tree.
    pub fn new(prefix_len: usize) -> Result<Self, ConfigError> {
        if prefix_len == 0 || prefix_len > route::MAX_PREFIX_LEN {
            return Err(ConfigError::PrefixLength(prefix_len));
        }
        let root = Node::new(ROOT, 0, vec![0xff; prefix_len]);
        Ok(Self {
            inner: Arc::new(RwLock::new(TreeInner {
                nodes: vec![root],
                prefix_len,
            })),
        })
    }

    /// The configured routing-prefix length.
    pub async fn prefix_len(&self) -> usize {
        self.inner.read().await.prefix_len
    }

    /// Number of nodes in the arena.
    pub async fn node_count(&self) -> usize {
        self.inner.read().await.nodes.len()
    }

    /// Append a newly-flushed run to a node and recompute its statistics.
    pub async fn add_run(&self, node: NodeId, kvset: Kvset) -> Result<(), TreeError> {
        let mut inner = self.inner.write().await;
        let target = inner.node_mut(node)?;
        if target.kvsets.iter().any(|k| k.gen() == kvset.gen()) {
            return Err(TreeError::Invariant("duplicate kvset generation"));
        }
        if !kvset.stats().garbage_sane() {
            return Err(TreeError::Invariant("kvset stats out of range"));
        }
        target.kvsets.insert(0, kvset);
        target.recompute_stats();
        Ok(())
    }

    /// Per-node statistics snapshots for a scheduler scan.
    pub async fn snapshot(&self) -> Vec<NodeSnapshot> {
        let inner = self.inner.read().await;
        inner
            .nodes
            .iter()
            .map(|n| NodeSnapshot {
                node: n.id,
                depth: n.depth,
                is_root: n.id == ROOT,
                is_leaf: n.is_leaf(),
                children: n.children.clone(),
                stats: n.stats.clone(),
                gens: n.gens_oldest_first(),
            })
            .collect()
    }

    /// Resolve the statistics of a work item's input runs.
    ///
    /// Fails when the node or any named generation has gone away, which
    /// makes a stale job a no-op instead of a hazard.
    pub async fn resolve_inputs(
        &self,
        node: NodeId,
        gens: &[u64],
    ) -> Result<Vec<KvsetStats>, TreeError> {
        let inner = self.inner.read().await;
        let source = inner.node(node)?;
        gens.iter()
            .map(|gen| {
                source
                    .kvsets
                    .iter()
                    .find(|k| k.gen() == *gen)
                    .map(|k| k.stats().clone())
                    .ok_or(TreeError::MissingKvset { node, gen: *gen })
            })
            .collect()
    }

    /// Atomically commit the result of an executed work item.
    ///
    /// Removes the item's input runs from the source node, installs output
    /// runs into their targets, and, when the work produced new leaves,
    /// replaces the source node's child set. Every check runs before the
    /// first mutation; on any error the tree is unchanged.
    pub async fn apply_work_result(
        &self,
        item: &WorkItem,
        result: CommitResult,
    ) -> Result<(), TreeError> {
        let mut inner = self.inner.write().await;
        let source = inner.node(item.node)?;

        let mut input_gens: HashSet<u64> = HashSet::with_capacity(item.inputs.len());
        let mut input_bytes: u64 = 0;
        let mut input_garbage: u64 = 0;
        for gen in &item.inputs {
            if !input_gens.insert(*gen) {
                return Err(TreeError::Invariant("work item references a run twice"));
            }
            let kvset = source
                .kvsets
                .iter()
                .find(|k| k.gen() == *gen)
                .ok_or(TreeError::MissingKvset {
                    node: item.node,
                    gen: *gen,
                })?;
            input_bytes += kvset.stats().bytes;
            input_garbage += kvset.stats().garbage_bytes;
        }

        let mut output_bytes: u64 = 0;
        for out in &result.outputs {
            let target = inner.node(out.node)?;
            if out.node != item.node && !source.children.contains(&out.node) {
                return Err(TreeError::Invariant(
                    "output target is neither the source nor one of its children",
                ));
            }
            let survives = |k: &Kvset| out.node != item.node || !input_gens.contains(&k.gen());
            if target
                .kvsets
                .iter()
                .any(|k| k.gen() == out.kvset.gen() && survives(k))
            {
                return Err(TreeError::Invariant("output run duplicates a live generation"));
            }
            output_bytes += out.kvset.stats().bytes;
        }

        if !result.new_children.is_empty() {
            let source = inner.node(item.node)?;
            if !source.is_leaf() {
                return Err(TreeError::Invariant(
                    "child-set replacement requires a childless source",
                ));
            }
            if result.new_children.len() < 2 {
                return Err(TreeError::Invariant("a split must produce at least two children"));
            }
            let mut prev: Option<&[u8]> = None;
            for child in &result.new_children {
                if child.high_key.len() != inner.prefix_len {
                    return Err(TreeError::Invariant("child high key has wrong length"));
                }
                if let Some(prev) = prev {
                    if child.high_key.as_slice() <= prev {
                        return Err(TreeError::Invariant("child high keys out of order"));
                    }
                }
                prev = Some(child.high_key.as_slice());
                for kvset in &child.kvsets {
                    output_bytes += kvset.stats().bytes;
                }
            }
            if result.new_children.last().map(|c| c.high_key.as_slice())
                != Some(source.high_key.as_slice())
            {
                return Err(TreeError::Invariant(
                    "children do not cover the source node's range",
                ));
            }
        }

        if input_bytes != output_bytes + result.reclaimed_bytes {
            return Err(TreeError::Invariant("size not conserved across commit"));
        }
        if result.reclaimed_bytes > input_garbage {
            return Err(TreeError::Invariant("reclaimed more than estimated garbage"));
        }

        // Validation done; mutate.
        let mut touched: Vec<NodeId> = vec![item.node];
        {
            let source = inner.node_mut(item.node)?;
            source.kvsets.retain(|k| !input_gens.contains(&k.gen()));
        }
        for out in result.outputs {
            touched.push(out.node);
            let target = inner.node_mut(out.node)?;
            target.kvsets.insert(0, out.kvset);
        }
        if !result.new_children.is_empty() {
            let depth = inner.node(item.node)?.depth + 1;
            let mut child_ids = Vec::with_capacity(result.new_children.len());
            for child in result.new_children {
                let id = inner.nodes.len() as NodeId;
                let mut node = Node::new(id, depth, child.high_key);
                node.kvsets = child.kvsets;
                node.recompute_stats();
                child_ids.push(id);
                touched.push(id);
                inner.nodes.push(node);
            }
            inner.node_mut(item.node)?.children = child_ids;
        }
        touched.sort_unstable();
        touched.dedup();
        for id in &touched {
            let node = inner.node_mut(*id)?;
            node.recompute_stats();
            node.stats.idle_cycles = 0;
        }

        engine_log!(
            log::Level::Debug,
            "tree_commit",
            "node={} kind={} inputs={} reclaimed={}",
            item.node,
            item.kind.as_str(),
            item.inputs.len(),
            result.reclaimed_bytes,
        );
        Ok(())
    }

    /// Advance every node's idle counter by one scheduling cycle.
    pub async fn tick_idle(&self) {
        let mut inner = self.inner.write().await;
        for node in &mut inner.nodes {
            node.stats.idle_cycles = node.stats.idle_cycles.saturating_add(1);
        }
    }

    /// The current leaf partition in key order, as `(high_key, node)` pairs
    /// suitable for [`RouteMap::build`](crate::RouteMap::build).
    pub async fn leaves(&self) -> Vec<(Vec<u8>, NodeId)> {
        let inner = self.inner.read().await;
        let mut out = Vec::new();
        let mut stack = vec![ROOT];
        // Children are stored in key order; a stack visits them reversed.
        while let Some(id) = stack.pop() {
            let node = &inner.nodes[id as usize];
            if node.is_leaf() {
                out.push((node.high_key.clone(), node.id));
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Forward an operation routed to a now-stale node to the descendant
    /// leaf whose range contains `key`, using child boundary keys.
    pub async fn route_fallback(&self, node: NodeId, key: &[u8]) -> Result<NodeId, TreeError> {
        let inner = self.inner.read().await;
        let pfx = &key[..key.len().min(inner.prefix_len)];
        let mut current = inner.node(node)?;
        while !current.is_leaf() {
            let mut next = *current
                .children
                .last()
                .ok_or(TreeError::Invariant("internal node without children"))?;
            for child in &current.children {
                if inner.node(*child)?.high_key.as_slice() >= pfx {
                    next = *child;
                    break;
                }
            }
            current = inner.node(next)?;
        }
        Ok(current.id)
    }

    /// Statistics for one node.
    pub async fn node_stats(&self, node: NodeId) -> Result<NodeStats, TreeError> {
        let inner = self.inner.read().await;
        Ok(inner.node(node)?.stats.clone())
    }
}
