//! Prefix-to-leaf routing.
//!
//! The route map assigns newly arriving data directly to its owning leaf
//! node from a fixed-length key prefix, avoiding a full tree descent. It is
//! immutable after construction and rebuilt whenever the leaf partition
//! changes; in the window between a split and the rebuild, the tree model
//! forwards stale routes to the correct descendant.

use std::ops::Bound;

use crossbeam_skiplist::SkipMap;
use thiserror::Error;

use crate::tree::NodeId;

/// Largest supported routing-prefix length in bytes.
pub const MAX_PREFIX_LEN: usize = 32;

/// Errors raised by route map construction and lookup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// The prefix length is outside `1..=MAX_PREFIX_LEN`.
    #[error("prefix length {0} out of range")]
    PrefixLength(usize),
    /// A leaf partition with no entries cannot route anything.
    #[error("empty leaf partition")]
    Empty,
    /// An edge key's length does not match the configured prefix length.
    #[error("edge key length {got} does not match prefix length {expected}")]
    EdgeLength {
        /// Configured prefix length.
        expected: usize,
        /// Offending edge key length.
        got: usize,
    },
    /// Edge keys were not strictly increasing.
    #[error("unordered leaf partition")]
    Unordered,
    /// A lookup was issued with a prefix of the wrong length.
    #[error("lookup prefix length {got} does not match configured length {expected}")]
    Mismatch {
        /// Configured prefix length.
        expected: usize,
        /// Length of the prefix passed to lookup.
        got: usize,
    },
}

/// Immutable-after-construction map from a fixed-length key prefix to the
/// owning leaf node.
///
/// Each entry is the inclusive upper edge of one leaf's key range; a lookup
/// finds the first edge at or above the prefix.
#[derive(Debug)]
pub struct RouteMap {
    prefix_len: usize,
    map: SkipMap<Vec<u8>, NodeId>,
}

impl RouteMap {
    /// Build the map from the tree's current leaf partition, given as
    /// `(high_key, leaf)` pairs in key order.
    pub fn build(
        prefix_len: usize,
        leaves: impl IntoIterator<Item = (Vec<u8>, NodeId)>,
    ) -> Result<Self, RouteError> {
        if prefix_len == 0 || prefix_len > MAX_PREFIX_LEN {
            return Err(RouteError::PrefixLength(prefix_len));
        }
        let map = SkipMap::new();
        let mut prev: Option<Vec<u8>> = None;
        for (high_key, node) in leaves {
            if high_key.len() != prefix_len {
                return Err(RouteError::EdgeLength {
                    expected: prefix_len,
                    got: high_key.len(),
                });
            }
            if let Some(prev) = &prev {
                if &high_key <= prev {
                    return Err(RouteError::Unordered);
                }
            }
            prev = Some(high_key.clone());
            map.insert(high_key, node);
        }
        if map.is_empty() {
            return Err(RouteError::Empty);
        }
        Ok(Self { prefix_len, map })
    }

    /// The configured prefix length.
    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Return the leaf whose key range contains the given prefix.
    pub fn lookup(&self, prefix: &[u8]) -> Result<NodeId, RouteError> {
        if prefix.len() != self.prefix_len {
            return Err(RouteError::Mismatch {
                expected: self.prefix_len,
                got: prefix.len(),
            });
        }
        let entry = self
            .map
            .lower_bound(Bound::Included(prefix))
            .or_else(|| self.map.back());
        // `build` guarantees at least one entry.
        entry.map(|e| *e.value()).ok_or(RouteError::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition() -> Vec<(Vec<u8>, NodeId)> {
        vec![
            (vec![0x20, 0x00], 3),
            (vec![0x80, 0xff], 4),
            (vec![0xff, 0xff], 5),
        ]
    }

    #[test]
    fn lookup_routes_to_covering_leaf() {
        let map = RouteMap::build(2, partition()).unwrap();
        assert_eq!(map.lookup(&[0x00, 0x00]).unwrap(), 3);
        assert_eq!(map.lookup(&[0x20, 0x00]).unwrap(), 3);
        assert_eq!(map.lookup(&[0x20, 0x01]).unwrap(), 4);
        assert_eq!(map.lookup(&[0x80, 0xff]).unwrap(), 4);
        assert_eq!(map.lookup(&[0x81, 0x00]).unwrap(), 5);
        assert_eq!(map.lookup(&[0xff, 0xff]).unwrap(), 5);
    }

    #[test]
    fn build_rejects_bad_input() {
        assert_eq!(
            RouteMap::build(0, partition()).unwrap_err(),
            RouteError::PrefixLength(0)
        );
        assert_eq!(
            RouteMap::build(2, Vec::new()).unwrap_err(),
            RouteError::Empty
        );
        assert_eq!(
            RouteMap::build(2, vec![(vec![0x01], 1)]).unwrap_err(),
            RouteError::EdgeLength {
                expected: 2,
                got: 1
            }
        );
        let unordered = vec![(vec![0x80, 0x00], 1), (vec![0x20, 0x00], 2)];
        assert_eq!(
            RouteMap::build(2, unordered).unwrap_err(),
            RouteError::Unordered
        );
    }

    #[test]
    fn lookup_rejects_wrong_length() {
        let map = RouteMap::build(2, partition()).unwrap();
        assert_eq!(
            map.lookup(&[0x00]).unwrap_err(),
            RouteError::Mismatch {
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn random_partitions_route_like_a_linear_scan() {
        for _ in 0..32 {
            let leaf_count = 1 + fastrand::usize(..12);
            let mut edges: Vec<Vec<u8>> = (0..leaf_count.saturating_sub(1))
                .map(|_| vec![fastrand::u8(..), fastrand::u8(..)])
                .collect();
            edges.push(vec![0xff, 0xff]);
            edges.sort();
            edges.dedup();
            let partition: Vec<(Vec<u8>, NodeId)> = edges
                .iter()
                .enumerate()
                .map(|(i, e)| (e.clone(), i as NodeId))
                .collect();
            let map = RouteMap::build(2, partition.clone()).unwrap();

            for _ in 0..64 {
                let pfx = vec![fastrand::u8(..), fastrand::u8(..)];
                let expected = partition
                    .iter()
                    .find(|(edge, _)| edge.as_slice() >= pfx.as_slice())
                    .map(|(_, node)| *node)
                    .expect("last edge covers the max prefix");
                assert_eq!(map.lookup(&pfx).unwrap(), expected);
            }
        }
    }
}
