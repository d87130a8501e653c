//! Immutable sorted-run (kvset) bookkeeping.

/// Statistics describing one persisted kvset.
///
/// Supplied by the storage layer when the run is flushed and refreshed by
/// background sampling; the engine never inspects the run's bytes itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvsetStats {
    /// Logical size in bytes.
    pub bytes: u64,
    /// Number of keys.
    pub keys: u64,
    /// Estimated bytes occupied by superseded or tombstoned entries.
    pub garbage_bytes: u64,
    /// Scatter score in `0..=100`: dispersion of value fragments across
    /// unrelated runs, weighted into the owning node's scatter measure.
    pub scatter: u8,
    /// Smallest key covered by the run.
    pub min_key: Vec<u8>,
    /// Largest key covered by the run.
    pub max_key: Vec<u8>,
}

impl KvsetStats {
    pub(crate) fn garbage_sane(&self) -> bool {
        self.garbage_bytes <= self.bytes && self.scatter <= 100
    }
}

/// An immutable, already-persisted sorted batch of key-value entries.
///
/// A kvset is owned by exactly one node at a time and moves between nodes
/// only through [`Tree::apply_work_result`](crate::Tree::apply_work_result).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Kvset {
    gen: u64,
    stats: KvsetStats,
}

impl Kvset {
    /// Create a kvset with the given generation number and statistics.
    pub fn new(gen: u64, stats: KvsetStats) -> Self {
        Self { gen, stats }
    }

    /// Generation number, defining recency ordering within a node.
    pub fn gen(&self) -> u64 {
        self.gen
    }

    /// Statistics for the run.
    pub fn stats(&self) -> &KvsetStats {
        &self.stats
    }
}

#[cfg(test)]
pub(crate) fn kvset_for_test(gen: u64, bytes: u64, garbage_bytes: u64) -> Kvset {
    Kvset::new(
        gen,
        KvsetStats {
            bytes,
            keys: bytes / 64,
            garbage_bytes,
            scatter: 0,
            min_key: vec![0x00],
            max_key: vec![0xff],
        },
    )
}
