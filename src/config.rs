//! Threshold and scheduler configuration.
//!
//! All numeric bounds that parameterize work selection live in one immutable
//! [`Thresholds`] record; the scheduler reads a private copy at the start of
//! each cycle, so a live update never changes decisions mid-cycle.

use std::time::Duration;

use thiserror::Error;

/// Root and internal spill are worthwhile from a single kvset.
pub(crate) const RSPILL_KVSETS_FLOOR: usize = 1;
/// See [`RSPILL_KVSETS_FLOOR`].
pub(crate) const ISPILL_KVSETS_FLOOR: usize = 1;
/// Compacting fewer than two kvsets in place has no benefit.
pub(crate) const LCOMP_KVSETS_FLOOR: usize = 2;
/// See [`LCOMP_KVSETS_FLOOR`].
pub(crate) const RUNLEN_FLOOR: usize = 2;
/// See [`LCOMP_KVSETS_FLOOR`].
pub(crate) const LSCATTER_KVSETS_FLOOR: usize = 2;

/// Errors raised when a configuration value fails validation.
///
/// Surfaced at construction time; the engine does not start with an invalid
/// configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A threshold or scheduler knob is outside its documented bounds.
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        /// Name of the offending knob.
        name: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
    /// The routing prefix length is outside `1..=MAX_PREFIX_LEN`.
    #[error("prefix length {0} out of range")]
    PrefixLength(usize),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: &'static str) -> Self {
        Self::Invalid { name, reason }
    }
}

/// Scalar bounds that parameterize the work selector.
///
/// Values are read-only during a scheduling cycle and may be swapped between
/// cycles via [`SchedulerHandle::set_thresholds`](crate::SchedulerHandle).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Thresholds {
    /// Root node kvset count that makes a root spill eligible.
    pub rspill_kvsets_min: usize,
    /// Maximum kvsets consumed by a single root spill.
    pub rspill_kvsets_max: usize,
    /// Internal node kvset count that makes an internal spill eligible.
    pub ispill_kvsets_min: usize,
    /// Maximum kvsets consumed by a single internal spill.
    pub ispill_kvsets_max: usize,
    /// Internal node logical size (bytes) that triggers a spill.
    pub ispill_pop_size: u64,
    /// Internal node key count that triggers a spill.
    pub ispill_pop_keys: u64,
    /// Minimum kvsets before a leaf compaction is considered.
    pub lcomp_kvsets_min: usize,
    /// Maximum kvsets consumed by a single leaf compaction.
    pub lcomp_kvsets_max: usize,
    /// Leaf garbage percentage that triggers garbage collection.
    pub lcomp_pop_pct: u8,
    /// Lower edge of the leaf size band. Selection triggers on
    /// [`leaf_size_hi`](Self::leaf_size_hi) alone; this value bounds `hi`
    /// from below and tells executors what size the halves of a split
    /// should land near.
    pub leaf_size_lo: u64,
    /// Leaf logical size (bytes) that triggers a two-way split.
    pub leaf_size_hi: u64,
    /// Leaf scatter percentage that triggers a locality-restoring compaction.
    pub lscatter_pct: u8,
    /// Run-count floor left behind by a run-length compaction.
    pub llen_runlen_min: usize,
    /// Run-count ceiling; exceeding it triggers run-length compaction.
    pub llen_runlen_max: usize,
    /// Minimum kvsets before an idle node is compacted.
    pub llen_idlec: usize,
    /// Scheduling cycles without maintenance before a node counts as idle.
    pub llen_idlem: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            rspill_kvsets_min: 1,
            rspill_kvsets_max: 8,
            ispill_kvsets_min: 1,
            ispill_kvsets_max: 8,
            ispill_pop_size: 8 * 1024 * 1024 * 1024,
            ispill_pop_keys: 32_000_000,
            lcomp_kvsets_min: 2,
            lcomp_kvsets_max: 8,
            lcomp_pop_pct: 70,
            leaf_size_lo: 20 * 1024 * 1024 * 1024,
            leaf_size_hi: 28 * 1024 * 1024 * 1024,
            lscatter_pct: 50,
            llen_runlen_min: 4,
            llen_runlen_max: 8,
            llen_idlec: 2,
            llen_idlem: 10,
        }
    }
}

impl Thresholds {
    /// Set the root spill kvset band.
    pub fn rspill_kvsets(self, min: usize, max: usize) -> Self {
        Self {
            rspill_kvsets_min: min,
            rspill_kvsets_max: max,
            ..self
        }
    }

    /// Set the internal spill kvset band.
    pub fn ispill_kvsets(self, min: usize, max: usize) -> Self {
        Self {
            ispill_kvsets_min: min,
            ispill_kvsets_max: max,
            ..self
        }
    }

    /// Set the internal spill size/key-count triggers.
    pub fn ispill_pop(self, size: u64, keys: u64) -> Self {
        Self {
            ispill_pop_size: size,
            ispill_pop_keys: keys,
            ..self
        }
    }

    /// Set the leaf compaction kvset band.
    pub fn lcomp_kvsets(self, min: usize, max: usize) -> Self {
        Self {
            lcomp_kvsets_min: min,
            lcomp_kvsets_max: max,
            ..self
        }
    }

    /// Set the leaf garbage percentage trigger.
    pub fn lcomp_pop_pct(self, pct: u8) -> Self {
        Self {
            lcomp_pop_pct: pct,
            ..self
        }
    }

    /// Set the leaf size band.
    pub fn leaf_size(self, lo: u64, hi: u64) -> Self {
        Self {
            leaf_size_lo: lo,
            leaf_size_hi: hi,
            ..self
        }
    }

    /// Set the leaf scatter percentage trigger.
    pub fn lscatter_pct(self, pct: u8) -> Self {
        Self {
            lscatter_pct: pct,
            ..self
        }
    }

    /// Set the run-length band.
    pub fn llen_runlen(self, min: usize, max: usize) -> Self {
        Self {
            llen_runlen_min: min,
            llen_runlen_max: max,
            ..self
        }
    }

    /// Set the idle-compaction gates: minimum kvsets and idle cycles.
    pub fn llen_idle(self, idlec: usize, idlem: u32) -> Self {
        Self {
            llen_idlec: idlec,
            llen_idlem: idlem,
            ..self
        }
    }

    /// Reject values outside documented bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rspill_kvsets_min < RSPILL_KVSETS_FLOOR {
            return Err(ConfigError::invalid("rspill_kvsets_min", "must be >= 1"));
        }
        if self.rspill_kvsets_max < self.rspill_kvsets_min {
            return Err(ConfigError::invalid("rspill_kvsets_max", "must be >= min"));
        }
        if self.ispill_kvsets_min < ISPILL_KVSETS_FLOOR {
            return Err(ConfigError::invalid("ispill_kvsets_min", "must be >= 1"));
        }
        if self.ispill_kvsets_max < self.ispill_kvsets_min {
            return Err(ConfigError::invalid("ispill_kvsets_max", "must be >= min"));
        }
        if self.ispill_pop_size == 0 {
            return Err(ConfigError::invalid("ispill_pop_size", "must be > 0"));
        }
        if self.ispill_pop_keys == 0 {
            return Err(ConfigError::invalid("ispill_pop_keys", "must be > 0"));
        }
        if self.lcomp_kvsets_min < LCOMP_KVSETS_FLOOR {
            return Err(ConfigError::invalid("lcomp_kvsets_min", "must be >= 2"));
        }
        if self.lcomp_kvsets_max < self.lcomp_kvsets_min {
            return Err(ConfigError::invalid("lcomp_kvsets_max", "must be >= min"));
        }
        if self.lcomp_pop_pct == 0 || self.lcomp_pop_pct > 100 {
            return Err(ConfigError::invalid("lcomp_pop_pct", "must be in 1..=100"));
        }
        if self.leaf_size_lo == 0 || self.leaf_size_lo >= self.leaf_size_hi {
            return Err(ConfigError::invalid("leaf_size_lo", "must be > 0 and < hi"));
        }
        if self.lscatter_pct == 0 || self.lscatter_pct > 100 {
            return Err(ConfigError::invalid("lscatter_pct", "must be in 1..=100"));
        }
        if self.llen_runlen_min < RUNLEN_FLOOR {
            return Err(ConfigError::invalid("llen_runlen_min", "must be >= 2"));
        }
        if self.llen_runlen_max < self.llen_runlen_min {
            return Err(ConfigError::invalid("llen_runlen_max", "must be >= min"));
        }
        if self.llen_idlec < RUNLEN_FLOOR {
            return Err(ConfigError::invalid("llen_idlec", "must be >= 2"));
        }
        if self.llen_idlem == 0 {
            return Err(ConfigError::invalid("llen_idlem", "must be >= 1"));
        }
        Ok(())
    }
}

/// Knobs governing the background scheduler itself.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of parallel workers, which is also the maximum work in flight.
    pub workers: usize,
    /// Delay between scheduling cycles when nothing wakes the scheduler early.
    pub cycle_interval: Duration,
    /// Capacity of the dispatch channel between the control loop and workers.
    pub queue_depth: usize,
    /// Whether shutdown waits for in-flight jobs instead of cancelling them.
    pub drain_on_shutdown: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            cycle_interval: Duration::from_secs(1),
            queue_depth: 8,
            drain_on_shutdown: true,
        }
    }
}

impl SchedulerConfig {
    /// Set the worker count.
    pub fn workers(self, workers: usize) -> Self {
        Self { workers, ..self }
    }

    /// Set the per-cycle idle delay.
    pub fn cycle_interval(self, cycle_interval: Duration) -> Self {
        Self {
            cycle_interval,
            ..self
        }
    }

    /// Set the dispatch channel capacity.
    pub fn queue_depth(self, queue_depth: usize) -> Self {
        Self {
            queue_depth,
            ..self
        }
    }

    /// Set the shutdown drain policy.
    pub fn drain_on_shutdown(self, drain: bool) -> Self {
        Self {
            drain_on_shutdown: drain,
            ..self
        }
    }

    /// Reject values outside documented bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be >= 1"));
        }
        if self.cycle_interval < Duration::from_millis(10) {
            return Err(ConfigError::invalid("cycle_interval", "must be >= 10ms"));
        }
        if self.queue_depth < self.workers {
            return Err(ConfigError::invalid("queue_depth", "must be >= workers"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Thresholds::default().validate().expect("thresholds");
        SchedulerConfig::default().validate().expect("scheduler");
    }

    #[test]
    fn floors_are_enforced() {
        let t = Thresholds::default().rspill_kvsets(0, 8);
        assert!(matches!(
            t.validate(),
            Err(ConfigError::Invalid {
                name: "rspill_kvsets_min",
                ..
            })
        ));

        let t = Thresholds::default().lcomp_kvsets(1, 8);
        assert!(t.validate().is_err());

        let t = Thresholds::default().llen_runlen(1, 8);
        assert!(t.validate().is_err());
    }

    #[test]
    fn bands_must_be_ordered() {
        assert!(Thresholds::default().rspill_kvsets(4, 2).validate().is_err());
        assert!(Thresholds::default()
            .leaf_size(1024, 1024)
            .validate()
            .is_err());
        assert!(Thresholds::default().llen_runlen(4, 3).validate().is_err());
    }

    #[test]
    fn percentages_are_bounded() {
        assert!(Thresholds::default().lcomp_pop_pct(0).validate().is_err());
        assert!(Thresholds::default().lcomp_pop_pct(101).validate().is_err());
        assert!(Thresholds::default().lscatter_pct(0).validate().is_err());
        assert!(Thresholds::default().lscatter_pct(100).validate().is_ok());
    }

    #[test]
    fn scheduler_bounds() {
        assert!(SchedulerConfig::default().workers(0).validate().is_err());
        assert!(SchedulerConfig::default()
            .cycle_interval(Duration::from_millis(1))
            .validate()
            .is_err());
        assert!(SchedulerConfig::default()
            .workers(4)
            .queue_depth(2)
            .validate()
            .is_err());
    }
}
