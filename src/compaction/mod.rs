//! Maintenance decision layer: work selection, ranking, and scheduling.
//!
//! The selector turns one node's statistics into an optional work item; the
//! scheduler scans the whole tree, ranks candidates by urgency, and
//! dispatches the winners to a bounded worker pool.

mod error;
/// Work execution contracts.
pub mod executor;
/// The background control loop and worker pool.
pub mod scheduler;
/// Pure per-node work selection.
pub mod selector;
pub(crate) mod states;

pub use error::WorkError;
