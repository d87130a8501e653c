#![deny(missing_docs)]
//! Maintenance engine for a log-structured, tree-shaped KV index.
//!
//! The engine keeps an in-memory model of the index tree (nodes holding
//! ordered lists of immutable sorted runs, "kvsets"), decides which
//! maintenance work each node needs (spill, run-count reduction, garbage
//! collection, split), and runs a background scheduler that ranks candidate
//! work across the whole tree and dispatches it to a bounded worker pool.
//!
//! The physical merge of runs is supplied by the caller through the
//! [`WorkExecutor`] trait; this crate only makes the decisions and keeps the
//! tree model consistent while work commits.

pub use crate::{
    compaction::{
        executor::{WorkExecutor, WorkJob, WorkOutcome},
        scheduler::{JobOutcome, JobReport, MetricsSnapshot, Scheduler, SchedulerHandle},
        selector::{select, NodeSnapshot, WorkItem, WorkKind, WorkTarget},
        WorkError,
    },
    config::{ConfigError, SchedulerConfig, Thresholds},
    route::{RouteError, RouteMap},
    tree::{CommitResult, Kvset, KvsetStats, NewChild, NodeId, OutputRun, Tree, TreeError},
};

/// Work selection, ranking, and background scheduling.
pub mod compaction;

/// Threshold and scheduler configuration.
pub mod config;

pub(crate) mod logging;

/// Prefix-to-leaf routing.
pub mod route;

/// In-memory tree model: nodes, kvsets, statistics.
pub mod tree;
