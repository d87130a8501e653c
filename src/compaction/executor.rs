//! Work execution contracts.
//!
//! The engine decides *what* to merge; the storage layer decides *how*. A
//! [`WorkExecutor`] consumes one job end-to-end (read the input runs,
//! produce output runs) and hands back a [`CommitResult`] for the tree to
//! apply atomically. Executors never touch the tree themselves, which keeps
//! the commit the only mutation point.

use std::{future::Future, pin::Pin};

use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::{
    compaction::{selector::WorkItem, WorkError},
    tree::{CommitResult, KvsetStats},
};

/// Execution context for one dispatched work item.
#[derive(Clone, Debug)]
pub struct WorkJob {
    /// Unique job identifier.
    pub id: Ulid,
    /// The work item being executed.
    pub item: WorkItem,
    /// Resolved statistics of the input runs, oldest first.
    pub inputs: Vec<KvsetStats>,
    /// Cooperative cancellation signal; executors should check it at merge
    /// boundaries and return [`WorkOutcome::Cancelled`] once set.
    pub cancel: CancellationToken,
}

/// Result of executing one work item.
#[derive(Clone, Debug)]
pub enum WorkOutcome {
    /// The merge finished; commit this result to the tree.
    Committed(CommitResult),
    /// The job observed its cancellation token and stopped. Not an error:
    /// the tree is untouched and the node is immediately re-eligible.
    Cancelled,
}

/// Executes maintenance work produced by the scheduler.
pub trait WorkExecutor: Send + Sync {
    /// Run one job to completion, cancellation, or failure.
    fn execute(
        &self,
        job: WorkJob,
    ) -> Pin<Box<dyn Future<Output = Result<WorkOutcome, WorkError>> + Send + '_>>;
}
