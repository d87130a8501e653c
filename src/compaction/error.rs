//! Errors surfaced by work execution and scheduling.

use thiserror::Error;

use crate::tree::TreeError;

/// Errors that can surface while executing or committing maintenance work.
#[derive(Debug, Error)]
pub enum WorkError {
    /// The tree model rejected the job's inputs or its committed result.
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// A recoverable execution failure; the job is discarded and the node is
    /// re-evaluated on the next cycle.
    #[error("work execution failed: {0}")]
    Execution(String),
    /// The scheduler has shut down.
    #[error("scheduler closed")]
    Closed,
}
