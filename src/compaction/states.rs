//! In-flight work bookkeeping shared between the control loop and workers.
//!
//! Tracks which nodes are claimed by outstanding jobs (the node-exclusivity
//! invariant) and each job's lifecycle:
//! `Admitted → Running → {Committed, Cancelled, Failed}`.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_lock::RwLock;
use ulid::Ulid;

use crate::tree::NodeId;

/// Lifecycle state of a dispatched job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum JobState {
    /// Admitted by the scheduler, waiting for a worker.
    Admitted,
    /// Being executed by a worker.
    Running,
    /// Result committed to the tree.
    Committed,
    /// Cooperatively aborted; the tree is untouched.
    Cancelled,
    /// Execution or commit failed; the node stays eligible.
    Failed,
}

impl JobState {
    fn terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Cancelled | Self::Failed)
    }
}

#[derive(Default)]
struct WorkStatesInner {
    busy: HashSet<NodeId>,
    jobs: HashMap<Ulid, JobState>,
}

/// Shared registry of outstanding jobs and the nodes they claim.
#[derive(Clone, Default)]
pub(crate) struct WorkStates {
    inner: Arc<RwLock<WorkStatesInner>>,
}

impl WorkStates {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Nodes currently claimed by outstanding jobs.
    pub(crate) async fn busy_snapshot(&self) -> HashSet<NodeId> {
        self.inner.read().await.busy.clone()
    }

    /// Number of jobs admitted or running.
    pub(crate) async fn in_flight(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    /// Claim `nodes` for a new job. Returns `false` (claiming nothing) when
    /// any node is already claimed.
    pub(crate) async fn admit(&self, id: Ulid, nodes: &[NodeId]) -> bool {
        let mut inner = self.inner.write().await;
        if nodes.iter().any(|n| inner.busy.contains(n)) {
            return false;
        }
        inner.busy.extend(nodes.iter().copied());
        inner.jobs.insert(id, JobState::Admitted);
        true
    }

    /// Transition an admitted job to running.
    pub(crate) async fn mark_running(&self, id: Ulid) {
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.jobs.get_mut(&id) {
            if *state == JobState::Admitted {
                *state = JobState::Running;
            }
        }
    }

    /// Record a job's terminal state and release its claimed nodes.
    pub(crate) async fn finish(&self, id: Ulid, state: JobState, nodes: &[NodeId]) {
        debug_assert!(state.terminal());
        let mut inner = self.inner.write().await;
        if inner.jobs.remove(&id).is_some() {
            for node in nodes {
                inner.busy.remove(node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admit_enforces_node_exclusivity() {
        let states = WorkStates::new();
        let a = Ulid::new();
        let b = Ulid::new();
        assert!(states.admit(a, &[1, 2]).await);
        assert!(!states.admit(b, &[2, 3]).await, "node 2 is claimed");
        // Rejection claims nothing: node 3 stays free.
        assert!(states.admit(b, &[3]).await);
        assert_eq!(states.in_flight().await, 2);
    }

    #[tokio::test]
    async fn finish_releases_claims() {
        let states = WorkStates::new();
        let a = Ulid::new();
        assert!(states.admit(a, &[1, 2]).await);
        states.mark_running(a).await;
        states.finish(a, JobState::Committed, &[1, 2]).await;
        assert_eq!(states.in_flight().await, 0);
        assert!(states.admit(Ulid::new(), &[1]).await);
    }
}
