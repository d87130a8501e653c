//! The maintenance control loop: scan → rank → admit → dispatch → idle-wait.
//!
//! One control task periodically re-evaluates every node through the work
//! selector, ranks the resulting candidates by urgency, and hands the
//! winners to a fixed-size worker pool over a bounded channel. At most one
//! outstanding work item may reference a given node, and the number of jobs
//! in flight never exceeds the configured worker count; surplus candidates
//! simply wait for the next cycle.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::{
    compaction::{
        executor::{WorkExecutor, WorkJob, WorkOutcome},
        selector::{select, WorkItem, WorkKind, WorkTarget},
        states::{JobState, WorkStates},
    },
    config::{ConfigError, SchedulerConfig, Thresholds},
    logging::engine_log,
    tree::{NodeId, Tree},
};

/// Terminal outcome of a dispatched job, as reported to observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job's result was committed to the tree.
    Committed,
    /// The job failed; the node remains eligible and will be re-evaluated.
    Failed,
    /// The job was cooperatively cancelled; the tree is untouched.
    Cancelled,
}

/// Job-completion notification for observability collaborators.
#[derive(Clone, Debug)]
pub struct JobReport {
    /// Source node of the completed job.
    pub node: NodeId,
    /// Kind of work that ran.
    pub kind: WorkKind,
    /// How the job ended.
    pub outcome: JobOutcome,
}

/// Point-in-time view of the scheduler's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Completed scheduling cycles.
    pub cycles: u64,
    /// Jobs handed to workers, per work kind (indexed by [`WorkKind::index`]).
    pub dispatched: [u64; WorkKind::COUNT],
    /// Jobs whose results were committed.
    pub committed: u64,
    /// Jobs that failed in execution or at commit.
    pub failed: u64,
    /// Jobs cancelled cooperatively.
    pub cancelled: u64,
}

pub(crate) struct SchedulerMetrics {
    cycles: AtomicU64,
    dispatched: [AtomicU64; WorkKind::COUNT],
    committed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl SchedulerMetrics {
    fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            dispatched: std::array::from_fn(|_| AtomicU64::new(0)),
            committed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    fn record(&self, outcome: JobOutcome) {
        let counter = match outcome {
            JobOutcome::Committed => &self.committed,
            JobOutcome::Failed => &self.failed,
            JobOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            dispatched: std::array::from_fn(|i| self.dispatched[i].load(Ordering::Relaxed)),
            committed: self.committed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// A selected work item together with the nodes it claims.
#[derive(Clone, Debug)]
pub(crate) struct Candidate {
    pub(crate) item: WorkItem,
    pub(crate) excl: Vec<NodeId>,
}

struct DispatchedJob {
    id: Ulid,
    item: WorkItem,
    excl: Vec<NodeId>,
}

/// Nodes an item claims while in flight: the source, plus existing children
/// when output spills into them.
pub(crate) fn exclusion_set(item: &WorkItem, children: &[NodeId]) -> Vec<NodeId> {
    let mut excl = vec![item.node];
    if item.target == WorkTarget::Children {
        excl.extend_from_slice(children);
    }
    excl
}

/// Order candidates most-urgent first; ties break toward the lower node id
/// so ranking is deterministic.
pub(crate) fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.item
            .urgency
            .cmp(&a.item.urgency)
            .then(a.item.node.cmp(&b.item.node))
    });
}

/// Take up to `slots` ranked candidates whose claimed nodes are disjoint
/// from `busy` and from every already-taken candidate.
pub(crate) fn admit(
    ranked: Vec<Candidate>,
    busy: &HashSet<NodeId>,
    slots: usize,
) -> Vec<Candidate> {
    let mut claimed = busy.clone();
    let mut admitted = Vec::new();
    for candidate in ranked {
        if admitted.len() >= slots {
            break;
        }
        if candidate.excl.iter().any(|n| claimed.contains(n)) {
            continue;
        }
        claimed.extend(candidate.excl.iter().copied());
        admitted.push(candidate);
    }
    admitted
}

/// Builder for the background maintenance scheduler.
pub struct Scheduler {
    tree: Tree,
    thresholds: Thresholds,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Validate configuration and prepare a scheduler for `tree`.
    pub fn new(
        tree: Tree,
        thresholds: Thresholds,
        config: SchedulerConfig,
    ) -> Result<Self, ConfigError> {
        thresholds.validate()?;
        config.validate()?;
        Ok(Self {
            tree,
            thresholds,
            config,
        })
    }

    /// Spawn the control task and worker pool. Requires a Tokio runtime.
    pub fn start<E>(self, executor: E) -> SchedulerHandle
    where
        E: WorkExecutor + 'static,
    {
        let Self {
            tree,
            thresholds,
            config,
        } = self;

        let (kick_tx, kick_rx) = flume::bounded::<()>(1);
        let (work_tx, work_rx) = flume::bounded::<DispatchedJob>(config.queue_depth);
        let (report_tx, report_rx) = flume::unbounded::<JobReport>();
        let shutdown = CancellationToken::new();
        // When draining, in-flight jobs never observe the shutdown signal.
        let job_cancel = if config.drain_on_shutdown {
            CancellationToken::new()
        } else {
            shutdown.child_token()
        };

        let states = WorkStates::new();
        let metrics = Arc::new(SchedulerMetrics::new());
        let shared_thresholds = Arc::new(Mutex::new(thresholds.clone()));
        let executor = Arc::new(executor);

        let mut tasks = Vec::with_capacity(config.workers + 1);
        for _ in 0..config.workers {
            tasks.push(tokio::spawn(worker_loop(
                tree.clone(),
                Arc::clone(&executor),
                states.clone(),
                Arc::clone(&metrics),
                report_tx.clone(),
                work_rx.clone(),
                job_cancel.clone(),
            )));
        }
        tasks.push(tokio::spawn(control_loop(
            tree,
            states.clone(),
            Arc::clone(&metrics),
            Arc::clone(&shared_thresholds),
            thresholds,
            config,
            work_tx,
            report_tx,
            kick_rx,
            shutdown.clone(),
        )));

        SchedulerHandle {
            kick_tx,
            report_rx,
            thresholds: shared_thresholds,
            metrics,
            states,
            shutdown,
            tasks,
        }
    }
}

/// Control surface for a running scheduler.
pub struct SchedulerHandle {
    kick_tx: flume::Sender<()>,
    report_rx: flume::Receiver<JobReport>,
    thresholds: Arc<Mutex<Thresholds>>,
    metrics: Arc<SchedulerMetrics>,
    states: WorkStates,
    shutdown: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Nudge the scheduler to rescan without waiting out the idle delay.
    ///
    /// Best effort: a kick that races an already-pending one is dropped.
    pub fn kick(&self) {
        let _ = self.kick_tx.try_send(());
    }

    /// Swap the thresholds used from the next cycle onward.
    pub fn set_thresholds(&self, thresholds: Thresholds) -> Result<(), ConfigError> {
        thresholds.validate()?;
        if let Ok(mut guard) = self.thresholds.lock() {
            *guard = thresholds;
        }
        Ok(())
    }

    /// Receiver for job-completion notifications.
    pub fn reports(&self) -> flume::Receiver<JobReport> {
        self.report_rx.clone()
    }

    /// Current counter values.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of jobs currently admitted or running.
    pub async fn in_flight(&self) -> usize {
        self.states.in_flight().await
    }

    /// Stop the scheduler: no further work is admitted. In-flight jobs run
    /// to completion or are cooperatively cancelled, per the configured
    /// drain policy, and their completion reports are still delivered.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        join_all(self.tasks).await;
        engine_log!(log::Level::Info, "scheduler_stop", "drained");
    }
}

#[allow(clippy::too_many_arguments)]
async fn control_loop(
    tree: Tree,
    states: WorkStates,
    metrics: Arc<SchedulerMetrics>,
    shared_thresholds: Arc<Mutex<Thresholds>>,
    mut thresholds: Thresholds,
    config: SchedulerConfig,
    work_tx: flume::Sender<DispatchedJob>,
    report_tx: flume::Sender<JobReport>,
    kick_rx: flume::Receiver<()>,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        if let Ok(guard) = shared_thresholds.lock() {
            thresholds.clone_from(&guard);
        }

        tree.tick_idle().await;
        let snapshots = tree.snapshot().await;
        let busy = states.busy_snapshot().await;

        let mut candidates = Vec::new();
        for snap in &snapshots {
            // A node with an outstanding item is skipped until it completes.
            if busy.contains(&snap.node) {
                continue;
            }
            if let Some(item) = select(snap, &thresholds) {
                let excl = exclusion_set(&item, &snap.children);
                candidates.push(Candidate { item, excl });
            }
        }
        rank(&mut candidates);

        let slots = config.workers.saturating_sub(states.in_flight().await);
        let admitted = admit(candidates, &busy, slots);
        engine_log!(
            log::Level::Debug,
            "scan",
            "nodes={} admitted={} slots={}",
            snapshots.len(),
            admitted.len(),
            slots,
        );

        for candidate in admitted {
            let id = Ulid::new();
            if !states.admit(id, &candidate.excl).await {
                continue;
            }
            engine_log!(
                log::Level::Debug,
                "dispatch",
                "job={} node={} kind={} urgency={}",
                id,
                candidate.item.node,
                candidate.item.kind.as_str(),
                candidate.item.urgency,
            );
            let job = DispatchedJob {
                id,
                item: candidate.item,
                excl: candidate.excl,
            };
            if let Err(err) = work_tx.try_send(job) {
                // Unreachable while workers are alive: admitted jobs never
                // exceed `workers` and `queue_depth >= workers` is validated,
                // so the queue always has room. Still account for the job so
                // observers see every admission resolve.
                let job = match err {
                    flume::TrySendError::Full(job) => job,
                    flume::TrySendError::Disconnected(job) => job,
                };
                states.finish(id, JobState::Failed, &job.excl).await;
                metrics.record(JobOutcome::Failed);
                let _ = report_tx.send(JobReport {
                    node: job.item.node,
                    kind: job.item.kind,
                    outcome: JobOutcome::Failed,
                });
            }
        }
        metrics.cycles.fetch_add(1, Ordering::Relaxed);

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = kick_rx.recv_async() => {}
            _ = tokio::time::sleep(config.cycle_interval) => {}
        }
    }
    // Dropping `work_tx` lets workers drain the queue and exit.
}

async fn worker_loop<E>(
    tree: Tree,
    executor: Arc<E>,
    states: WorkStates,
    metrics: Arc<SchedulerMetrics>,
    reports: flume::Sender<JobReport>,
    work_rx: flume::Receiver<DispatchedJob>,
    cancel: CancellationToken,
) where
    E: WorkExecutor,
{
    while let Ok(job) = work_rx.recv_async().await {
        states.mark_running(job.id).await;
        metrics.dispatched[job.item.kind.index()].fetch_add(1, Ordering::Relaxed);
        let outcome = run_job(&tree, executor.as_ref(), &job, cancel.child_token()).await;
        let state = match outcome {
            JobOutcome::Committed => JobState::Committed,
            JobOutcome::Failed => JobState::Failed,
            JobOutcome::Cancelled => JobState::Cancelled,
        };
        states.finish(job.id, state, &job.excl).await;
        metrics.record(outcome);
        let _ = reports.send(JobReport {
            node: job.item.node,
            kind: job.item.kind,
            outcome,
        });
    }
}

async fn run_job<E>(
    tree: &Tree,
    executor: &E,
    job: &DispatchedJob,
    cancel: CancellationToken,
) -> JobOutcome
where
    E: WorkExecutor + ?Sized,
{
    let inputs = match tree.resolve_inputs(job.item.node, &job.item.inputs).await {
        Ok(inputs) => inputs,
        Err(err) => {
            // The node changed under the queued job; re-selection will retry.
            engine_log!(
                log::Level::Debug,
                "job_stale",
                "job={} node={} err={}",
                job.id,
                job.item.node,
                err,
            );
            return JobOutcome::Failed;
        }
    };
    let work = WorkJob {
        id: job.id,
        item: job.item.clone(),
        inputs,
        cancel,
    };
    match executor.execute(work).await {
        Ok(WorkOutcome::Committed(result)) => {
            match tree.apply_work_result(&job.item, result).await {
                Ok(()) => JobOutcome::Committed,
                Err(err) => {
                    engine_log!(
                        log::Level::Error,
                        "commit_rejected",
                        "job={} node={} err={}",
                        job.id,
                        job.item.node,
                        err,
                    );
                    JobOutcome::Failed
                }
            }
        }
        Ok(WorkOutcome::Cancelled) => JobOutcome::Cancelled,
        Err(err) => {
            engine_log!(
                log::Level::Warn,
                "job_failed",
                "job={} node={} kind={} err={}",
                job.id,
                job.item.node,
                job.item.kind.as_str(),
                err,
            );
            JobOutcome::Failed
        }
    }
}
