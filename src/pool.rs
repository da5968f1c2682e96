//! Bounded-concurrency job scheduler.
//!
//! One owner loop keeps the queue, spawns up to `workers` job tasks into a
//! [`JoinSet`], and forwards every event from the shared channel to the
//! observer. It waits on the channel, task completion and cancellation with
//! `select!`; there is no polling.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::progress::{JobEvent, JobId, JobResult, Reporter, Stage, Update, event_channel};

pub const DEFAULT_BACKLOG: usize = 256;
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// One URL with its run-stable identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: JobId,
    pub url: String,
}

/// Runs one job to completion.
///
/// Implementations own the event contract: non-decreasing updates, then a
/// terminal update and exactly one [`JobResult`] through `reporter`.
pub trait JobExecutor: Send + Sync + 'static {
    type Output: Send + 'static;

    fn execute(
        &self,
        job: QueuedJob,
        reporter: Arc<dyn Reporter>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Self::Output, Arc<AppError>>> + Send;
}

#[derive(Debug)]
pub struct JobOutcome<T> {
    pub job: QueuedJob,
    pub result: Result<T, Arc<AppError>>,
}

pub struct WorkerPool {
    jobs: Vec<QueuedJob>,
    workers: usize,
    backlog: usize,
    grace: Duration,
}

impl WorkerPool {
    /// Assigns `job-1..job-N` in input order.
    pub fn new(urls: impl IntoIterator<Item = String>, workers: usize) -> Self {
        let jobs = urls
            .into_iter()
            .enumerate()
            .map(|(i, url)| QueuedJob {
                id: JobId(i + 1),
                url,
            })
            .collect();
        Self {
            jobs,
            workers: workers.max(1),
            backlog: DEFAULT_BACKLOG,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn jobs(&self) -> &[QueuedJob] {
        &self.jobs
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs every job and returns one outcome per job, in job order.
    ///
    /// Every job gets exactly one result on `observer`, including jobs that
    /// never started because the run was cancelled.
    pub async fn run<E: JobExecutor>(
        self,
        executor: Arc<E>,
        observer: &dyn Reporter,
        cancel: &CancellationToken,
    ) -> Vec<JobOutcome<E::Output>> {
        let (tx, mut rx) = event_channel(self.backlog);
        let reporter: Arc<dyn Reporter> = Arc::new(tx);
        let order: Vec<QueuedJob> = self.jobs.clone();
        let mut queue: VecDeque<QueuedJob> = self.jobs.into();
        let mut tasks: JoinSet<(JobId, Result<E::Output, Arc<AppError>>)> = JoinSet::new();
        let mut finished: BTreeMap<JobId, Result<E::Output, Arc<AppError>>> = BTreeMap::new();
        let mut reported: HashSet<JobId> = HashSet::new();
        let mut deadline: Option<Instant> = None;
        let mut grace_expired = false;

        log::debug!(
            target: "sniplette::pool",
            "Starting {} job(s) with {} worker(s)",
            queue.len(),
            self.workers
        );

        loop {
            if !cancel.is_cancelled() {
                while tasks.len() < self.workers {
                    let Some(job) = queue.pop_front() else { break };
                    log::debug!(target: "sniplette::pool", "[{}] Starting {}", job.id, job.url);
                    let executor = Arc::clone(&executor);
                    let reporter = Arc::clone(&reporter);
                    let token = cancel.child_token();
                    tasks.spawn(async move {
                        let id = job.id;
                        (id, executor.execute(job, reporter, token).await)
                    });
                }
            }
            if tasks.is_empty() && (queue.is_empty() || cancel.is_cancelled()) {
                break;
            }

            tokio::select! {
                biased;
                Some(event) = rx.recv() => forward(event, observer, &mut reported),
                Some(joined) = tasks.join_next() => match joined {
                    Ok((id, result)) => {
                        finished.insert(id, result);
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => log::error!(target: "sniplette::pool", "Job task failed: {}", e),
                },
                _ = cancel.cancelled(), if deadline.is_none() => {
                    log::warn!(
                        target: "sniplette::pool",
                        "Cancelled; {} queued job(s) will not start",
                        queue.len()
                    );
                    deadline = Some(Instant::now() + self.grace);
                    for job in queue.drain(..) {
                        abort_job(job.id, observer, &mut reported);
                    }
                },
                _ = sleep_until(deadline), if !grace_expired => {
                    log::warn!(
                        target: "sniplette::pool",
                        "Grace period elapsed; aborting {} job(s)",
                        tasks.len()
                    );
                    tasks.abort_all();
                    grace_expired = true;
                },
            }
        }

        drop(reporter);
        while let Some(event) = rx.recv().await {
            forward(event, observer, &mut reported);
        }
        if rx.dropped() > 0 {
            log::debug!(
                target: "sniplette::pool",
                "Dropped {} progress event(s) under load",
                rx.dropped()
            );
        }

        order
            .into_iter()
            .map(|job| {
                let result = finished
                    .remove(&job.id)
                    .unwrap_or_else(|| Err(Arc::new(AppError::aborted())));
                if !reported.contains(&job.id) {
                    let error = match &result {
                        Err(e) => Arc::clone(e),
                        Ok(_) => Arc::new(AppError::aborted()),
                    };
                    report_failure(job.id, error, observer);
                    reported.insert(job.id);
                }
                JobOutcome { job, result }
            })
            .collect()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn forward(event: JobEvent, observer: &dyn Reporter, reported: &mut HashSet<JobId>) {
    match event {
        JobEvent::Update(update) => observer.update(update),
        JobEvent::Log(line) => observer.log(line),
        JobEvent::Result(result) => {
            if reported.insert(result.job_id) {
                observer.result(result);
            }
        }
    }
}

fn report_failure(id: JobId, error: Arc<AppError>, observer: &dyn Reporter) {
    observer.update(Update::new(id, Stage::Error, error.to_string()));
    observer.result(JobResult::failed(id, error));
}

fn abort_job(id: JobId, observer: &dyn Reporter, reported: &mut HashSet<JobId>) {
    if reported.insert(id) {
        report_failure(id, Arc::new(AppError::aborted()), observer);
    }
}
