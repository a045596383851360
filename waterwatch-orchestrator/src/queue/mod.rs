//! Job queue and worker pool
//!
//! Pending jobs wait in a priority heap; a fixed pool of workers pulls the
//! lowest priority value first, ties going to the earliest submission. Jobs
//! move to a capped retention list once they reach a terminal status.

mod handler;
mod metrics;
mod worker;

pub use handler::{HandlerRegistry, JobContext, JobHandler, SyncJobHandler};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use waterwatch_core::change::Record;
use waterwatch_core::domain::event::{ChangeEvent, ChangeType};
use waterwatch_core::domain::job::{Job, JobKind, JobStatus};
use waterwatch_core::dto::job::JobMetrics;

use crate::error::JobError;
use crate::notify::Notifier;

/// Entity type of job lifecycle events
pub const JOB_ENTITY: &str = "job";

const EVENT_SOURCE: &str = "job_queue";

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub worker_count: usize,
    /// Running jobs older than this are cancelled by the sweep
    pub job_timeout: Duration,
    pub sweep_interval: Duration,
    /// Maximum number of finished jobs kept
    pub history_limit: usize,
    /// Maximum age of finished jobs kept
    pub retention: Duration,
    pub cleanup_interval: Duration,
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            job_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            history_limit: 1000,
            retention: Duration::from_secs(86_400),
            cleanup_interval: Duration::from_secs(3600),
            max_retries: 3,
        }
    }
}

/// A pending or running job with its control tokens
struct ActiveJob {
    job: Job,
    /// Cooperative cancellation seen by the handler
    cancel: CancellationToken,
    /// Drops the handler future; fired by the timeout sweep
    abort: CancellationToken,
    started: Option<Instant>,
}

#[derive(Default)]
struct QueueState {
    active: HashMap<Uuid, ActiveJob>,
    /// Entries whose job is no longer pending are skipped on pop
    pending: BinaryHeap<Reverse<(i32, u64, Uuid)>>,
    /// Finished jobs, newest first
    completed: VecDeque<Job>,
    seq: u64,
    closed: bool,
}

impl QueueState {
    fn enqueue(&mut self, job: Job) {
        self.seq += 1;
        self.pending.push(Reverse((job.priority, self.seq, job.id)));
        self.active.insert(
            job.id,
            ActiveJob {
                job,
                cancel: CancellationToken::new(),
                abort: CancellationToken::new(),
                started: None,
            },
        );
    }

    fn find(&self, id: Uuid) -> Option<&Job> {
        self.active
            .get(&id)
            .map(|entry| &entry.job)
            .or_else(|| self.completed.iter().find(|job| job.id == id))
    }

    fn retain(&mut self, job: Job, limit: usize) {
        self.completed.push_front(job);
        self.completed.truncate(limit);
    }
}

struct RunState {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct JobQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    wake: Notify,
    handlers: HandlerRegistry,
    notifier: Arc<Notifier>,
    run: Mutex<Option<RunState>>,
}

impl JobQueue {
    pub fn new(config: QueueConfig, handlers: HandlerRegistry, notifier: Arc<Notifier>) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            handlers,
            notifier,
            run: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Spawns the workers, the timeout sweep and the retention cleanup
    ///
    /// Returns `false` if the pool is already running. Jobs submitted before
    /// start wait in the queue.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut run = self.run.lock();
        if run.is_some() {
            return false;
        }
        self.state.lock().closed = false;

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::with_capacity(self.config.worker_count + 2);
        for worker in 0..self.config.worker_count {
            tasks.push(tokio::spawn(
                Arc::clone(self).worker_loop(worker, shutdown.clone()),
            ));
        }
        tasks.push(tokio::spawn(Arc::clone(self).sweep_loop(shutdown.clone())));
        tasks.push(tokio::spawn(Arc::clone(self).cleanup_loop(shutdown.clone())));
        *run = Some(RunState { shutdown, tasks });

        info!(workers = self.config.worker_count, "Job queue started");
        true
    }

    /// Stops accepting jobs, aborts running handlers and waits for the workers
    pub async fn stop(&self) {
        self.state.lock().closed = true;
        let run = self.run.lock().take();
        let Some(run) = run else {
            return;
        };
        run.shutdown.cancel();
        for task in run.tasks {
            if let Err(e) = task.await {
                warn!("Job queue task ended abnormally: {}", e);
            }
        }
        info!("Job queue stopped");
    }

    /// Enqueues a new pending job and returns it without waiting for execution
    pub async fn submit(
        &self,
        kind: JobKind,
        parameters: HashMap<String, JsonValue>,
        priority: i32,
    ) -> Result<Job, JobError> {
        let job = Job::new(
            kind,
            kind.source(),
            parameters,
            priority,
            self.config.max_retries,
        );
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(JobError::QueueStopped);
            }
            state.enqueue(job.clone());
        }
        self.wake.notify_one();

        info!(job_id = %job.id, kind = %kind, priority, "Job submitted");
        self.publish(&job, ChangeType::Submitted).await;
        Ok(job)
    }

    pub fn status(&self, id: Uuid) -> Option<Job> {
        self.state.lock().find(id).cloned()
    }

    /// Active jobs, oldest first, followed by finished jobs, newest first
    pub fn list_recent(&self, limit: usize) -> Vec<Job> {
        let state = self.state.lock();
        let mut active: Vec<Job> = state.active.values().map(|e| e.job.clone()).collect();
        active.sort_by_key(|job| job.created_at);
        active
            .into_iter()
            .chain(state.completed.iter().cloned())
            .take(limit)
            .collect()
    }

    /// Cancels a pending or running job
    ///
    /// A pending job is withdrawn immediately. A running job is marked cancelled
    /// and its handler is signalled; the handler may still run to completion,
    /// in which case its result is discarded.
    pub async fn cancel(&self, id: Uuid) -> Result<Job, JobError> {
        let job = {
            let mut state = self.state.lock();
            let Some(entry) = state.active.get_mut(&id) else {
                return match state.find(id) {
                    Some(job) => Err(invalid_state(job, "pending or running")),
                    None => Err(JobError::NotFound(id)),
                };
            };
            match entry.job.status {
                JobStatus::Pending => {
                    let mut entry = state
                        .active
                        .remove(&id)
                        .ok_or(JobError::NotFound(id))?;
                    entry.job.transition(JobStatus::Cancelled);
                    let job = entry.job.clone();
                    state.retain(entry.job, self.config.history_limit);
                    job
                }
                JobStatus::Running => {
                    entry.job.transition(JobStatus::Cancelled);
                    entry.cancel.cancel();
                    entry.job.clone()
                }
                _ => return Err(invalid_state(&entry.job, "pending or running")),
            }
        };

        info!(job_id = %id, "Job cancelled");
        self.publish(&job, ChangeType::Cancelled).await;
        Ok(job)
    }

    /// Resubmits a failed job as a fresh pending job
    ///
    /// The failed job stays in history untouched.
    pub async fn retry(&self, id: Uuid) -> Result<Job, JobError> {
        let next = {
            let mut state = self.state.lock();
            let failed = state.find(id).ok_or(JobError::NotFound(id))?;
            if failed.status != JobStatus::Failed {
                return Err(invalid_state(failed, "failed"));
            }
            let next = failed.retry().ok_or(JobError::RetryLimit {
                id,
                max_retries: failed.max_retries,
            })?;
            if state.closed {
                return Err(JobError::QueueStopped);
            }
            state.enqueue(next.clone());
            next
        };
        self.wake.notify_one();

        info!(job_id = %next.id, retry_of = %id, attempt = next.retry_count, "Job retried");
        self.publish(&next, ChangeType::Retried).await;
        Ok(next)
    }

    /// Aggregate metrics, derived from the current history on every call
    pub fn metrics(&self) -> JobMetrics {
        let state = self.state.lock();
        let pending = state
            .active
            .values()
            .filter(|e| e.job.status == JobStatus::Pending)
            .count();
        let running = state.active.values().filter(|e| e.started.is_some()).count();
        metrics::compute(
            state.completed.iter(),
            pending,
            running,
            self.config.worker_count,
        )
    }

    /// Evicts finished jobs past the retention age or the history limit
    ///
    /// Returns the number of jobs evicted.
    pub fn cleanup(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.evict_before(cutoff)
    }

    fn evict_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();
        let before = state.completed.len();
        state
            .completed
            .retain(|job| job.completed_at.is_none_or(|at| at >= cutoff));
        state.completed.truncate(self.config.history_limit);
        before - state.completed.len()
    }

    fn update_progress(&self, id: Uuid, percent: u8, message: &str) {
        if let Some(entry) = self.state.lock().active.get_mut(&id) {
            entry.job.progress = percent.min(100);
            entry.job.progress_message = Some(message.to_string());
        }
    }

    async fn publish(&self, job: &Job, change_type: ChangeType) {
        let event = ChangeEvent::new(
            JOB_ENTITY,
            job.id.to_string(),
            change_type,
            job_record(job),
            EVENT_SOURCE,
        );
        self.notifier.notify_change(event).await;
    }
}

fn invalid_state(job: &Job, expected: &'static str) -> JobError {
    JobError::InvalidState {
        id: job.id,
        status: job.status,
        expected,
    }
}

/// Fields of a job carried by its lifecycle events
fn job_record(job: &Job) -> Record {
    let mut record = Record::new();
    record.insert("kind".into(), json!(job.kind));
    record.insert("source".into(), json!(job.source));
    record.insert("status".into(), json!(job.status));
    record.insert("priority".into(), json!(job.priority));
    record.insert("retry_count".into(), json!(job.retry_count));
    if let Some(retry_of) = job.retry_of {
        record.insert("retry_of".into(), json!(retry_of));
    }
    if let Some(error) = &job.error_message {
        record.insert("error".into(), json!(error));
    }
    if let Some(phase) = &job.error_phase {
        record.insert("error_phase".into(), json!(phase));
    }
    if let Some(result) = &job.result {
        record.insert("result".into(), result.clone());
    }
    record
}
