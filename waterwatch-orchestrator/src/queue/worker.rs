//! Worker, timeout sweep and cleanup loops

use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use waterwatch_core::domain::event::ChangeType;
use waterwatch_core::domain::job::{Job, JobStatus};

use super::{JobContext, JobQueue};
use crate::error::SyncError;
use crate::source::Progress;

/// How a dispatched handler ended
enum Finish {
    Done(Result<JsonValue, SyncError>),
    /// The handler future was dropped by the sweep or by shutdown
    Aborted(&'static str),
}

struct Dispatch {
    ctx: JobContext,
    abort: CancellationToken,
}

impl JobQueue {
    pub(super) async fn worker_loop(self: Arc<Self>, worker: usize, shutdown: CancellationToken) {
        debug!(worker, "Worker started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.next_job() {
                Some(dispatch) => self.execute(worker, dispatch, &shutdown).await,
                None => tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = self.wake.notified() => {}
                },
            }
        }
        debug!(worker, "Worker stopped");
    }

    /// Pops the best pending job and marks it running
    fn next_job(self: &Arc<Self>) -> Option<Dispatch> {
        let mut state = self.state.lock();
        while let Some(std::cmp::Reverse((_, _, id))) = state.pending.pop() {
            let Some(entry) = state.active.get_mut(&id) else {
                continue;
            };
            if entry.job.status != JobStatus::Pending {
                continue;
            }
            entry.job.transition(JobStatus::Running);
            entry.started = Some(Instant::now());

            let queue = Arc::downgrade(self);
            let progress = Progress::new(move |percent, message| {
                if let Some(queue) = queue.upgrade() {
                    queue.update_progress(id, percent, message);
                }
            });
            return Some(Dispatch {
                ctx: JobContext {
                    job_id: id,
                    kind: entry.job.kind,
                    parameters: entry.job.parameters.clone(),
                    cancel: entry.cancel.clone(),
                    progress,
                },
                abort: entry.abort.clone(),
            });
        }
        None
    }

    async fn execute(&self, worker: usize, dispatch: Dispatch, shutdown: &CancellationToken) {
        let Dispatch { ctx, abort } = dispatch;
        let id = ctx.job_id;
        let handler = self.handlers.get(ctx.kind);
        info!(job_id = %id, kind = %ctx.kind, worker, "Job started");

        let finish = tokio::select! {
            _ = abort.cancelled() => Finish::Aborted("timed out"),
            _ = shutdown.cancelled() => Finish::Aborted("job queue stopped"),
            result = handler.run(ctx) => Finish::Done(result),
        };

        // a job cancelled earlier already had its event published
        if let Some((job, reported)) = self.complete(id, finish) {
            if !reported {
                let change = match job.status {
                    JobStatus::Cancelled => ChangeType::Cancelled,
                    _ => ChangeType::Completed,
                };
                self.publish(&job, change).await;
            }
        }
    }

    /// Moves a finished job into history and returns it, with whether it was
    /// already cancelled when its handler ended
    ///
    /// A job cancelled while running keeps its cancelled status and loses its
    /// result.
    fn complete(&self, id: Uuid, finish: Finish) -> Option<(Job, bool)> {
        let (job, reported) = {
            let mut state = self.state.lock();
            let mut entry = state.active.remove(&id)?;
            let job = &mut entry.job;
            let reported = job.status == JobStatus::Cancelled;

            match finish {
                _ if job.status == JobStatus::Cancelled => {
                    info!(job_id = %id, "Cancelled job finished; result discarded");
                }
                Finish::Done(Ok(result)) => {
                    job.transition(JobStatus::Succeeded);
                    job.progress = 100;
                    job.result = Some(result);
                    info!(job_id = %id, "Job succeeded");
                }
                Finish::Done(Err(e)) => {
                    job.transition(JobStatus::Failed);
                    job.error_message = Some(e.message.clone());
                    job.error_phase = Some(e.phase.to_string());
                    error!(job_id = %id, phase = %e.phase, "Job failed: {}", e);
                }
                Finish::Aborted(reason) => {
                    job.transition(JobStatus::Cancelled);
                    job.error_message = Some(reason.to_string());
                    warn!(job_id = %id, "Job aborted: {}", reason);
                }
            }
            let job = entry.job.clone();
            state.retain(entry.job, self.config.history_limit);
            (job, reported)
        };

        if job.status == JobStatus::Failed {
            self.notifier.notify_system_error(
                "job_failed",
                job.error_message.as_deref().unwrap_or("job failed"),
                json!({
                    "job_id": job.id,
                    "kind": job.kind,
                    "phase": job.error_phase,
                    "retry_count": job.retry_count,
                }),
            );
        }
        Some((job, reported))
    }

    pub(super) async fn sweep_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    for (job, newly_cancelled) in self.sweep_timeouts() {
                        self.notifier.notify_system_error(
                            "job_timeout",
                            job.error_message.as_deref().unwrap_or("timed out"),
                            json!({
                                "job_id": job.id,
                                "kind": job.kind,
                                "already_cancelled": !newly_cancelled,
                            }),
                        );
                        if newly_cancelled {
                            self.publish(&job, ChangeType::Cancelled).await;
                        }
                    }
                }
            }
        }
    }

    /// Aborts every handler that has held a worker past the timeout
    ///
    /// Running jobs are cancelled first. Jobs already cancelled by a caller
    /// whose handler ignored the signal are only aborted. Each swept job is
    /// returned with whether the sweep cancelled it.
    fn sweep_timeouts(&self) -> Vec<(Job, bool)> {
        let timeout = self.config.job_timeout;
        let mut state = self.state.lock();
        let mut swept = Vec::new();
        for entry in state.active.values_mut() {
            let Some(started) = entry.started else {
                continue;
            };
            if entry.abort.is_cancelled() || started.elapsed() <= timeout {
                continue;
            }
            let newly_cancelled = entry.job.transition(JobStatus::Cancelled);
            if newly_cancelled {
                entry.job.error_message =
                    Some(format!("timed out after {}s", timeout.as_secs()));
                warn!(job_id = %entry.job.id, "Job exceeded {}s timeout", timeout.as_secs());
            } else {
                warn!(
                    job_id = %entry.job.id,
                    "Cancelled job still running after {}s; aborting handler",
                    timeout.as_secs()
                );
            }
            entry.cancel.cancel();
            entry.abort.cancel();
            swept.push((entry.job.clone(), newly_cancelled));
        }
        swept
    }

    pub(super) async fn cleanup_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.cleanup();
                    if evicted > 0 {
                        debug!(evicted, "Evicted finished jobs");
                    }
                }
            }
        }
    }
}
