use waterwatch_core::domain::job::{Job, JobStatus};
use waterwatch_core::dto::job::JobMetrics;

/// Derives metrics from finished jobs plus the live counts
pub(super) fn compute<'a>(
    finished: impl Iterator<Item = &'a Job>,
    queue_depth: usize,
    active_workers: usize,
    worker_count: usize,
) -> JobMetrics {
    let mut metrics = JobMetrics {
        queue_depth,
        active_workers,
        worker_count,
        ..Default::default()
    };
    let mut timed = 0usize;
    let mut total_secs = 0.0;

    for job in finished {
        metrics.total_processed += 1;
        match job.status {
            JobStatus::Succeeded => metrics.succeeded += 1,
            JobStatus::Failed => metrics.failed += 1,
            JobStatus::Cancelled => metrics.cancelled += 1,
            _ => {}
        }
        if let Some(elapsed) = job.processing_time() {
            timed += 1;
            total_secs += elapsed.num_milliseconds() as f64 / 1000.0;
        }
    }

    if metrics.total_processed > 0 {
        metrics.success_rate = metrics.succeeded as f64 / metrics.total_processed as f64;
    }
    if timed > 0 {
        metrics.average_processing_secs = total_secs / timed as f64;
    }
    metrics
}
