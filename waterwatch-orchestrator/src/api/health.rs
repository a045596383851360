//! Liveness endpoint

use axum::{Json, extract::State};
use waterwatch_core::dto::health::HealthReport;

use crate::context::AppState;

/// GET /health
/// Liveness plus a few cheap counters
pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    let metrics = state.job_metrics();
    Json(HealthReport {
        status: "ok".to_string(),
        scheduler_running: state.scheduler_status().running,
        queue_depth: metrics.queue_depth,
        active_workers: metrics.active_workers,
        connections: state.notifier().connection_count(),
    })
}
