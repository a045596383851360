//! Job API Handlers
//!
//! HTTP endpoints for job lifecycle management.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;
use waterwatch_core::domain::job::Job;
use waterwatch_core::dto::job::{JobListQuery, JobMetrics, SubmitJob};

use crate::api::error::ApiResult;
use crate::context::AppState;

/// POST /job/submit
/// Queue a new job
pub async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJob>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    tracing::info!("Submitting {} job", req.kind);
    let job = state.submit_job(req).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /job/list?limit=
/// Active jobs first, then finished jobs newest first
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> Json<Vec<Job>> {
    tracing::debug!("Listing jobs (limit: {:?})", query.limit);
    Json(state.list_jobs(query.limit))
}

/// GET /job/metrics
pub async fn job_metrics(State(state): State<AppState>) -> Json<JobMetrics> {
    Json(state.job_metrics())
}

/// GET /job/{id}
/// Get job details by ID
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);
    Ok(Json(state.job(id)?))
}

/// POST /job/{id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    tracing::info!("Cancelling job: {}", id);
    Ok(Json(state.cancel_job(id).await?))
}

/// POST /job/{id}/retry
/// Resubmit a failed job; returns the new job
pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    tracing::info!("Retrying job: {}", id);
    let job = state.retry_job(id).await?;
    Ok((StatusCode::CREATED, Json(job)))
}
