//! On-demand sync handler

use axum::{Json, extract::State, http::StatusCode};
use waterwatch_core::dto::scheduler::{SyncTrigger, SyncTriggerResponse};

use crate::api::error::ApiResult;
use crate::context::AppState;

/// POST /sync/trigger
/// Queues one-off sync jobs for `all` or a named source
pub async fn trigger_sync(
    State(state): State<AppState>,
    Json(req): Json<SyncTrigger>,
) -> ApiResult<(StatusCode, Json<SyncTriggerResponse>)> {
    tracing::info!("Manual sync requested for {}", req.source);
    let response = state.trigger_sync(req.source, req.priority).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}
