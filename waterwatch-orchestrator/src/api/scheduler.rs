//! Scheduler API Handlers
//!
//! Start, stop, inspect and retune the recurring loops.

use axum::{Json, extract::State};
use waterwatch_core::dto::scheduler::{
    SchedulerConfigUpdate, SchedulerSettings, SchedulerStatus, SchedulerToggle,
};

use crate::api::error::ApiResult;
use crate::context::AppState;

/// POST /scheduler/start
/// Starts the loops; starting a running scheduler is a no-op
pub async fn start_scheduler(State(state): State<AppState>) -> Json<SchedulerToggle> {
    let started = state.start_scheduler().await;
    tracing::info!(started, "Scheduler start requested");
    Json(SchedulerToggle {
        running: true,
        changed: started,
    })
}

/// POST /scheduler/stop
/// Stops the loops; stopping a stopped scheduler is a no-op
pub async fn stop_scheduler(State(state): State<AppState>) -> Json<SchedulerToggle> {
    let stopped = state.stop_scheduler().await;
    tracing::info!(stopped, "Scheduler stop requested");
    Json(SchedulerToggle {
        running: false,
        changed: stopped,
    })
}

/// GET /scheduler/status
pub async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler_status())
}

/// PUT /scheduler/config
/// Applies a partial timing update
pub async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<SchedulerConfigUpdate>,
) -> ApiResult<Json<SchedulerSettings>> {
    let settings = state.update_scheduler_config(&update).await?;
    Ok(Json(settings))
}
