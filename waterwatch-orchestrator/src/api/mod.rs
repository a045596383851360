//! API Module
//!
//! HTTP and WebSocket surface of the orchestration facade.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod scheduler;
pub mod sync;
pub mod ws;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::context::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Scheduler endpoints
        .route("/scheduler/start", post(scheduler::start_scheduler))
        .route("/scheduler/stop", post(scheduler::stop_scheduler))
        .route("/scheduler/status", get(scheduler::scheduler_status))
        .route("/scheduler/config", put(scheduler::update_config))
        // On-demand sync
        .route("/sync/trigger", post(sync::trigger_sync))
        // Job endpoints
        .route("/job/submit", post(job::submit_job))
        .route("/job/list", get(job::list_jobs))
        .route("/job/metrics", get(job::job_metrics))
        .route("/job/{id}", get(job::get_job))
        .route("/job/{id}/cancel", post(job::cancel_job))
        .route("/job/{id}/retry", post(job::retry_job))
        // Live notifications
        .route("/ws", get(ws::ws_handler))
        .route("/ws/{entity_type}/{entity_id}", get(ws::ws_entity_handler))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
