//! Liveness report

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub scheduler_running: bool,
    pub queue_depth: usize,
    pub active_workers: usize,
    /// Open WebSocket connections
    pub connections: usize,
}
