//! Job DTOs
//!
//! Request and response types for the job endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::domain::job::JobKind;

/// Priority given to jobs submitted without one
pub const DEFAULT_PRIORITY: i32 = 5;

/// Request to submit a new job
///
/// The source is derived from the job kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJob {
    pub kind: JobKind,

    #[serde(default)]
    pub parameters: HashMap<String, JsonValue>,

    /// Lower values run first; defaults to [`DEFAULT_PRIORITY`]
    #[serde(default)]
    pub priority: Option<i32>,
}

impl SubmitJob {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            parameters: HashMap::new(),
            priority: None,
        }
    }
}

/// Query parameters for listing recent jobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobListQuery {
    pub limit: Option<usize>,
}

/// Aggregate processing metrics, derived from job history on every read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    /// Jobs that reached a terminal status
    pub total_processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// `succeeded / total_processed`, 0.0 when nothing was processed
    pub success_rate: f64,
    /// Mean wall-clock seconds over finished jobs that actually started
    pub average_processing_secs: f64,
    pub queue_depth: usize,
    pub active_workers: usize,
    pub worker_count: usize,
}
