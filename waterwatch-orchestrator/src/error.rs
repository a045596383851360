//! Error types for the orchestrator library

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;
use waterwatch_core::domain::job::JobStatus;
use waterwatch_core::domain::source::SourceId;

/// Job queue errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {id} is {status}, expected {expected}")]
    InvalidState {
        id: Uuid,
        status: JobStatus,
        expected: &'static str,
    },

    #[error("job {id} reached its retry limit of {max_retries}")]
    RetryLimit { id: Uuid, max_retries: u32 },

    #[error("job queue is stopped")]
    QueueStopped,
}

/// Stage of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Pulling records from the source
    Fetch,
    /// Looking up stored predecessors and diffing
    Detect,
    /// Writing records and audit entries
    Persist,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPhase::Fetch => "fetch",
            SyncPhase::Detect => "detect",
            SyncPhase::Persist => "persist",
        };
        f.write_str(s)
    }
}

/// A failed sync run, naming the phase that failed
#[derive(Debug, Clone, Error)]
#[error("{source_id} sync failed during {phase}: {message}")]
pub struct SyncError {
    pub phase: SyncPhase,
    pub source_id: SourceId,
    pub message: String,
}

impl SyncError {
    pub fn new(phase: SyncPhase, source_id: SourceId, message: impl Into<String>) -> Self {
        Self {
            phase,
            source_id,
            message: message.into(),
        }
    }

    pub fn fetch(source_id: SourceId, err: &anyhow::Error) -> Self {
        Self::new(SyncPhase::Fetch, source_id, format!("{:#}", err))
    }

    pub fn detect(source_id: SourceId, err: StorageError) -> Self {
        Self::new(SyncPhase::Detect, source_id, err.to_string())
    }

    pub fn persist(source_id: SourceId, err: StorageError) -> Self {
        Self::new(SyncPhase::Persist, source_id, err.to_string())
    }

    pub fn cancelled(source_id: SourceId, phase: SyncPhase) -> Self {
        Self::new(phase, source_id, "cancelled")
    }
}

/// Scheduler control errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

/// Storage collaborator errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

/// Broker collaborator errors
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("broker payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}
