//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::source::SourceId;

/// Unit of schedulable work
///
/// A job is owned by the queue while pending, by exactly one worker while
/// running, and lives in the retention set once it reaches a terminal status.
/// Retrying a failed job never mutates it: a fresh job is created instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub source: SourceId,
    pub parameters: HashMap<String, JsonValue>,
    /// Lower values are served first
    pub priority: i32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 0-100
    pub progress: u8,
    pub progress_message: Option<String>,
    pub error_message: Option<String>,
    /// Sync phase that failed, when the handler reported one
    pub error_phase: Option<String>,
    pub result: Option<JsonValue>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// The failed job this one retries
    pub retry_of: Option<Uuid>,
}

impl Job {
    pub fn new(
        kind: JobKind,
        source: SourceId,
        parameters: HashMap<String, JsonValue>,
        priority: i32,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source,
            parameters,
            priority,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            progress_message: None,
            error_message: None,
            error_phase: None,
            result: None,
            retry_count: 0,
            max_retries,
            retry_of: None,
        }
    }

    /// Moves the job to `next` if the lifecycle allows it
    ///
    /// Sets `started_at` on entering `Running` and `completed_at` on entering
    /// any terminal status. Returns `false` (and leaves the job untouched) for
    /// backward or repeated transitions.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        match next {
            JobStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.completed_at = Some(now),
            _ => {}
        }
        self.status = next;
        true
    }

    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < self.max_retries
    }

    /// Builds the pending job that retries this one
    ///
    /// Returns `None` unless the job failed and is under its retry limit.
    pub fn retry(&self) -> Option<Job> {
        if !self.can_retry() {
            return None;
        }
        let mut next = Job::new(
            self.kind,
            self.source,
            self.parameters.clone(),
            self.priority,
            self.max_retries,
        );
        next.retry_count = self.retry_count + 1;
        next.retry_of = Some(self.id);
        Some(next)
    }

    /// Wall-clock time between start and completion
    pub fn processing_time(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Job lifecycle status
///
/// Transitions only move forward: `Pending -> Running -> {Succeeded | Failed | Cancelled}`,
/// with `Pending -> Cancelled` also allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Closed set of job kinds the worker pool knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DwsSync,
    TreasurySync,
    CorrelationAnalysis,
}

impl JobKind {
    pub fn source(&self) -> SourceId {
        match self {
            JobKind::DwsSync => SourceId::Dws,
            JobKind::TreasurySync => SourceId::Treasury,
            JobKind::CorrelationAnalysis => SourceId::Correlation,
        }
    }

    pub fn for_source(source: SourceId) -> Self {
        match source {
            SourceId::Dws => JobKind::DwsSync,
            SourceId::Treasury => JobKind::TreasurySync,
            SourceId::Correlation => JobKind::CorrelationAnalysis,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::DwsSync => "dws_sync",
            JobKind::TreasurySync => "treasury_sync",
            JobKind::CorrelationAnalysis => "correlation_analysis",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dws_sync" => Ok(JobKind::DwsSync),
            "treasury_sync" => Ok(JobKind::TreasurySync),
            "correlation_analysis" => Ok(JobKind::CorrelationAnalysis),
            other => Err(format!("unknown job kind '{}'", other)),
        }
    }
}
