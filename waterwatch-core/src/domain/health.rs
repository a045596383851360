//! Polling loop health

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::source::SourceId;

/// Status of one recurring polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Stopped,
    /// A sync attempt is in flight
    Running,
    Healthy,
    Error,
    /// Set by the health monitor when no success was seen for two intervals
    Stale,
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopStatus::Stopped => "stopped",
            LoopStatus::Running => "running",
            LoopStatus::Healthy => "healthy",
            LoopStatus::Error => "error",
            LoopStatus::Stale => "stale",
        };
        f.write_str(s)
    }
}

/// Health record for one source loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopHealth {
    pub source: SourceId,
    pub status: LoopStatus,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_errors: u32,
    pub total_errors: u64,
    pub restarts: u32,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl LoopHealth {
    pub fn stopped(source: SourceId) -> Self {
        Self {
            source,
            status: LoopStatus::Stopped,
            last_success: None,
            last_error: None,
            consecutive_errors: 0,
            total_errors: 0,
            restarts: 0,
            next_run_at: None,
        }
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.status = LoopStatus::Healthy;
        self.last_success = Some(at);
        self.consecutive_errors = 0;
    }

    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.status = LoopStatus::Error;
        self.last_error = Some(message.into());
        self.consecutive_errors += 1;
        self.total_errors += 1;
    }
}

/// True when the time since the last success exceeds two polling intervals
pub fn is_stale(since_success: Duration, interval: Duration) -> bool {
    since_success > interval.saturating_mul(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_then_success_resets_counter() {
        let mut health = LoopHealth::stopped(SourceId::Dws);
        health.record_failure("boom");
        health.record_failure("boom again");
        assert_eq!(health.status, LoopStatus::Error);
        assert_eq!(health.consecutive_errors, 2);

        health.record_success(Utc::now());
        assert_eq!(health.status, LoopStatus::Healthy);
        assert_eq!(health.consecutive_errors, 0);
        assert_eq!(health.total_errors, 2);
    }

    #[test]
    fn test_staleness_window() {
        let interval = Duration::from_secs(60);
        assert!(!is_stale(Duration::from_secs(119), interval));
        assert!(!is_stale(Duration::from_secs(120), interval));
        assert!(is_stale(Duration::from_secs(121), interval));
        assert!(!is_stale(Duration::ZERO, Duration::MAX));
    }
}
