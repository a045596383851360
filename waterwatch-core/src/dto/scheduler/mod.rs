//! Scheduler DTOs
//!
//! Timing settings, status snapshots and on-demand sync requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::health::LoopHealth;
use crate::domain::source::{SourceId, SyncTarget};

/// Runtime-adjustable scheduler timing, all values in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub dws_interval: u64,
    pub treasury_interval: u64,
    pub correlation_interval: u64,
    pub health_check_interval: u64,
    pub maintenance_interval: u64,
    pub backoff_base: u64,
    pub backoff_max: u64,
    /// Consecutive errors above which the maintenance loop restarts a source loop
    pub restart_threshold: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            dws_interval: 1800,
            treasury_interval: 3600,
            correlation_interval: 7200,
            health_check_interval: 300,
            maintenance_interval: 3600,
            backoff_base: 300,
            backoff_max: 3600,
            restart_threshold: 3,
        }
    }
}

impl SchedulerSettings {
    pub fn interval_for(&self, source: SourceId) -> Duration {
        let secs = match source {
            SourceId::Dws => self.dws_interval,
            SourceId::Treasury => self.treasury_interval,
            SourceId::Correlation => self.correlation_interval,
        };
        Duration::from_secs(secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval)
    }

    pub fn validate(&self) -> Result<(), String> {
        let intervals = [
            ("dws_interval", self.dws_interval),
            ("treasury_interval", self.treasury_interval),
            ("correlation_interval", self.correlation_interval),
            ("health_check_interval", self.health_check_interval),
            ("maintenance_interval", self.maintenance_interval),
            ("backoff_base", self.backoff_base),
            ("backoff_max", self.backoff_max),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(format!("{} must be greater than 0", name));
            }
        }
        if self.backoff_base > self.backoff_max {
            return Err(format!(
                "backoff_base ({}) must not exceed backoff_max ({})",
                self.backoff_base, self.backoff_max
            ));
        }
        Ok(())
    }

    /// Returns a copy with `update` applied, or an error if the result is invalid
    pub fn apply(&self, update: &SchedulerConfigUpdate) -> Result<SchedulerSettings, String> {
        let mut next = self.clone();
        if let Some(v) = update.dws_interval {
            next.dws_interval = v;
        }
        if let Some(v) = update.treasury_interval {
            next.treasury_interval = v;
        }
        if let Some(v) = update.correlation_interval {
            next.correlation_interval = v;
        }
        if let Some(v) = update.health_check_interval {
            next.health_check_interval = v;
        }
        if let Some(v) = update.maintenance_interval {
            next.maintenance_interval = v;
        }
        if let Some(v) = update.backoff_base {
            next.backoff_base = v;
        }
        if let Some(v) = update.backoff_max {
            next.backoff_max = v;
        }
        if let Some(v) = update.restart_threshold {
            next.restart_threshold = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial settings update; unknown fields are rejected
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dws_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treasury_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_base: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_max: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_threshold: Option<u32>,
}

/// Scheduler snapshot returned by the status query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
    pub sources: Vec<LoopHealth>,
    pub total_errors: u64,
    pub config: SchedulerSettings,
}

/// Reply to a start or stop request
///
/// `changed` is false when the scheduler was already in the requested state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerToggle {
    pub running: bool,
    pub changed: bool,
}

/// Request for an immediate, out-of-band sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTrigger {
    #[serde(default = "default_target")]
    pub source: SyncTarget,
    #[serde(default)]
    pub priority: Option<i32>,
}

fn default_target() -> SyncTarget {
    SyncTarget::All
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTriggerResponse {
    pub source: SyncTarget,
    pub job_ids: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = SchedulerSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.interval_for(SourceId::Dws), Duration::from_secs(1800));
    }

    #[test]
    fn test_apply_partial_update() {
        let settings = SchedulerSettings::default();
        let update: SchedulerConfigUpdate =
            serde_json::from_str(r#"{"dws_interval": 60, "restart_threshold": 5}"#).unwrap();
        let next = settings.apply(&update).unwrap();
        assert_eq!(next.dws_interval, 60);
        assert_eq!(next.restart_threshold, 5);
        assert_eq!(next.treasury_interval, settings.treasury_interval);
    }

    #[test]
    fn test_apply_rejects_invalid() {
        let settings = SchedulerSettings::default();
        let zero = SchedulerConfigUpdate {
            treasury_interval: Some(0),
            ..Default::default()
        };
        assert!(settings.apply(&zero).is_err());

        let inverted = SchedulerConfigUpdate {
            backoff_base: Some(7200),
            ..Default::default()
        };
        assert!(settings.apply(&inverted).is_err());
    }

    #[test]
    fn test_unknown_update_key_rejected() {
        assert!(serde_json::from_str::<SchedulerConfigUpdate>(r#"{"bogus": 1}"#).is_err());
    }

    #[test]
    fn test_sync_trigger_defaults_to_all() {
        let trigger: SyncTrigger = serde_json::from_str("{}").unwrap();
        assert_eq!(trigger.source, SyncTarget::All);
        assert!(trigger.priority.is_none());
    }
}
