use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waterwatch_core::domain::health::{LoopHealth, LoopStatus, is_stale};
use waterwatch_core::domain::source::SourceId;

use super::Scheduler;
use crate::backoff::backoff_delay;
use crate::error::SyncError;
use crate::source::Progress;
use crate::sync::SyncOutcome;

impl Scheduler {
    /// Sync, record health, sleep; until the token fires
    pub(super) async fn source_loop(self: Arc<Self>, source: SourceId, token: CancellationToken) {
        info!(source = %source, "Polling loop started");
        let progress = Progress::noop();
        loop {
            // stale stays visible until a sync succeeds
            self.with_live_slot(source, &token, |slot| {
                if slot.health.status != LoopStatus::Stale {
                    slot.health.status = LoopStatus::Running;
                }
            });

            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = self.runner.sync(source, &progress, &token) => result,
            };
            let delay = match result {
                Ok(outcome) => self.record_success(source, &token, &outcome),
                Err(e) => self.record_failure(source, &token, &e),
            };
            let Some(delay) = delay else {
                break;
            };

            let next_run = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| Utc::now().checked_add_signed(d));
            self.with_live_slot(source, &token, |slot| slot.health.next_run_at = next_run);

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!(source = %source, "Polling loop stopped");
    }

    /// Returns the next polling delay, or `None` once the loop was replaced
    pub(super) fn record_success(
        &self,
        source: SourceId,
        token: &CancellationToken,
        outcome: &SyncOutcome,
    ) -> Option<Duration> {
        self.with_live_slot(source, token, |slot| {
            slot.health.record_success(Utc::now());
            slot.last_progress = Instant::now();
        })?;
        debug!(source = %source, changes = outcome.changes(), "Scheduled sync succeeded");
        Some(self.settings.read().interval_for(source))
    }

    /// Updates health, reports the error and returns the backoff delay
    pub(super) fn record_failure(
        &self,
        source: SourceId,
        token: &CancellationToken,
        error: &SyncError,
    ) -> Option<Duration> {
        let message = error.to_string();
        let consecutive = self.with_live_slot(source, token, |slot| {
            let stale = slot.health.status == LoopStatus::Stale;
            slot.health.record_failure(message.clone());
            if stale {
                slot.health.status = LoopStatus::Stale;
            }
            slot.health.consecutive_errors
        })?;
        let delay = {
            let settings = self.settings.read();
            backoff_delay(
                consecutive,
                Duration::from_secs(settings.backoff_base),
                Duration::from_secs(settings.backoff_max),
            )
        };

        warn!(
            source = %source,
            phase = %error.phase,
            consecutive,
            "Scheduled sync failed, retrying in {}s: {}",
            delay.as_secs(),
            error.message
        );
        self.notifier.notify_system_error(
            "sync_failed",
            &message,
            json!({
                "source": source,
                "phase": error.phase,
                "consecutive_errors": consecutive,
                "retry_in_secs": delay.as_secs(),
            }),
        );
        Some(delay)
    }

    pub(super) async fn health_monitor(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            let interval = self.settings.read().health_check_interval();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let sources = self.check_health();
            self.notifier
                .notify_system_event("scheduler_health_update", json!({"sources": sources}))
                .await;
        }
    }

    /// Flags dead and stale loops, returning the resulting health snapshot
    pub(super) fn check_health(&self) -> Vec<LoopHealth> {
        let dead = self.dead_loops();
        let settings = self.settings.read().clone();
        let now = Instant::now();

        let mut health = self.health.lock();
        for (source, slot) in health.iter_mut() {
            if slot.health.status == LoopStatus::Stopped {
                continue;
            }
            if dead.contains(source) {
                if slot.health.status != LoopStatus::Error {
                    warn!(source = %source, "Polling loop exited unexpectedly");
                }
                slot.health.status = LoopStatus::Error;
                slot.health.last_error = Some("polling loop exited".to_string());
                continue;
            }
            let stale = is_stale(
                now.duration_since(slot.last_progress),
                settings.interval_for(*source),
            );
            if stale && slot.health.status != LoopStatus::Stale {
                warn!(source = %source, "Polling loop is stale");
                slot.health.status = LoopStatus::Stale;
            }
        }
        health.values().map(|slot| slot.health.clone()).collect()
    }

    pub(super) async fn maintenance_loop(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            let interval = self.settings.read().maintenance_interval();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            self.maintain().await;
        }
    }

    /// Restarts loops over the error threshold and loops that have exited
    pub(super) async fn maintain(self: &Arc<Self>) -> usize {
        let dead = self.dead_loops();
        let threshold = self.settings.read().restart_threshold;
        let failing: Vec<SourceId> = self
            .health
            .lock()
            .iter()
            .filter(|(_, slot)| slot.health.consecutive_errors > threshold)
            .map(|(source, _)| *source)
            .collect();

        let mut restarted = 0;
        for source in SourceId::ALL {
            let reason = if dead.contains(&source) {
                "loop exited"
            } else if failing.contains(&source) {
                "too many consecutive errors"
            } else {
                continue;
            };
            if self.restart_loop(source, reason).await {
                restarted += 1;
            }
        }
        restarted
    }

    fn dead_loops(&self) -> HashSet<SourceId> {
        self.run
            .lock()
            .as_ref()
            .map(|run| {
                run.loops
                    .iter()
                    .filter(|(_, l)| l.task.is_finished())
                    .map(|(source, _)| *source)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Applies `f` unless the loop owning `token` has been cancelled
    fn with_live_slot<T>(
        &self,
        source: SourceId,
        token: &CancellationToken,
        f: impl FnOnce(&mut super::Slot) -> T,
    ) -> Option<T> {
        let mut health = self.health.lock();
        if token.is_cancelled() {
            return None;
        }
        health.get_mut(&source).map(f)
    }
}
