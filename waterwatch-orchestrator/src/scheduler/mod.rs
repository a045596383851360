//! Recurring scheduler
//!
//! One polling loop per source, a health monitor and a maintenance loop. Each
//! source loop owns its health record; the monitor only flags staleness and
//! dead loops, and maintenance restarts loops that keep failing.

mod loops;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use waterwatch_core::domain::health::{LoopHealth, LoopStatus};
use waterwatch_core::domain::source::SourceId;
use waterwatch_core::dto::scheduler::{SchedulerConfigUpdate, SchedulerSettings, SchedulerStatus};

use crate::error::SchedulerError;
use crate::notify::Notifier;
use crate::sync::SyncRunner;

/// Health of one source plus the instant staleness is measured from
struct Slot {
    health: LoopHealth,
    /// Last success, or loop start while there has been none
    last_progress: Instant,
}

impl Slot {
    fn new(source: SourceId) -> Self {
        Self {
            health: LoopHealth::stopped(source),
            last_progress: Instant::now(),
        }
    }
}

struct SourceLoop {
    token: CancellationToken,
    task: JoinHandle<()>,
}

struct RunState {
    started_at: DateTime<Utc>,
    shutdown: CancellationToken,
    loops: HashMap<SourceId, SourceLoop>,
    monitors: Vec<JoinHandle<()>>,
}

pub struct Scheduler {
    settings: RwLock<SchedulerSettings>,
    health: Mutex<BTreeMap<SourceId, Slot>>,
    runner: Arc<dyn SyncRunner>,
    notifier: Arc<Notifier>,
    run: Mutex<Option<RunState>>,
}

impl Scheduler {
    pub fn new(
        settings: SchedulerSettings,
        runner: Arc<dyn SyncRunner>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let health = SourceId::ALL
            .into_iter()
            .map(|source| (source, Slot::new(source)))
            .collect();
        Self {
            settings: RwLock::new(settings),
            health: Mutex::new(health),
            runner,
            notifier,
            run: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.settings.read().clone()
    }

    /// Starts every loop; returns `false` if the scheduler was already running
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> bool {
        {
            let mut run = self.run.lock();
            if run.is_some() {
                return false;
            }

            {
                let mut health = self.health.lock();
                for slot in health.values_mut() {
                    let restarts = slot.health.restarts;
                    *slot = Slot::new(slot.health.source);
                    slot.health.status = LoopStatus::Running;
                    slot.health.restarts = restarts;
                }
            }

            let shutdown = CancellationToken::new();
            let loops = SourceId::ALL
                .into_iter()
                .map(|source| (source, self.spawn_loop(source, &shutdown)))
                .collect();
            let monitors = vec![
                tokio::spawn(Arc::clone(self).health_monitor(shutdown.clone())),
                tokio::spawn(Arc::clone(self).maintenance_loop(shutdown.clone())),
            ];
            *run = Some(RunState {
                started_at: Utc::now(),
                shutdown,
                loops,
                monitors,
            });
        }

        info!("Scheduler started");
        let settings = self.settings();
        self.notifier
            .notify_system_event(
                "scheduler_started",
                json!({"sources": SourceId::ALL, "config": settings}),
            )
            .await;
        true
    }

    /// Stops every loop and waits for them; returns `false` if not running
    #[instrument(skip(self))]
    pub async fn stop(&self) -> bool {
        let run = self.run.lock().take();
        let Some(run) = run else {
            return false;
        };
        run.shutdown.cancel();
        let tasks = run
            .loops
            .into_values()
            .map(|l| l.task)
            .chain(run.monitors);
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Scheduler task ended abnormally: {}", e);
                }
            }
        }

        for slot in self.health.lock().values_mut() {
            slot.health.status = LoopStatus::Stopped;
            slot.health.next_run_at = None;
        }

        info!("Scheduler stopped");
        self.notifier
            .notify_system_event("scheduler_stopped", json!({"sources": SourceId::ALL}))
            .await;
        true
    }

    pub fn status(&self) -> SchedulerStatus {
        let started_at = self.run.lock().as_ref().map(|run| run.started_at);
        let sources: Vec<LoopHealth> = self
            .health
            .lock()
            .values()
            .map(|slot| slot.health.clone())
            .collect();
        SchedulerStatus {
            running: started_at.is_some(),
            started_at,
            uptime_secs: started_at.map(|at| (Utc::now() - at).num_seconds()),
            total_errors: sources.iter().map(|h| h.total_errors).sum(),
            sources,
            config: self.settings(),
        }
    }

    pub fn health(&self, source: SourceId) -> Option<LoopHealth> {
        self.health.lock().get(&source).map(|slot| slot.health.clone())
    }

    /// Applies a partial timing update
    ///
    /// Invalid updates leave the current settings untouched. Running loops
    /// pick up new intervals at their next sleep.
    #[instrument(skip(self))]
    pub async fn update_config(
        &self,
        update: &SchedulerConfigUpdate,
    ) -> Result<SchedulerSettings, SchedulerError> {
        let updated = {
            let mut settings = self.settings.write();
            let updated = settings
                .apply(update)
                .map_err(SchedulerError::InvalidConfig)?;
            *settings = updated.clone();
            updated
        };

        info!(?updated, "Scheduler configuration updated");
        self.notifier
            .notify_system_event("scheduler_config_updated", json!({"config": updated}))
            .await;
        Ok(updated)
    }

    fn spawn_loop(self: &Arc<Self>, source: SourceId, shutdown: &CancellationToken) -> SourceLoop {
        let token = shutdown.child_token();
        let task = tokio::spawn(Arc::clone(self).source_loop(source, token.clone()));
        SourceLoop { token, task }
    }

    /// Replaces a source's loop task with a fresh one and resets its counters
    async fn restart_loop(self: &Arc<Self>, source: SourceId, reason: &str) -> bool {
        let restarts = {
            let mut run = self.run.lock();
            let Some(run) = run.as_mut() else {
                return false;
            };
            // the old loop can no longer write health once its token is cancelled
            if let Some(old) = run.loops.remove(&source) {
                old.token.cancel();
                old.task.abort();
            }
            let restarts = self
                .health
                .lock()
                .get_mut(&source)
                .map(|slot| {
                    slot.health.consecutive_errors = 0;
                    slot.health.restarts += 1;
                    slot.health.status = LoopStatus::Running;
                    slot.last_progress = Instant::now();
                    slot.health.restarts
                })
                .unwrap_or_default();
            let fresh = self.spawn_loop(source, &run.shutdown);
            run.loops.insert(source, fresh);
            restarts
        };

        warn!(source = %source, restarts, "Restarted polling loop: {}", reason);
        self.notifier
            .notify_system_event(
                "loop_restarted",
                json!({"source": source, "reason": reason, "restarts": restarts}),
            )
            .await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use crate::error::{SyncError, SyncPhase};
    use crate::source::Progress;
    use crate::sync::SyncOutcome;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;
    use waterwatch_core::dto::notify::ServerMessage;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Hang,
        Panic,
    }

    /// Decides each call's behavior from the source and its call index
    struct Scripted {
        script: Box<dyn Fn(SourceId, usize) -> Behavior + Send + Sync>,
        calls: Mutex<Vec<(SourceId, Instant)>>,
    }

    impl Scripted {
        fn new(script: impl Fn(SourceId, usize) -> Behavior + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                script: Box::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self, source: SourceId) -> Vec<Instant> {
            self.calls
                .lock()
                .iter()
                .filter(|(s, _)| *s == source)
                .map(|(_, at)| *at)
                .collect()
        }
    }

    #[async_trait]
    impl SyncRunner for Scripted {
        async fn sync(
            &self,
            source: SourceId,
            _progress: &Progress,
            _cancel: &CancellationToken,
        ) -> Result<SyncOutcome, SyncError> {
            let behavior = {
                let mut calls = self.calls.lock();
                let index = calls.iter().filter(|(s, _)| *s == source).count();
                calls.push((source, Instant::now()));
                (self.script)(source, index)
            };
            match behavior {
                Behavior::Succeed => Ok(SyncOutcome::default()),
                Behavior::Fail => Err(SyncError::new(SyncPhase::Fetch, source, "gateway timeout")),
                Behavior::Hang => std::future::pending().await,
                Behavior::Panic => panic!("loop body blew up"),
            }
        }
    }

    fn quiet_settings() -> SchedulerSettings {
        SchedulerSettings {
            health_check_interval: 100_000,
            maintenance_interval: 100_000,
            restart_threshold: 1000,
            ..SchedulerSettings::default()
        }
    }

    fn scheduler(
        settings: SchedulerSettings,
        runner: Arc<Scripted>,
    ) -> (Arc<Scheduler>, mpsc::Receiver<ServerMessage>) {
        let notifier = Arc::new(Notifier::new(Arc::new(LocalBroker::default())));
        let events = notifier.connect(Uuid::new_v4());
        (Arc::new(Scheduler::new(settings, runner, notifier)), events)
    }

    fn system_events(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            match message {
                ServerMessage::SystemEvent { event_type, .. } => out.push(event_type),
                ServerMessage::SystemError { error_type, .. } => out.push(error_type),
                _ => {}
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_source_backs_off_exponentially() {
        let runner = Scripted::new(|source, _| match source {
            SourceId::Dws => Behavior::Fail,
            _ => Behavior::Succeed,
        });
        let (scheduler, _events) = scheduler(quiet_settings(), runner.clone());
        scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(8110)).await;

        let calls = runner.calls(SourceId::Dws);
        let gaps: Vec<u64> = calls
            .windows(2)
            .map(|w| w[1].duration_since(w[0]).as_secs())
            .take(5)
            .collect();
        assert_eq!(gaps, vec![300, 600, 1200, 2400, 3600]);

        let health = scheduler.health(SourceId::Dws).unwrap();
        assert_eq!(health.status, LoopStatus::Error);
        assert_eq!(health.consecutive_errors, 6);
        assert!(health.next_run_at.is_some());
        assert_eq!(
            scheduler.health(SourceId::Treasury).unwrap().status,
            LoopStatus::Healthy
        );
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_erroring_source_goes_stale() {
        let runner = Scripted::new(|source, _| match source {
            SourceId::Dws => Behavior::Fail,
            _ => Behavior::Succeed,
        });
        let settings = SchedulerSettings {
            dws_interval: 10,
            backoff_base: 30,
            backoff_max: 30,
            health_check_interval: 7,
            ..quiet_settings()
        };
        let (scheduler, mut events) = scheduler(settings, runner.clone());
        scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(200)).await;

        // failures keep coming but never clear the stale flag
        let health = scheduler.health(SourceId::Dws).unwrap();
        assert_eq!(health.status, LoopStatus::Stale);
        assert_eq!(health.consecutive_errors, 7);
        assert!(health.last_success.is_none());
        assert_eq!(
            scheduler.health(SourceId::Treasury).unwrap().status,
            LoopStatus::Healthy
        );
        let events = system_events(&mut events);
        assert_eq!(events.iter().filter(|e| *e == "sync_failed").count(), 7);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_clears_on_success() {
        let runner = Scripted::new(|source, index| match (source, index) {
            (SourceId::Dws, 0..=2) => Behavior::Fail,
            _ => Behavior::Succeed,
        });
        let settings = SchedulerSettings {
            dws_interval: 10,
            backoff_base: 30,
            backoff_max: 30,
            health_check_interval: 7,
            ..quiet_settings()
        };
        let (scheduler, _events) = scheduler(settings, runner.clone());
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(scheduler.health(SourceId::Dws).unwrap().status, LoopStatus::Stale);

        // third failure at 60s, first success at 90s
        tokio::time::sleep(Duration::from_secs(42)).await;
        let health = scheduler.health(SourceId::Dws).unwrap();
        assert_eq!(health.status, LoopStatus::Healthy);
        assert_eq!(health.consecutive_errors, 0);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_backoff() {
        let runner = Scripted::new(|source, index| match (source, index) {
            (SourceId::Dws, 0 | 1) => Behavior::Fail,
            _ => Behavior::Succeed,
        });
        let (scheduler, mut events) = scheduler(quiet_settings(), runner.clone());
        scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(905)).await;

        assert_eq!(runner.calls(SourceId::Dws).len(), 3);
        let health = scheduler.health(SourceId::Dws).unwrap();
        assert_eq!(health.status, LoopStatus::Healthy);
        assert_eq!(health.consecutive_errors, 0);
        assert_eq!(health.total_errors, 2);
        assert!(health.last_success.is_some());

        let events = system_events(&mut events);
        assert_eq!(events.iter().filter(|e| *e == "sync_failed").count(), 2);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_source_goes_stale_without_blocking_others() {
        let runner = Scripted::new(|source, _| match source {
            SourceId::Treasury => Behavior::Hang,
            _ => Behavior::Succeed,
        });
        let settings = SchedulerSettings {
            dws_interval: 10,
            treasury_interval: 10,
            health_check_interval: 5,
            ..quiet_settings()
        };
        let (scheduler, mut events) = scheduler(settings, runner.clone());
        scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(36)).await;

        assert_eq!(runner.calls(SourceId::Dws).len(), 4);
        assert_eq!(runner.calls(SourceId::Treasury).len(), 1);
        assert_eq!(
            scheduler.health(SourceId::Treasury).unwrap().status,
            LoopStatus::Stale
        );
        assert_eq!(
            scheduler.health(SourceId::Dws).unwrap().status,
            LoopStatus::Healthy
        );
        assert!(system_events(&mut events).contains(&"scheduler_health_update".to_string()));

        // a stuck loop still stops
        assert!(scheduler.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_restarts_failing_loop() {
        let runner = Scripted::new(|source, _| match source {
            SourceId::Dws => Behavior::Fail,
            _ => Behavior::Succeed,
        });
        let settings = SchedulerSettings {
            backoff_base: 1,
            backoff_max: 1,
            maintenance_interval: 10,
            restart_threshold: 2,
            ..quiet_settings()
        };
        let (scheduler, mut events) = scheduler(settings, runner.clone());
        scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(11)).await;

        let health = scheduler.health(SourceId::Dws).unwrap();
        assert_eq!(health.restarts, 1);
        assert!(health.consecutive_errors <= 2);
        assert_eq!(scheduler.health(SourceId::Treasury).unwrap().restarts, 0);
        assert!(system_events(&mut events).contains(&"loop_restarted".to_string()));
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_loop_cannot_touch_health() {
        let runner = Scripted::new(|source, index| match (source, index) {
            (SourceId::Dws, 0) => Behavior::Hang,
            _ => Behavior::Succeed,
        });
        let (scheduler, _events) = scheduler(quiet_settings(), runner.clone());
        scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let old = {
            let run = scheduler.run.lock();
            run.as_ref().unwrap().loops[&SourceId::Dws].token.clone()
        };
        assert!(scheduler.restart_loop(SourceId::Dws, "manual").await);
        assert!(old.is_cancelled());

        // a late result from the replaced loop is dropped
        let error = SyncError::new(SyncPhase::Fetch, SourceId::Dws, "gateway timeout");
        assert!(scheduler.record_failure(SourceId::Dws, &old, &error).is_none());
        assert!(
            scheduler
                .record_success(SourceId::Dws, &old, &SyncOutcome::default())
                .is_none()
        );
        let health = scheduler.health(SourceId::Dws).unwrap();
        assert_eq!(health.consecutive_errors, 0);
        assert_eq!(health.total_errors, 0);
        assert_eq!(health.restarts, 1);

        // the fresh loop owns the slot
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runner.calls(SourceId::Dws).len(), 2);
        let health = scheduler.health(SourceId::Dws).unwrap();
        assert_eq!(health.status, LoopStatus::Healthy);
        assert!(health.last_success.is_some());
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_loop_is_flagged_and_restarted() {
        let runner = Scripted::new(|source, index| match (source, index) {
            (SourceId::Correlation, 0) => Behavior::Panic,
            _ => Behavior::Succeed,
        });
        let (scheduler, _events) = scheduler(quiet_settings(), runner.clone());
        scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = scheduler.check_health();
        let correlation = snapshot
            .iter()
            .find(|h| h.source == SourceId::Correlation)
            .unwrap();
        assert_eq!(correlation.status, LoopStatus::Error);

        assert_eq!(scheduler.maintain().await, 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runner.calls(SourceId::Correlation).len(), 2);
        assert_eq!(
            scheduler.health(SourceId::Correlation).unwrap().status,
            LoopStatus::Healthy
        );
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let runner = Scripted::new(|_, _| Behavior::Succeed);
        let (scheduler, mut events) = scheduler(quiet_settings(), runner);
        assert!(!scheduler.status().running);

        assert!(scheduler.start().await);
        assert!(!scheduler.start().await);
        let status = scheduler.status();
        assert!(status.running);
        assert!(status.started_at.is_some());
        assert_eq!(status.sources.len(), 3);

        assert!(scheduler.stop().await);
        assert!(!scheduler.stop().await);
        let status = scheduler.status();
        assert!(!status.running);
        assert!(status.sources.iter().all(|h| h.status == LoopStatus::Stopped));

        let events = system_events(&mut events);
        assert_eq!(
            events,
            vec!["scheduler_started".to_string(), "scheduler_stopped".to_string()]
        );
    }

    #[tokio::test]
    async fn test_config_update_validates() {
        let runner = Scripted::new(|_, _| Behavior::Succeed);
        let (scheduler, mut events) = scheduler(SchedulerSettings::default(), runner);

        let invalid = SchedulerConfigUpdate {
            backoff_base: Some(7200),
            ..Default::default()
        };
        assert!(matches!(
            scheduler.update_config(&invalid).await,
            Err(SchedulerError::InvalidConfig(_))
        ));
        assert_eq!(scheduler.settings(), SchedulerSettings::default());

        let valid = SchedulerConfigUpdate {
            dws_interval: Some(60),
            ..Default::default()
        };
        let updated = scheduler.update_config(&valid).await.unwrap();
        assert_eq!(updated.dws_interval, 60);
        assert_eq!(scheduler.status().config.dws_interval, 60);
        assert_eq!(system_events(&mut events), vec!["scheduler_config_updated".to_string()]);
    }
}
