//! Orchestration facade
//!
//! One [`Orchestrator`] is built at process start and shared by handle with
//! the API layer. It owns the queue, the scheduler, the fan-out and their
//! collaborators.

use anyhow::Context;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use waterwatch_core::domain::job::{Job, JobKind};
use waterwatch_core::domain::source::{SourceId, SyncTarget};
use waterwatch_core::dto::job::{DEFAULT_PRIORITY, JobMetrics, SubmitJob};
use waterwatch_core::dto::scheduler::{
    SchedulerConfigUpdate, SchedulerSettings, SchedulerStatus, SyncTriggerResponse,
};

use crate::broker::{Broker, LocalBroker, PgBroker};
use crate::config::Config;
use crate::db;
use crate::error::{JobError, SchedulerError};
use crate::notify::{BrokerListener, Notifier};
use crate::queue::{HandlerRegistry, JobQueue};
use crate::scheduler::Scheduler;
use crate::source::SourceSet;
use crate::storage::{MemoryStorage, PgStorage, Storage};
use crate::sync::Pipelines;

/// Priority of manually triggered syncs
pub const MANUAL_SYNC_PRIORITY: i32 = 1;

/// Number of jobs listed when no limit is given
pub const DEFAULT_LIST_LIMIT: usize = 50;

pub type AppState = Arc<Orchestrator>;

pub struct Orchestrator {
    config: Config,
    storage: Arc<dyn Storage>,
    broker: Arc<dyn Broker>,
    notifier: Arc<Notifier>,
    queue: Arc<JobQueue>,
    scheduler: Arc<Scheduler>,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Wires every component around the given collaborators
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        broker: Arc<dyn Broker>,
        sources: SourceSet,
    ) -> Self {
        let notifier = Arc::new(Notifier::new(Arc::clone(&broker)));
        let pipelines = Arc::new(Pipelines::new(
            sources,
            Arc::clone(&storage),
            Arc::clone(&notifier),
        ));
        let queue = Arc::new(JobQueue::new(
            config.queue(),
            HandlerRegistry::for_sync(pipelines.clone()),
            Arc::clone(&notifier),
        ));
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler.clone(),
            pipelines,
            Arc::clone(&notifier),
        ));

        Self {
            config,
            storage,
            broker,
            notifier,
            queue,
            scheduler,
            shutdown: CancellationToken::new(),
            listener: Mutex::new(None),
        }
    }

    /// Builds the orchestrator from configuration
    ///
    /// With `DATABASE_URL` set, storage and broker are PostgreSQL and
    /// migrations run first; otherwise both stay in memory.
    pub async fn bootstrap(config: Config) -> anyhow::Result<Self> {
        let (storage, broker): (Arc<dyn Storage>, Arc<dyn Broker>) = match &config.database_url {
            Some(url) => {
                info!("Connecting to database...");
                let pool = db::create_pool(url)
                    .await
                    .context("failed to create database pool")?;
                db::run_migrations(&pool)
                    .await
                    .context("failed to run database migrations")?;
                info!("Database ready");
                (
                    Arc::new(PgStorage::new(pool.clone())),
                    Arc::new(PgBroker::new(pool)),
                )
            }
            None => {
                warn!("DATABASE_URL not set; using in-memory storage and broker");
                (
                    Arc::new(MemoryStorage::new()),
                    Arc::new(LocalBroker::default()),
                )
            }
        };
        let sources = SourceSet::from_config(&config, Arc::clone(&storage))
            .context("failed to build source clients")?;
        Ok(Self::new(config, storage, broker, sources))
    }

    /// Starts the worker pool and broker listener, and the scheduler when
    /// configured to autostart
    pub async fn start(&self) {
        self.queue.start();
        {
            let mut listener = self.listener.lock();
            if listener.is_none() {
                let relay = BrokerListener::new(Arc::clone(&self.notifier), Arc::clone(&self.broker));
                *listener = Some(relay.spawn(self.shutdown.child_token()));
            }
        }
        if self.config.scheduler_autostart {
            self.scheduler.start().await;
        }
    }

    /// Stops the scheduler, the worker pool and the broker listener
    pub async fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.scheduler.stop().await;
        self.queue.stop().await;
        self.shutdown.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                warn!("Broker listener ended abnormally: {}", e);
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub async fn start_scheduler(&self) -> bool {
        self.scheduler.start().await
    }

    pub async fn stop_scheduler(&self) -> bool {
        self.scheduler.stop().await
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    pub async fn update_scheduler_config(
        &self,
        update: &SchedulerConfigUpdate,
    ) -> Result<SchedulerSettings, SchedulerError> {
        self.scheduler.update_config(update).await
    }

    /// Submits one-off sync jobs for `target`
    ///
    /// For `all`, the correlation pass is queued one priority step behind the
    /// source syncs so it tends to run on fresh data.
    #[instrument(skip(self))]
    pub async fn trigger_sync(
        &self,
        target: SyncTarget,
        priority: Option<i32>,
    ) -> Result<SyncTriggerResponse, JobError> {
        let priority = priority.unwrap_or(MANUAL_SYNC_PRIORITY);
        let mut job_ids = Vec::new();

        for source in target.sources() {
            let job_priority = match (target, source) {
                (SyncTarget::All, SourceId::Correlation) => priority.saturating_add(1),
                _ => priority,
            };
            let parameters = HashMap::from([("trigger".to_string(), json!("manual"))]);
            let job = self
                .queue
                .submit(JobKind::for_source(source), parameters, job_priority)
                .await?;
            job_ids.push(job.id);
        }

        info!(target = %target, jobs = job_ids.len(), "Manual sync triggered");
        self.notifier
            .notify_system_event(
                "manual_sync_triggered",
                json!({"source": target, "job_ids": job_ids, "priority": priority}),
            )
            .await;
        Ok(SyncTriggerResponse {
            source: target,
            job_ids,
        })
    }

    pub async fn submit_job(&self, request: SubmitJob) -> Result<Job, JobError> {
        self.queue
            .submit(
                request.kind,
                request.parameters,
                request.priority.unwrap_or(DEFAULT_PRIORITY),
            )
            .await
    }

    pub fn job(&self, id: Uuid) -> Result<Job, JobError> {
        self.queue.status(id).ok_or(JobError::NotFound(id))
    }

    pub fn list_jobs(&self, limit: Option<usize>) -> Vec<Job> {
        self.queue.list_recent(limit.unwrap_or(DEFAULT_LIST_LIMIT))
    }

    pub async fn cancel_job(&self, id: Uuid) -> Result<Job, JobError> {
        self.queue.cancel(id).await
    }

    pub async fn retry_job(&self, id: Uuid) -> Result<Job, JobError> {
        self.queue.retry(id).await
    }

    pub fn job_metrics(&self) -> JobMetrics {
        self.queue.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticSource;
    use std::time::Duration;
    use waterwatch_core::domain::job::JobStatus;

    fn orchestrator() -> Orchestrator {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let sources = SourceSet {
            dws: Arc::new(StaticSource::default()),
            treasury: Arc::new(StaticSource::default()),
            correlation: Arc::new(StaticSource::default()),
        };
        let config = Config {
            scheduler_autostart: false,
            ..Config::new()
        };
        Orchestrator::new(config, storage, Arc::new(LocalBroker::default()), sources)
    }

    #[tokio::test]
    async fn test_trigger_all_queues_correlation_last() {
        let orchestrator = orchestrator();
        let response = orchestrator
            .trigger_sync(SyncTarget::All, Some(2))
            .await
            .unwrap();
        assert_eq!(response.job_ids.len(), 3);

        let jobs: Vec<Job> = response
            .job_ids
            .iter()
            .map(|id| orchestrator.job(*id).unwrap())
            .collect();
        assert_eq!(
            jobs.iter().map(|j| (j.kind, j.priority)).collect::<Vec<_>>(),
            vec![
                (JobKind::DwsSync, 2),
                (JobKind::TreasurySync, 2),
                (JobKind::CorrelationAnalysis, 3),
            ]
        );
    }

    #[tokio::test]
    async fn test_trigger_single_source_defaults_priority() {
        let orchestrator = orchestrator();
        let response = orchestrator
            .trigger_sync(SyncTarget::Source(SourceId::Treasury), None)
            .await
            .unwrap();
        let job = orchestrator.job(response.job_ids[0]).unwrap();
        assert_eq!(job.kind, JobKind::TreasurySync);
        assert_eq!(job.priority, MANUAL_SYNC_PRIORITY);
    }

    #[tokio::test]
    async fn test_manual_sync_runs_through_pool() {
        let orchestrator = orchestrator();
        orchestrator.start().await;
        assert!(!orchestrator.scheduler_status().running);

        let response = orchestrator
            .trigger_sync(SyncTarget::Source(SourceId::Dws), None)
            .await
            .unwrap();
        let id = response.job_ids[0];
        let job = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = orchestrator.job(id).unwrap();
                if job.status.is_terminal() {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result.unwrap()["source"], json!("dws"));

        orchestrator.shutdown().await;
        assert!(matches!(
            orchestrator.submit_job(SubmitJob::new(JobKind::DwsSync)).await,
            Err(JobError::QueueStopped)
        ));
    }
}
