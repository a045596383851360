//! Sync pipeline
//!
//! One pipeline per source runs fetch, detect, persist and notify. Runs of the
//! same source are serialized by the pipeline's own lock, so a scheduled tick
//! and a manual job never overlap.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waterwatch_core::change::{
    FieldDiff, Fingerprint, Record, diff, fingerprint_excluding, fingerprint_value,
};
use waterwatch_core::domain::event::{ChangeEvent, ChangeType};
use waterwatch_core::domain::source::SourceId;

use crate::error::{SyncError, SyncPhase};
use crate::notify::Notifier;
use crate::source::{Progress, SourceSet, SourceSpec, SyncSource};
use crate::storage::{AuditEntry, Storage, StoredRecord};

/// Counts from one sync run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub source: Option<SourceId>,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Records without a usable entity id
    pub skipped: usize,
    /// The whole payload matched the previous run and was not examined
    pub short_circuited: bool,
    pub duration_ms: u64,
}

impl SyncOutcome {
    pub fn changes(&self) -> usize {
        self.created + self.updated
    }
}

/// Runs a sync for a named source
///
/// The scheduler and the job handlers depend on this rather than on concrete
/// pipelines.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn sync(
        &self,
        source: SourceId,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError>;
}

pub struct SyncPipeline {
    spec: SourceSpec,
    source: Arc<dyn SyncSource>,
    storage: Arc<dyn Storage>,
    notifier: Arc<Notifier>,
    /// Fingerprint of the last fully processed payload; the lock serializes runs
    last_payload: Mutex<Option<Fingerprint>>,
}

impl SyncPipeline {
    pub fn new(
        spec: SourceSpec,
        source: Arc<dyn SyncSource>,
        storage: Arc<dyn Storage>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            spec,
            source,
            storage,
            notifier,
            last_payload: Mutex::new(None),
        }
    }

    pub async fn run(
        &self,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let id = self.spec.id;
        let mut last_payload = self.last_payload.lock().await;
        let started = Instant::now();
        info!(source = %id, "Sync started");

        let fetch_progress = progress.scaled(0, 50);
        let records = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::cancelled(id, SyncPhase::Fetch)),
            result = self.source.fetch(&fetch_progress) => {
                result.map_err(|e| SyncError::fetch(id, &e))?
            }
        };

        let fingerprints: Vec<Fingerprint> = records
            .iter()
            .map(|r| fingerprint_excluding(r, &self.spec.ignore_fields))
            .collect();
        let payload = fingerprint_value(&Value::Array(
            fingerprints
                .iter()
                .map(|f| Value::String(f.to_string()))
                .collect(),
        ));

        let mut outcome = SyncOutcome {
            source: Some(id),
            fetched: records.len(),
            ..Default::default()
        };

        if last_payload.as_ref() == Some(&payload) {
            outcome.short_circuited = true;
            outcome.duration_ms = started.elapsed().as_millis() as u64;
            progress.report(100, "payload unchanged");
            info!(source = %id, records = outcome.fetched, "Payload unchanged, skipping detection");
            return Ok(outcome);
        }

        let total = records.len().max(1);
        for (index, (record, fp)) in records.into_iter().zip(fingerprints).enumerate() {
            if cancel.is_cancelled() {
                return Err(SyncError::cancelled(id, SyncPhase::Detect));
            }
            let Some(entity_id) = self.spec.entity_id(&record) else {
                debug!(source = %id, "Skipping record without {:?}", self.spec.key_fields);
                outcome.skipped += 1;
                continue;
            };
            match self.apply(entity_id, record, fp).await? {
                Some(ChangeType::Created) => outcome.created += 1,
                Some(_) => outcome.updated += 1,
                None => outcome.unchanged += 1,
            }
            let percent = 50 + ((index + 1) * 50 / total) as u8;
            progress.report(percent, "detecting changes");
        }

        *last_payload = Some(payload);
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        if outcome.skipped > 0 {
            warn!(source = %id, skipped = outcome.skipped, "Records without an entity id were ignored");
        }
        info!(
            source = %id,
            fetched = outcome.fetched,
            created = outcome.created,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            "Sync finished in {}ms",
            outcome.duration_ms
        );
        progress.report(100, "sync complete");
        Ok(outcome)
    }

    /// Detects, persists and announces the change to one record
    async fn apply(
        &self,
        entity_id: String,
        record: Record,
        fp: Fingerprint,
    ) -> Result<Option<ChangeType>, SyncError> {
        let id = self.spec.id;
        let entity_type = &self.spec.entity_type;

        let existing = self
            .storage
            .find_existing(entity_type, &entity_id)
            .await
            .map_err(|e| SyncError::detect(id, e))?;

        let (change_type, changes) = match existing {
            Some(stored) if stored.fingerprint == fp => return Ok(None),
            Some(stored) => {
                let mut changes = diff(&stored.data, &record);
                for field in &self.spec.ignore_fields {
                    changes.changed.remove(field);
                    changes.old_values.remove(field);
                }
                (ChangeType::Updated, changes)
            }
            None => (
                ChangeType::Created,
                FieldDiff {
                    changed: record.clone(),
                    old_values: Record::new(),
                },
            ),
        };

        let now = chrono::Utc::now();
        self.storage
            .upsert(StoredRecord {
                entity_type: entity_type.clone(),
                entity_id: entity_id.clone(),
                fingerprint: fp,
                data: record,
                source: id,
                updated_at: now,
            })
            .await
            .map_err(|e| SyncError::persist(id, e))?;

        // Only ignored fields moved; refresh the stored copy silently
        if changes.is_empty() {
            return Ok(None);
        }

        self.storage
            .append_audit_log(AuditEntry {
                entity_type: entity_type.clone(),
                entity_id: entity_id.clone(),
                change_type,
                changed_fields: changes.changed.clone(),
                old_values: changes.old_values.clone(),
                source: id,
                timestamp: now,
            })
            .await
            .map_err(|e| SyncError::persist(id, e))?;

        debug!(source = %id, entity_id = %entity_id, fields = changes.len(), "{} {}", change_type, entity_type);
        let event = ChangeEvent::from_diff(entity_type, entity_id, change_type, changes, id.as_str());
        self.notifier.notify_change(event).await;
        Ok(Some(change_type))
    }
}

/// The pipeline of every source
pub struct Pipelines {
    dws: SyncPipeline,
    treasury: SyncPipeline,
    correlation: SyncPipeline,
}

impl Pipelines {
    pub fn new(sources: SourceSet, storage: Arc<dyn Storage>, notifier: Arc<Notifier>) -> Self {
        let pipeline = |spec, source| {
            SyncPipeline::new(spec, source, Arc::clone(&storage), Arc::clone(&notifier))
        };
        Self {
            dws: pipeline(SourceSpec::dws(), sources.dws),
            treasury: pipeline(SourceSpec::treasury(), sources.treasury),
            correlation: pipeline(SourceSpec::correlation(), sources.correlation),
        }
    }

    pub fn get(&self, source: SourceId) -> &SyncPipeline {
        match source {
            SourceId::Dws => &self.dws,
            SourceId::Treasury => &self.treasury,
            SourceId::Correlation => &self.correlation,
        }
    }
}

#[async_trait]
impl SyncRunner for Pipelines {
    async fn sync(
        &self,
        source: SourceId,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        self.get(source).run(progress, cancel).await
    }
}

/// Result payload stored on a finished sync job
pub fn outcome_json(outcome: &SyncOutcome) -> Value {
    serde_json::to_value(outcome).unwrap_or_else(|_| json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use crate::source::StaticSource;
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;
    use waterwatch_core::domain::event::Subscription;
    use waterwatch_core::dto::notify::ServerMessage;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn projects() -> Vec<Record> {
        vec![
            record(json!({"project_name": "Dam A", "status": "planning", "last_updated": "t1"})),
            record(json!({"project_name": "Dam B", "status": "construction", "last_updated": "t1"})),
        ]
    }

    struct Harness {
        storage: Arc<MemoryStorage>,
        notifier: Arc<Notifier>,
        source: Arc<StaticSource>,
        events: tokio::sync::mpsc::Receiver<ServerMessage>,
    }

    impl Harness {
        fn new(records: Vec<Record>) -> Self {
            let notifier = Arc::new(Notifier::new(Arc::new(LocalBroker::default())));
            let id = Uuid::new_v4();
            let mut events = notifier.connect(id);
            notifier.subscribe(id, Subscription::All);
            let _ = events.try_recv();
            Self {
                storage: Arc::new(MemoryStorage::new()),
                notifier,
                source: Arc::new(StaticSource::new(records)),
                events,
            }
        }

        fn pipeline(&self) -> SyncPipeline {
            SyncPipeline::new(
                SourceSpec::dws(),
                self.source.clone(),
                self.storage.clone(),
                self.notifier.clone(),
            )
        }

        fn changes(&mut self) -> Vec<ChangeEvent> {
            let mut out = Vec::new();
            while let Ok(message) = self.events.try_recv() {
                if let ServerMessage::DataUpdate { data, .. } = message {
                    out.push(data);
                }
            }
            out
        }
    }

    async fn run(pipeline: &SyncPipeline) -> Result<SyncOutcome, SyncError> {
        pipeline
            .run(&Progress::noop(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_resync_of_identical_payload_is_silent() {
        let mut h = Harness::new(projects());
        let pipeline = h.pipeline();

        let first = run(&pipeline).await.unwrap();
        assert_eq!(first.created, 2);
        assert_eq!(h.storage.write_count(), 2);
        assert_eq!(h.changes().len(), 2);
        assert_eq!(h.storage.audit_log().len(), 2);

        let second = run(&pipeline).await.unwrap();
        assert!(second.short_circuited);
        assert_eq!(second.changes(), 0);
        assert_eq!(h.storage.write_count(), 2);
        assert!(h.changes().is_empty());
    }

    #[tokio::test]
    async fn test_resync_through_record_fingerprints() {
        let mut h = Harness::new(projects());
        run(&h.pipeline()).await.unwrap();
        h.changes();

        // a fresh pipeline has no payload memory and must compare per record
        let outcome = run(&h.pipeline()).await.unwrap();
        assert!(!outcome.short_circuited);
        assert_eq!(outcome.unchanged, 2);
        assert_eq!(h.storage.write_count(), 2);
        assert!(h.changes().is_empty());
    }

    #[tokio::test]
    async fn test_update_carries_field_diff() {
        let mut h = Harness::new(projects());
        let pipeline = h.pipeline();
        run(&pipeline).await.unwrap();
        h.changes();

        let mut next = projects();
        next[0].insert("status".into(), json!("construction"));
        next[0].insert("last_updated".into(), json!("t2"));
        next[1].insert("last_updated".into(), json!("t2"));
        h.source.set_records(next);

        let outcome = run(&pipeline).await.unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.unchanged, 1);

        let events = h.changes();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.change_type, ChangeType::Updated);
        assert_eq!(event.key(), "project:Dam A");
        assert_eq!(event.changes["status"], json!("construction"));
        assert_eq!(event.old_values["status"], json!("planning"));
        assert!(!event.changes.contains_key("last_updated"));

        let audit = h.storage.audit_log();
        assert_eq!(audit.last().unwrap().change_type, ChangeType::Updated);
    }

    #[tokio::test]
    async fn test_records_without_key_are_skipped() {
        let mut records = projects();
        records.push(record(json!({"status": "orphan"})));
        records.push(record(json!({"project_name": "", "status": "blank"})));
        let h = Harness::new(records);

        let outcome = run(&h.pipeline()).await.unwrap();
        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(h.storage.len(), 2);
    }

    struct FailingSource;

    #[async_trait]
    impl SyncSource for FailingSource {
        async fn fetch(&self, _progress: &Progress) -> anyhow::Result<Vec<Record>> {
            anyhow::bail!("503 Service Unavailable")
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_names_phase() {
        let h = Harness::new(Vec::new());
        let pipeline = SyncPipeline::new(
            SourceSpec::treasury(),
            Arc::new(FailingSource),
            h.storage.clone(),
            h.notifier.clone(),
        );
        let err = run(&pipeline).await.unwrap_err();
        assert_eq!(err.phase, SyncPhase::Fetch);
        assert_eq!(err.source_id, SourceId::Treasury);
        assert!(err.message.contains("503"));
    }

    struct SlowSource {
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait]
    impl SyncSource for SlowSource {
        async fn fetch(&self, _progress: &Progress) -> anyhow::Result<Vec<Record>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(projects())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_of_one_source_never_overlap() {
        let h = Harness::new(Vec::new());
        let source = Arc::new(SlowSource {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let pipeline = SyncPipeline::new(
            SourceSpec::dws(),
            source.clone(),
            h.storage.clone(),
            h.notifier.clone(),
        );

        let (a, b, c) = tokio::join!(run(&pipeline), run(&pipeline), run(&pipeline));
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(source.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(h.storage.write_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch() {
        let h = Harness::new(Vec::new());
        let pipeline = SyncPipeline::new(
            SourceSpec::dws(),
            Arc::new(SlowSource {
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }),
            h.storage.clone(),
            h.notifier.clone(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline.run(&Progress::noop(), &cancel).await.unwrap_err();
        assert_eq!(err.phase, SyncPhase::Fetch);
        assert!(h.storage.is_empty());
    }
}
