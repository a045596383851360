use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use waterwatch_core::domain::job::JobKind;

use crate::error::SyncError;
use crate::source::Progress;
use crate::sync::{SyncRunner, outcome_json};

/// Everything a handler gets to see of the job it runs
pub struct JobContext {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub parameters: HashMap<String, JsonValue>,
    /// Fired when the job is cancelled; handlers check it at their checkpoints
    pub cancel: CancellationToken,
    pub progress: Progress,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs the job to completion, returning its result payload
    async fn run(&self, ctx: JobContext) -> Result<JsonValue, SyncError>;
}

/// Runs a sync of the job kind's source
pub struct SyncJobHandler {
    runner: Arc<dyn SyncRunner>,
}

impl SyncJobHandler {
    pub fn new(runner: Arc<dyn SyncRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl JobHandler for SyncJobHandler {
    async fn run(&self, ctx: JobContext) -> Result<JsonValue, SyncError> {
        let outcome = self
            .runner
            .sync(ctx.kind.source(), &ctx.progress, &ctx.cancel)
            .await?;
        Ok(outcome_json(&outcome))
    }
}

/// One handler per job kind
///
/// Lookup is an exhaustive match, so adding a kind without a handler does not
/// compile.
#[derive(Clone)]
pub struct HandlerRegistry {
    dws: Arc<dyn JobHandler>,
    treasury: Arc<dyn JobHandler>,
    correlation: Arc<dyn JobHandler>,
}

impl HandlerRegistry {
    pub fn new(
        dws: Arc<dyn JobHandler>,
        treasury: Arc<dyn JobHandler>,
        correlation: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            dws,
            treasury,
            correlation,
        }
    }

    /// Every kind runs a sync of its own source through `runner`
    pub fn for_sync(runner: Arc<dyn SyncRunner>) -> Self {
        let handler: Arc<dyn JobHandler> = Arc::new(SyncJobHandler::new(runner));
        Self::new(handler.clone(), handler.clone(), handler)
    }

    pub fn get(&self, kind: JobKind) -> Arc<dyn JobHandler> {
        let handler = match kind {
            JobKind::DwsSync => &self.dws,
            JobKind::TreasurySync => &self.treasury,
            JobKind::CorrelationAnalysis => &self.correlation,
        };
        Arc::clone(handler)
    }
}
