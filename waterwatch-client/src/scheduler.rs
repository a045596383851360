//! Scheduler and on-demand sync endpoints

use waterwatch_core::domain::source::SyncTarget;
use waterwatch_core::dto::scheduler::{
    SchedulerConfigUpdate, SchedulerSettings, SchedulerStatus, SchedulerToggle, SyncTrigger,
    SyncTriggerResponse,
};

use crate::WaterwatchClient;
use crate::error::Result;

impl WaterwatchClient {
    /// Start the recurring loops; a no-op when already running
    pub async fn start_scheduler(&self) -> Result<SchedulerToggle> {
        let response = self
            .client
            .post(self.url("/scheduler/start"))
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Stop the recurring loops; a no-op when already stopped
    pub async fn stop_scheduler(&self) -> Result<SchedulerToggle> {
        let response = self.client.post(self.url("/scheduler/stop")).send().await?;
        self.handle_response(response).await
    }

    pub async fn scheduler_status(&self) -> Result<SchedulerStatus> {
        let response = self.client.get(self.url("/scheduler/status")).send().await?;
        self.handle_response(response).await
    }

    /// Apply a partial timing update and return the resulting settings
    pub async fn update_scheduler_config(
        &self,
        update: &SchedulerConfigUpdate,
    ) -> Result<SchedulerSettings> {
        let response = self
            .client
            .put(self.url("/scheduler/config"))
            .json(update)
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Queue immediate sync jobs for `source`
    ///
    /// # Returns
    /// The ids of the queued jobs, in submission order
    pub async fn trigger_sync(
        &self,
        source: SyncTarget,
        priority: Option<i32>,
    ) -> Result<SyncTriggerResponse> {
        let response = self
            .client
            .post(self.url("/sync/trigger"))
            .json(&SyncTrigger { source, priority })
            .send()
            .await?;
        self.handle_response(response).await
    }
}
