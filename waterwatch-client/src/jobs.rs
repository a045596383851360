//! Job endpoints

use uuid::Uuid;
use waterwatch_core::domain::job::Job;
use waterwatch_core::dto::job::{JobMetrics, SubmitJob};

use crate::WaterwatchClient;
use crate::error::Result;

impl WaterwatchClient {
    /// Submit a job to the worker pool
    ///
    /// # Example
    /// ```no_run
    /// # use waterwatch_client::WaterwatchClient;
    /// # use waterwatch_core::domain::job::JobKind;
    /// # use waterwatch_core::dto::job::SubmitJob;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = WaterwatchClient::new("http://localhost:8080");
    /// let job = client.submit_job(&SubmitJob::new(JobKind::DwsSync)).await?;
    /// println!("{} is {}", job.id, job.status);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit_job(&self, request: &SubmitJob) -> Result<Job> {
        let response = self
            .client
            .post(self.url("/job/submit"))
            .json(request)
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: Uuid) -> Result<Job> {
        let response = self
            .client
            .get(self.url(&format!("/job/{}", id)))
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// List active jobs followed by recent history, newest first
    pub async fn list_jobs(&self, limit: Option<usize>) -> Result<Vec<Job>> {
        let mut request = self.client.get(self.url("/job/list"));
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Cancel a pending or running job
    pub async fn cancel_job(&self, id: Uuid) -> Result<Job> {
        let response = self
            .client
            .post(self.url(&format!("/job/{}/cancel", id)))
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Retry a failed job
    ///
    /// # Returns
    /// The new job; the failed one is left untouched
    pub async fn retry_job(&self, id: Uuid) -> Result<Job> {
        let response = self
            .client
            .post(self.url(&format!("/job/{}/retry", id)))
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn job_metrics(&self) -> Result<JobMetrics> {
        let response = self.client.get(self.url("/job/metrics")).send().await?;
        self.handle_response(response).await
    }
}
