//! Waterwatch HTTP Client
//!
//! A small, typed HTTP client for the Waterwatch orchestrator API, used by the
//! CLI and by anything else that drives the orchestrator remotely.
//!
//! # Example
//!
//! ```no_run
//! use waterwatch_client::WaterwatchClient;
//! use waterwatch_core::domain::source::SyncTarget;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = WaterwatchClient::new("http://localhost:8080");
//!
//!     let response = client.trigger_sync(SyncTarget::All, None).await?;
//!     println!("Queued {} job(s)", response.job_ids.len());
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
mod scheduler;

pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;
use waterwatch_core::dto::health::HealthReport;

/// HTTP client for the Waterwatch orchestrator API
///
/// Methods are grouped by resource:
/// - Scheduler lifecycle and timing
/// - On-demand syncs
/// - Job submission, inspection, cancellation and retry
#[derive(Debug, Clone)]
pub struct WaterwatchClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    client: Client,
}

impl WaterwatchClient {
    /// Create a new client
    ///
    /// # Example
    /// ```
    /// use waterwatch_client::WaterwatchClient;
    ///
    /// let client = WaterwatchClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a client around a configured reqwest `Client` (timeouts, TLS, proxies)
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /health
    pub async fn health(&self) -> Result<HealthReport> {
        let response = self.client.get(self.url("/health")).send().await?;
        self.handle_response(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handling
    // =============================================================================

    /// Checks the status code, then deserializes the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!(status = status.as_u16(), "Orchestrator returned an error");
            return Err(ClientError::from_body(status.as_u16(), &body));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = WaterwatchClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = WaterwatchClient::new("http://localhost:8080/");
        assert_eq!(client.url("/job/list"), "http://localhost:8080/job/list");
    }
}
