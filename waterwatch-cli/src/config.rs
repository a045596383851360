//! CLI configuration

use waterwatch_client::WaterwatchClient;

#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub server_url: String,
}

impl Config {
    pub fn client(&self) -> WaterwatchClient {
        WaterwatchClient::new(&self.server_url)
    }
}
