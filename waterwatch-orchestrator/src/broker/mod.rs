//! Pub/sub broker collaborators
//!
//! The broker carries notifications between orchestrator instances. It is
//! best-effort: publish failures are logged by the caller and never fatal.

mod local;
mod postgres;

pub use local::LocalBroker;
pub use postgres::PgBroker;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BrokerError;

/// Channel carrying entity change events
pub const CHANGES_CHANNEL: &str = "waterwatch_changes";

/// Channel carrying operational system events
pub const SYSTEM_CHANNEL: &str = "waterwatch_system";

/// A payload received from a broker channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError>;

    /// Opens a stream of payloads published on any of `channels`
    ///
    /// The stream ends when the underlying connection is lost; callers
    /// resubscribe with backoff.
    async fn subscribe(
        &self,
        channels: &[&str],
    ) -> Result<BoxStream<'static, BrokerMessage>, BrokerError>;
}
