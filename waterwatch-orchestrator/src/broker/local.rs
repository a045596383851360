use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use super::{Broker, BrokerMessage};
use crate::error::BrokerError;

/// In-process broker backed by a tokio broadcast channel
///
/// Clones share the same channel, so several notifiers in one process (or in
/// one test) can talk to each other through it.
#[derive(Clone)]
pub struct LocalBroker {
    sender: broadcast::Sender<BrokerMessage>,
}

impl LocalBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        // No live subscribers is not an error
        let _ = self.sender.send(BrokerMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        channels: &[&str],
    ) -> Result<BoxStream<'static, BrokerMessage>, BrokerError> {
        let channels: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| {
            let message = match item {
                Ok(message) if channels.contains(&message.channel) => Some(message),
                Ok(_) => None,
                Err(e) => {
                    warn!("Local broker subscriber lagged: {}", e);
                    None
                }
            };
            futures::future::ready(message)
        });
        Ok(stream.boxed())
    }
}
