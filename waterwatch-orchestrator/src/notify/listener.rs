use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Notifier;
use crate::backoff::backoff_delay;
use crate::broker::{Broker, CHANGES_CHANNEL, SYSTEM_CHANNEL};

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(60);

/// Relays broker payloads from other instances into the local fan-out
///
/// Resubscribes with exponential backoff whenever the broker stream ends or
/// the subscription cannot be opened.
pub struct BrokerListener {
    notifier: Arc<Notifier>,
    broker: Arc<dyn Broker>,
}

impl BrokerListener {
    pub fn new(notifier: Arc<Notifier>, broker: Arc<dyn Broker>) -> Self {
        Self { notifier, broker }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Broker listener started");
        let mut failures: u32 = 0;

        loop {
            match self.broker.subscribe(&[CHANGES_CHANNEL, SYSTEM_CHANNEL]).await {
                Ok(mut stream) => {
                    failures = 0;
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                info!("Broker listener stopped");
                                return;
                            }
                            message = stream.next() => match message {
                                Some(message) => {
                                    let delivered = self.notifier.handle_broker_payload(&message.payload);
                                    debug!(channel = %message.channel, delivered, "Relayed broker message");
                                }
                                None => {
                                    warn!("Broker stream ended");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => warn!("Broker subscribe failed: {}", e),
            }

            failures += 1;
            let delay = backoff_delay(failures, RECONNECT_BASE, RECONNECT_MAX);
            debug!("Resubscribing to broker in {:?}", delay);
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Broker listener stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
