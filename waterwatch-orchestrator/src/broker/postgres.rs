use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::{debug, warn};

use super::{Broker, BrokerMessage};
use crate::error::BrokerError;

/// Broker built on PostgreSQL `LISTEN`/`NOTIFY`
///
/// Payloads are limited to what `pg_notify` accepts (just under 8000 bytes by
/// default); larger notifications fail to publish and are logged by the caller.
#[derive(Clone)]
pub struct PgBroker {
    pool: PgPool,
}

impl PgBroker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        channels: &[&str],
    ) -> Result<BoxStream<'static, BrokerMessage>, BrokerError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen_all(channels.iter().copied()).await?;
        debug!("Listening on broker channels: {:?}", channels);

        let stream = futures::stream::unfold(listener, |mut listener| async move {
            match listener.recv().await {
                Ok(notification) => {
                    let message = BrokerMessage {
                        channel: notification.channel().to_string(),
                        payload: notification.payload().to_string(),
                    };
                    Some((message, listener))
                }
                Err(e) => {
                    warn!("Broker listener connection failed: {}", e);
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
