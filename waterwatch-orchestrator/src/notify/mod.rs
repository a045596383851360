//! Notification fan-out
//!
//! Keeps the table of live connections and their subscriptions, delivers
//! change events to matching connections, and relays everything through the
//! broker so other instances can deliver it too.

mod listener;

pub use listener::BrokerListener;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use waterwatch_core::domain::event::{ChangeEvent, Subscription};
use waterwatch_core::dto::notify::ServerMessage;

use crate::broker::{Broker, CHANGES_CHANNEL, SYSTEM_CHANNEL};

pub type ConnectionId = Uuid;

/// Outbound buffer per connection; a connection this far behind is dropped
pub const CONNECTION_BUFFER: usize = 256;

/// Broker payload wrapper identifying the publishing instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: Uuid,
    pub message: ServerMessage,
}

struct Connection {
    sender: mpsc::Sender<ServerMessage>,
    subscriptions: HashSet<Subscription>,
}

pub struct Notifier {
    instance_id: Uuid,
    broker: Arc<dyn Broker>,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl Notifier {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            broker,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Identifier stamped on every envelope this instance publishes
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Registers a live connection and returns the receiving end of its queue
    ///
    /// Reusing an id replaces the previous registration.
    pub fn connect(&self, id: ConnectionId) -> mpsc::Receiver<ServerMessage> {
        let (sender, receiver) = mpsc::channel(CONNECTION_BUFFER);
        let connection = Connection {
            sender,
            subscriptions: HashSet::new(),
        };
        let total = {
            let mut connections = self.connections.write();
            connections.insert(id, connection);
            connections.len()
        };
        info!(connection_id = %id, total, "Connection opened");
        receiver
    }

    /// Unregisters a connection; returns whether it was registered
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.connections.write().remove(&id).is_some();
        if removed {
            info!(connection_id = %id, "Connection closed");
        }
        removed
    }

    /// Adds a subscription to a connection and confirms it to the client
    ///
    /// Subscriptions accumulate. Returns `false` for an unknown connection.
    pub fn subscribe(&self, id: ConnectionId, subscription: Subscription) -> bool {
        let added = {
            let mut connections = self.connections.write();
            match connections.get_mut(&id) {
                Some(connection) => {
                    connection.subscriptions.insert(subscription.clone());
                    true
                }
                None => false,
            }
        };
        if added {
            debug!(connection_id = %id, %subscription, "Subscribed");
            self.send_to(id, ServerMessage::subscription_confirmed(&subscription));
        }
        added
    }

    /// Delivers a message to a single connection, disconnecting it on failure
    pub fn send_to(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let sender = self
            .connections
            .read()
            .get(&id)
            .map(|connection| connection.sender.clone());
        match sender {
            Some(sender) => self.deliver(vec![(id, sender)], message) == 1,
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Publishes a change event and delivers it to matching local connections
    ///
    /// Returns the number of local connections reached. A broker failure is
    /// logged and does not affect local delivery.
    pub async fn notify_change(&self, event: ChangeEvent) -> usize {
        let message = ServerMessage::data_update(event.clone());
        self.publish(CHANGES_CHANNEL, message).await;
        self.deliver_change(&event)
    }

    /// Publishes an operational event and delivers it to every local connection
    pub async fn notify_system_event(&self, event_type: &str, data: JsonValue) -> usize {
        let message = ServerMessage::system_event(event_type, data);
        self.publish(SYSTEM_CHANNEL, message.clone()).await;
        self.broadcast(message)
    }

    /// Delivers an operational error to every local connection
    ///
    /// Errors describe this instance only and are not relayed through the broker.
    pub fn notify_system_error(&self, error_type: &str, message: &str, context: JsonValue) -> usize {
        self.broadcast(ServerMessage::system_error(error_type, message, context))
    }

    /// Handles a raw broker payload received by the listener
    ///
    /// Envelopes published by this instance are ignored, since they were
    /// already delivered locally.
    pub fn handle_broker_payload(&self, payload: &str) -> usize {
        let envelope: Envelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring malformed broker payload: {}", e);
                return 0;
            }
        };
        if envelope.origin == self.instance_id {
            return 0;
        }
        match envelope.message {
            ServerMessage::DataUpdate { data, .. } => self.deliver_change(&data),
            other => self.broadcast(other),
        }
    }

    async fn publish(&self, channel: &str, message: ServerMessage) {
        let envelope = Envelope {
            origin: self.instance_id,
            message,
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode broker envelope: {}", e);
                return;
            }
        };
        if let Err(e) = self.broker.publish(channel, &payload).await {
            warn!(channel, "Broker publish failed: {}", e);
        }
    }

    fn deliver_change(&self, event: &ChangeEvent) -> usize {
        let targets: Vec<_> = self
            .connections
            .read()
            .iter()
            .filter(|(_, connection)| {
                connection
                    .subscriptions
                    .iter()
                    .any(|s| s.matches(&event.entity_type, &event.entity_id))
            })
            .map(|(id, connection)| (*id, connection.sender.clone()))
            .collect();
        self.deliver(targets, ServerMessage::data_update(event.clone()))
    }

    fn broadcast(&self, message: ServerMessage) -> usize {
        let targets: Vec<_> = self
            .connections
            .read()
            .iter()
            .map(|(id, connection)| (*id, connection.sender.clone()))
            .collect();
        self.deliver(targets, message)
    }

    /// Sends to every target; targets that fail are disconnected
    fn deliver(
        &self,
        targets: Vec<(ConnectionId, mpsc::Sender<ServerMessage>)>,
        message: ServerMessage,
    ) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection_id = %id, "Delivery failed: {}", e);
                    failed.push(id);
                }
            }
        }
        for id in failed {
            self.disconnect(id);
        }
        delivered
    }
}
