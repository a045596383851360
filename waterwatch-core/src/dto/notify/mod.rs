//! Live notification protocol
//!
//! Messages exchanged over a WebSocket connection. Clients send
//! [`ClientMessage`]s to register interest; the server pushes
//! [`ServerMessage`]s for the lifetime of the connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::event::{ChangeEvent, Subscription};

/// Message pushed from the server to a live connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    DataUpdate {
        timestamp: DateTime<Utc>,
        data: ChangeEvent,
    },
    SystemEvent {
        event_type: String,
        data: JsonValue,
        timestamp: DateTime<Utc>,
    },
    SystemError {
        error_type: String,
        message: String,
        #[serde(default)]
        context: JsonValue,
        timestamp: DateTime<Utc>,
    },
    SubscriptionConfirmed {
        scope: String,
        entity_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    pub fn data_update(event: ChangeEvent) -> Self {
        ServerMessage::DataUpdate {
            timestamp: Utc::now(),
            data: event,
        }
    }

    pub fn system_event(event_type: impl Into<String>, data: JsonValue) -> Self {
        ServerMessage::SystemEvent {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn system_error(
        error_type: impl Into<String>,
        message: impl Into<String>,
        context: JsonValue,
    ) -> Self {
        ServerMessage::SystemError {
            error_type: error_type.into(),
            message: message.into(),
            context,
            timestamp: Utc::now(),
        }
    }

    pub fn subscription_confirmed(subscription: &Subscription) -> Self {
        let (scope, entity_id) = match subscription {
            Subscription::All => ("all".to_string(), None),
            Subscription::EntityType { entity_type } => (entity_type.clone(), None),
            Subscription::Entity {
                entity_type,
                entity_id,
            } => (entity_type.clone(), Some(entity_id.clone())),
        };
        ServerMessage::SubscriptionConfirmed {
            scope,
            entity_id,
            timestamp: Utc::now(),
        }
    }
}

/// Message sent by a client over a live connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        /// `all` or an entity type
        #[serde(default = "default_scope", alias = "entity_type")]
        scope: String,
        #[serde(default, alias = "entityId")]
        entity_id: Option<String>,
    },
}

fn default_scope() -> String {
    "all".to_string()
}

impl ClientMessage {
    pub fn subscription(&self) -> Subscription {
        match self {
            ClientMessage::Subscribe { scope, entity_id } => {
                Subscription::from_request(scope, entity_id.as_deref())
            }
        }
    }
}
