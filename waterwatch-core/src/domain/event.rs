//! Change events and subscriptions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::change::{FieldDiff, Record};

/// What happened to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Updated,
    Submitted,
    Cancelled,
    Retried,
    Completed,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Submitted => "submitted",
            ChangeType::Cancelled => "cancelled",
            ChangeType::Retried => "retried",
            ChangeType::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// A detected change to one entity, as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_type: String,
    pub entity_id: String,
    pub change_type: ChangeType,
    pub changes: Record,
    #[serde(default)]
    pub old_values: Record,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        change_type: ChangeType,
        changes: Record,
        source: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            change_type,
            changes,
            old_values: Record::new(),
            source: source.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn from_diff(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        change_type: ChangeType,
        diff: FieldDiff,
        source: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(entity_type, entity_id, change_type, diff.changed, source);
        event.old_values = diff.old_values;
        event
    }

    /// `entity_type:entity_id`
    pub fn key(&self) -> String {
        format!("{}:{}", self.entity_type, self.entity_id)
    }
}

/// Interest filter held by a live connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Subscription {
    All,
    EntityType {
        entity_type: String,
    },
    Entity {
        entity_type: String,
        entity_id: String,
    },
}

impl Subscription {
    /// Builds a subscription from a client request
    ///
    /// A scope of `all` subscribes to everything; any other scope is an
    /// entity type, narrowed to one entity when an id is given.
    pub fn from_request(scope: &str, entity_id: Option<&str>) -> Self {
        match (scope, entity_id) {
            ("all", _) => Subscription::All,
            (entity_type, Some(id)) if !id.is_empty() => Subscription::Entity {
                entity_type: entity_type.to_string(),
                entity_id: id.to_string(),
            },
            (entity_type, _) => Subscription::EntityType {
                entity_type: entity_type.to_string(),
            },
        }
    }

    pub fn matches(&self, entity_type: &str, entity_id: &str) -> bool {
        match self {
            Subscription::All => true,
            Subscription::EntityType { entity_type: t } => t == entity_type,
            Subscription::Entity {
                entity_type: t,
                entity_id: id,
            } => t == entity_type && id == entity_id,
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscription::All => f.write_str("all"),
            Subscription::EntityType { entity_type } => write!(f, "{}:*", entity_type),
            Subscription::Entity {
                entity_type,
                entity_id,
            } => write!(f, "{}:{}", entity_type, entity_id),
        }
    }
}
