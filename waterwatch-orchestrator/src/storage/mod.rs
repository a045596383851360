//! Storage collaborators
//!
//! The sync pipeline only talks to storage through [`Storage`], after a change
//! has been detected. [`MemoryStorage`] backs tests and database-less runs;
//! [`PgStorage`] persists to PostgreSQL.

mod memory;
mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waterwatch_core::change::{Fingerprint, Record};
use waterwatch_core::domain::event::ChangeType;
use waterwatch_core::domain::source::SourceId;

use crate::error::StorageError;

/// Latest persisted version of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub entity_type: String,
    pub entity_id: String,
    pub fingerprint: Fingerprint,
    pub data: Record,
    pub source: SourceId,
    pub updated_at: DateTime<Utc>,
}

/// One persisted change, appended to the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity_type: String,
    pub entity_id: String,
    pub change_type: ChangeType,
    pub changed_fields: Record,
    pub old_values: Record,
    pub source: SourceId,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn find_existing(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<StoredRecord>, StorageError>;

    async fn upsert(&self, record: StoredRecord) -> Result<(), StorageError>;

    async fn append_audit_log(&self, entry: AuditEntry) -> Result<(), StorageError>;

    /// Every stored record of one entity type, ordered by id
    async fn list(&self, entity_type: &str) -> Result<Vec<StoredRecord>, StorageError>;
}
