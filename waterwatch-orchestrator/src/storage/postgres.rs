use async_trait::async_trait;
use sqlx::PgPool;

use super::{AuditEntry, Storage, StoredRecord};
use crate::error::StorageError;
use crate::repository::{audit_repository, record_repository};

/// PostgreSQL storage over the `entity_records` and `data_change_log` tables
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn find_existing(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<StoredRecord>, StorageError> {
        record_repository::find(&self.pool, entity_type, entity_id).await
    }

    async fn upsert(&self, record: StoredRecord) -> Result<(), StorageError> {
        if record.entity_id.is_empty() {
            return Err(StorageError::MalformedRecord(format!(
                "{} record without an id",
                record.entity_type
            )));
        }
        record_repository::upsert(&self.pool, &record).await
    }

    async fn append_audit_log(&self, entry: AuditEntry) -> Result<(), StorageError> {
        audit_repository::append(&self.pool, &entry).await
    }

    async fn list(&self, entity_type: &str) -> Result<Vec<StoredRecord>, StorageError> {
        record_repository::list_by_type(&self.pool, entity_type).await
    }
}
