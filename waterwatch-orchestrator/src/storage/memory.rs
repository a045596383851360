use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;

use super::{AuditEntry, Storage, StoredRecord};
use crate::error::StorageError;

/// In-memory storage
///
/// Records are keyed by `(entity_type, entity_id)`. Counts every write so
/// tests can assert that unchanged data produced none.
#[derive(Default)]
pub struct MemoryStorage {
    records: RwLock<BTreeMap<(String, String), StoredRecord>>,
    audit_log: Mutex<Vec<AuditEntry>>,
    writes: Mutex<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit_log.lock().clone()
    }

    /// Number of upserts performed so far
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find_existing(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<StoredRecord>, StorageError> {
        let key = (entity_type.to_string(), entity_id.to_string());
        Ok(self.records.read().get(&key).cloned())
    }

    async fn upsert(&self, record: StoredRecord) -> Result<(), StorageError> {
        if record.entity_id.is_empty() {
            return Err(StorageError::MalformedRecord(format!(
                "{} record without an id",
                record.entity_type
            )));
        }
        let key = (record.entity_type.clone(), record.entity_id.clone());
        self.records.write().insert(key, record);
        *self.writes.lock() += 1;
        Ok(())
    }

    async fn append_audit_log(&self, entry: AuditEntry) -> Result<(), StorageError> {
        self.audit_log.lock().push(entry);
        Ok(())
    }

    async fn list(&self, entity_type: &str) -> Result<Vec<StoredRecord>, StorageError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.entity_type == entity_type)
            .cloned()
            .collect())
    }
}
