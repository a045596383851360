//! Change Log Repository
//!
//! Append-only audit trail of persisted changes.

use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::error::StorageError;
use crate::storage::AuditEntry;

/// Append one entry to the change log
pub async fn append(pool: &PgPool, entry: &AuditEntry) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO data_change_log
            (entity_type, entity_id, change_type, changed_fields, old_values, source, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(entry.change_type.to_string())
    .bind(JsonValue::Object(entry.changed_fields.clone()))
    .bind(JsonValue::Object(entry.old_values.clone()))
    .bind(entry.source.as_str())
    .bind(entry.timestamp)
    .execute(pool)
    .await?;

    Ok(())
}
