//! Entity Record Repository
//!
//! Latest known version of every synced entity.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use waterwatch_core::change::Fingerprint;

use crate::error::StorageError;
use crate::storage::StoredRecord;

/// Find the stored version of one entity
pub async fn find(
    pool: &PgPool,
    entity_type: &str,
    entity_id: &str,
) -> Result<Option<StoredRecord>, StorageError> {
    let row = sqlx::query_as::<_, RecordRow>(
        r#"
        SELECT entity_type, entity_id, fingerprint, data, source, updated_at
        FROM entity_records
        WHERE entity_type = $1 AND entity_id = $2
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .fetch_optional(pool)
    .await?;

    row.map(StoredRecord::try_from).transpose()
}

/// Insert or replace the stored version of an entity
pub async fn upsert(pool: &PgPool, record: &StoredRecord) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO entity_records (entity_type, entity_id, fingerprint, data, source, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (entity_type, entity_id) DO UPDATE
        SET fingerprint = EXCLUDED.fingerprint,
            data = EXCLUDED.data,
            source = EXCLUDED.source,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&record.entity_type)
    .bind(&record.entity_id)
    .bind(record.fingerprint.as_str())
    .bind(JsonValue::Object(record.data.clone()))
    .bind(record.source.as_str())
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// List every stored entity of one type
pub async fn list_by_type(
    pool: &PgPool,
    entity_type: &str,
) -> Result<Vec<StoredRecord>, StorageError> {
    let rows = sqlx::query_as::<_, RecordRow>(
        r#"
        SELECT entity_type, entity_id, fingerprint, data, source, updated_at
        FROM entity_records
        WHERE entity_type = $1
        ORDER BY entity_id ASC
        "#,
    )
    .bind(entity_type)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(StoredRecord::try_from).collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RecordRow {
    entity_type: String,
    entity_id: String,
    fingerprint: String,
    data: JsonValue,
    source: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for StoredRecord {
    type Error = StorageError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let JsonValue::Object(data) = row.data else {
            return Err(StorageError::MalformedRecord(format!(
                "{}:{} data is not an object",
                row.entity_type, row.entity_id
            )));
        };
        let source = row
            .source
            .parse()
            .map_err(StorageError::MalformedRecord)?;

        Ok(StoredRecord {
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            fingerprint: Fingerprint::from(row.fingerprint),
            data,
            source,
            updated_at: row.updated_at,
        })
    }
}
