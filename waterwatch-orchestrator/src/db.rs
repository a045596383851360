use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Latest version of every synced entity
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_records (
            entity_type VARCHAR(100) NOT NULL,
            entity_id VARCHAR(255) NOT NULL,
            fingerprint CHAR(64) NOT NULL,
            data JSONB NOT NULL,
            source VARCHAR(50) NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (entity_type, entity_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only change log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data_change_log (
            id BIGSERIAL PRIMARY KEY,
            entity_type VARCHAR(100) NOT NULL,
            entity_id VARCHAR(255) NOT NULL,
            change_type VARCHAR(20) NOT NULL,
            changed_fields JSONB NOT NULL DEFAULT '{}',
            old_values JSONB NOT NULL DEFAULT '{}',
            source VARCHAR(50) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_data_change_log_entity ON data_change_log(entity_type, entity_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_data_change_log_created_at ON data_change_log(created_at DESC)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
