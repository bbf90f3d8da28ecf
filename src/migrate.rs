use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::error::StoreError;

/// `sync init`: create the bundled store's schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.store).await?;
    ensure_schema(&pool).await?;
    pool.close().await;

    println!("sync init");
    println!("  store: {}", config.store.path.display());
    println!("ok");
    Ok(())
}

/// Idempotent schema creation.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    // Create complaints table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS complaints (
            id TEXT PRIMARY KEY,
            group_code TEXT NOT NULL,
            title TEXT NOT NULL,
            synonyms_json TEXT NOT NULL DEFAULT '[]',
            icd10_json TEXT NOT NULL DEFAULT '[]',
            additional_data_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create checkpoints table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_checkpoints (
            direction TEXT PRIMARY KEY,
            cursor TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_complaints_updated_at ON complaints(updated_at, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
