//! SQLite-backed [`ComplaintStore`].
//!
//! List columns and the side table are stored as JSON text; timestamps as
//! epoch milliseconds so ordering and comparison happen in SQL. Every update
//! reads, merges and writes inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::config::StoreConfig;
use crate::db;
use crate::error::StoreError;
use crate::migrate;
use crate::models::{AdditionalData, Cursor, Direction, RecordPatch, StoreRecord};

use super::ComplaintStore;

type ComplaintRow = (String, String, String, String, String, String, i64, i64);

const SELECT_COLUMNS: &str = "SELECT id, group_code, title, synonyms_json, icd10_json, \
                              additional_data_json, created_at, updated_at FROM complaints";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = db::connect(config).await?;
        migrate::ensure_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Provision a new record. Fails if the id already exists.
    pub async fn insert(&self, record: &StoreRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO complaints (id, group_code, title, synonyms_json, icd10_json,
                                    additional_data_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.group_code)
        .bind(&record.title)
        .bind(serde_json::to_string(&record.synonyms)?)
        .bind(serde_json::to_string(&record.icd10_codes)?)
        .bind(record.additional_data.to_json()?)
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite `updated_at` directly, as an application edit would.
    pub async fn set_updated_at(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE complaints SET updated_at = ? WHERE id = ?")
            .bind(at.timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Schema(format!("timestamp out of range: {}", ms)))
}

fn decode(row: ComplaintRow) -> Result<StoreRecord, StoreError> {
    let (id, group_code, title, synonyms, icd10, additional, created_at, updated_at) = row;
    Ok(StoreRecord {
        id,
        group_code,
        title,
        synonyms: serde_json::from_str(&synonyms)?,
        icd10_codes: serde_json::from_str(&icd10)?,
        additional_data: AdditionalData::from_json(&additional)?,
        created_at: from_millis(created_at)?,
        updated_at: from_millis(updated_at)?,
    })
}

#[async_trait]
impl ComplaintStore for SqliteStore {
    async fn find_by_identifier(&self, id: &str) -> Result<Option<StoreRecord>, StoreError> {
        let row: Option<ComplaintRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(decode).transpose()
    }

    async fn list_changed_since(
        &self,
        since: Option<&Cursor>,
        limit: usize,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        let since_ms = since.map(|c| c.updated_at.timestamp_millis());
        let since_id = since.and_then(|c| c.id.as_deref());
        let rows: Vec<ComplaintRow> = sqlx::query_as(&format!(
            "{} WHERE (?1 IS NULL OR updated_at > ?1 OR (updated_at = ?1 AND ?2 IS NOT NULL AND id > ?2)) \
             ORDER BY updated_at ASC, id ASC LIMIT ?3",
            SELECT_COLUMNS
        ))
        .bind(since_ms)
        .bind(since_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(decode).collect()
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<StoreRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<ComplaintRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut record = match row {
            Some(row) => decode(row)?,
            None => return Err(StoreError::NotFound(id.to_string())),
        };

        record.apply(patch, Utc::now());
        let updated_ms = record.updated_at.timestamp_millis();

        sqlx::query(
            r#"
            UPDATE complaints
            SET group_code = ?, title = ?, synonyms_json = ?, icd10_json = ?,
                additional_data_json = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.group_code)
        .bind(&record.title)
        .bind(serde_json::to_string(&record.synonyms)?)
        .bind(serde_json::to_string(&record.icd10_codes)?)
        .bind(record.additional_data.to_json()?)
        .bind(updated_ms)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        record.updated_at = from_millis(updated_ms)?;
        Ok(record)
    }

    async fn checkpoint(&self, direction: Direction) -> Result<Option<Cursor>, StoreError> {
        let cursor: Option<String> =
            sqlx::query_scalar("SELECT cursor FROM sync_checkpoints WHERE direction = ?")
                .bind(direction.as_str())
                .fetch_optional(&self.pool)
                .await?;
        match cursor {
            Some(c) => Cursor::decode(&c)
                .map(Some)
                .ok_or_else(|| StoreError::Schema(format!("unreadable checkpoint cursor: {}", c))),
            None => Ok(None),
        }
    }

    async fn set_checkpoint(&self, direction: Direction, cursor: &Cursor) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (direction, cursor, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(direction) DO UPDATE SET
                cursor = excluded.cursor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(direction.as_str())
        .bind(cursor.encode())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
