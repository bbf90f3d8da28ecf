//! Storage abstraction for complaint records.
//!
//! The [`ComplaintStore`] trait is the whole contract the orchestrators need
//! from the relational side: look a record up, list what changed, apply a
//! partial update and persist per-direction checkpoints. Records are
//! provisioned by the application, never by the sync engine.
//!
//! Implementations must be `Send + Sync` to be shared with the agent task.
//!
//! | Implementation | Purpose |
//! |----------------|---------|
//! | [`SqliteStore`] | Bundled store used by the CLI (sqlx, WAL) |
//! | [`InMemoryStore`] | Tests |
//! | [`RetryingStore`] | Wraps any store with timeouts and bounded backoff |

pub mod memory;
pub mod retrying;
pub mod sqlite;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::error::StoreError;
use crate::models::{Cursor, Direction, RecordPatch, StoreRecord};
use crate::retry::RetryPolicy;

pub use memory::InMemoryStore;
pub use retrying::RetryingStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait ComplaintStore: Send + Sync {
    /// Fetch one record by its identifier.
    async fn find_by_identifier(&self, id: &str) -> Result<Option<StoreRecord>, StoreError>;

    /// Records strictly past `since` in `(updated_at, id)` order (all records
    /// when `None`), ascending.
    async fn list_changed_since(
        &self,
        since: Option<&Cursor>,
        limit: usize,
    ) -> Result<Vec<StoreRecord>, StoreError>;

    /// Apply `patch` to the record atomically and return the new state.
    ///
    /// Side-table sub-blocks are merged per key, or replaced wholesale when
    /// the patch asks for [`SideTableMerge::ReplaceContent`]. `updated_at`
    /// moves to now unless the patch only touches the `sync` sub-block.
    ///
    /// [`SideTableMerge::ReplaceContent`]: crate::models::SideTableMerge::ReplaceContent
    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<StoreRecord, StoreError>;

    async fn checkpoint(&self, direction: Direction) -> Result<Option<Cursor>, StoreError>;

    async fn set_checkpoint(&self, direction: Direction, cursor: &Cursor) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: ComplaintStore + ?Sized> ComplaintStore for Arc<S> {
    async fn find_by_identifier(&self, id: &str) -> Result<Option<StoreRecord>, StoreError> {
        (**self).find_by_identifier(id).await
    }

    async fn list_changed_since(
        &self,
        since: Option<&Cursor>,
        limit: usize,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        (**self).list_changed_since(since, limit).await
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<StoreRecord, StoreError> {
        (**self).update(id, patch).await
    }

    async fn checkpoint(&self, direction: Direction) -> Result<Option<Cursor>, StoreError> {
        (**self).checkpoint(direction).await
    }

    async fn set_checkpoint(&self, direction: Direction, cursor: &Cursor) -> Result<(), StoreError> {
        (**self).set_checkpoint(direction, cursor).await
    }
}

/// The store the CLI and the agent talk to: SQLite behind timeouts and retry.
pub async fn open_store(config: &Config) -> Result<RetryingStore<SqliteStore>, StoreError> {
    let sqlite = SqliteStore::open(&config.store).await?;
    Ok(RetryingStore::new(
        sqlite,
        RetryPolicy::from_config(&config.retry),
        config.store.timeout(),
    ))
}
