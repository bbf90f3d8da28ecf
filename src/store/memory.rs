//! In-memory [`ComplaintStore`] for tests.
//!
//! Records live in a `HashMap` behind `std::sync::RwLock`. A poisoned lock
//! only means another test thread panicked, so the data is used as is.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Cursor, Direction, RecordPatch, StoreRecord};

use super::ComplaintStore;

pub struct InMemoryStore {
    records: RwLock<HashMap<String, StoreRecord>>,
    checkpoints: RwLock<HashMap<Direction, Cursor>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            checkpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Provision a record, replacing any with the same id.
    pub fn insert(&self, record: StoreRecord) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.id.clone(), record);
    }

    /// Force a record's `updated_at`, as a direct edit in the application
    /// would.
    pub fn set_updated_at(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.updated_at = at;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComplaintStore for InMemoryStore {
    async fn find_by_identifier(&self, id: &str) -> Result<Option<StoreRecord>, StoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(id).cloned())
    }

    async fn list_changed_since(
        &self,
        since: Option<&Cursor>,
        limit: usize,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut changed: Vec<StoreRecord> = records
            .values()
            .filter(|r| since.map_or(true, |c| c.admits(r)))
            .cloned()
            .collect();
        changed.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        changed.truncate(limit);
        Ok(changed)
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<StoreRecord, StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut next = record.clone();
        next.apply(patch, Utc::now());
        // round-trip the side table so schema violations surface like SQLite
        next.additional_data = crate::models::AdditionalData::from_json(&next.additional_data.to_json()?)?;
        *record = next.clone();
        Ok(next)
    }

    async fn checkpoint(&self, direction: Direction) -> Result<Option<Cursor>, StoreError> {
        let checkpoints = self.checkpoints.read().unwrap_or_else(PoisonError::into_inner);
        Ok(checkpoints.get(&direction).cloned())
    }

    async fn set_checkpoint(&self, direction: Direction, cursor: &Cursor) -> Result<(), StoreError> {
        let mut checkpoints = self.checkpoints.write().unwrap_or_else(PoisonError::into_inner);
        checkpoints.insert(direction, cursor.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComplaintMetadata, SyncMeta, SyncSource};
    use crate::hash::ContentHash;
    use chrono::Duration;

    #[tokio::test]
    async fn test_list_orders_by_updated_at_then_id() {
        let store = InMemoryStore::new();
        let t0 = Utc::now() - Duration::hours(1);
        for (id, offset) in [("B", 2), ("A", 2), ("C", 1)] {
            let mut r = StoreRecord::new(id, "CV", id);
            r.updated_at = t0 + Duration::minutes(offset);
            store.insert(r);
        }
        let ids: Vec<String> = store
            .list_changed_since(None, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["C", "A", "B"]);

        let since = Cursor::at(t0 + Duration::minutes(1));
        let later = store.list_changed_since(Some(&since), 1).await.unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].id, "A");

        let past_a = Cursor::after(&later[0]);
        let tail = store.list_changed_since(Some(&past_a), 10).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].id, "B");
    }

    #[tokio::test]
    async fn test_sync_only_update_keeps_updated_at() {
        let store = InMemoryStore::new();
        let record = StoreRecord::new("X1", "CV", "Dor");
        let before = record.updated_at;
        store.insert(record);

        let hash = ContentHash::of_bytes(b"x");
        let patched = store
            .update("X1", &RecordPatch::sync_only(SyncMeta::stamped(hash.clone(), SyncSource::System, Utc::now())))
            .await
            .unwrap();
        assert_eq!(patched.updated_at, before);
        assert_eq!(patched.synced_hash(), Some(&hash));
    }

    #[tokio::test]
    async fn test_content_update_bumps_updated_at_and_merges() {
        let store = InMemoryStore::new();
        let mut record = StoreRecord::new("X1", "CV", "Dor");
        record.updated_at = Utc::now() - Duration::days(1);
        record.additional_data.metadata = Some(ComplaintMetadata {
            chips: Some(vec!["dor".into()]),
            ..Default::default()
        });
        let before = record.updated_at;
        store.insert(record);

        let mut patch = RecordPatch {
            title: Some("Dor torácica".into()),
            ..RecordPatch::default()
        };
        patch.additional_data.metadata = Some(ComplaintMetadata {
            severity: Some(3),
            ..Default::default()
        });
        let updated = store.update("X1", &patch).await.unwrap();
        assert!(updated.updated_at > before);
        assert_eq!(updated.title, "Dor torácica");
        let meta = updated.additional_data.metadata.unwrap();
        assert_eq!(meta.severity, Some(3));
        assert_eq!(meta.chips, Some(vec!["dor".to_string()]));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = InMemoryStore::new();
        let err = store.update("nope", &RecordPatch::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_checkpoints_per_direction() {
        let store = InMemoryStore::new();
        let at = Cursor::at(Utc::now());
        store.set_checkpoint(Direction::Push, &at).await.unwrap();
        assert_eq!(store.checkpoint(Direction::Push).await.unwrap(), Some(at));
        assert_eq!(store.checkpoint(Direction::Pull).await.unwrap(), None);
    }
}
