//! [`ComplaintStore`] decorator adding per-call timeouts and bounded retry.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreError;
use crate::models::{Cursor, Direction, RecordPatch, StoreRecord};
use crate::retry::{retry, with_timeout, RetryPolicy};

use super::ComplaintStore;

pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<S: ComplaintStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            timeout,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ComplaintStore> ComplaintStore for RetryingStore<S> {
    async fn find_by_identifier(&self, id: &str) -> Result<Option<StoreRecord>, StoreError> {
        retry(&self.policy, "find_by_identifier", StoreError::is_transient, || {
            with_timeout(self.timeout, self.inner.find_by_identifier(id))
        })
        .await
    }

    async fn list_changed_since(
        &self,
        since: Option<&Cursor>,
        limit: usize,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        retry(&self.policy, "list_changed_since", StoreError::is_transient, || {
            with_timeout(self.timeout, self.inner.list_changed_since(since, limit))
        })
        .await
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<StoreRecord, StoreError> {
        // A timed-out update may still have committed; re-applying the same
        // patch is idempotent apart from `updated_at`.
        retry(&self.policy, "update", StoreError::is_transient, || {
            with_timeout(self.timeout, self.inner.update(id, patch))
        })
        .await
    }

    async fn checkpoint(&self, direction: Direction) -> Result<Option<Cursor>, StoreError> {
        retry(&self.policy, "checkpoint", StoreError::is_transient, || {
            with_timeout(self.timeout, self.inner.checkpoint(direction))
        })
        .await
    }

    async fn set_checkpoint(&self, direction: Direction, cursor: &Cursor) -> Result<(), StoreError> {
        retry(&self.policy, "set_checkpoint", StoreError::is_transient, || {
            with_timeout(self.timeout, self.inner.set_checkpoint(direction, cursor))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` lookups with a transient error.
    struct Flaky {
        inner: InMemoryStore,
        failures: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ComplaintStore for Flaky {
        async fn find_by_identifier(&self, id: &str) -> Result<Option<StoreRecord>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            self.inner.find_by_identifier(id).await
        }

        async fn list_changed_since(
            &self,
            since: Option<&Cursor>,
            limit: usize,
        ) -> Result<Vec<StoreRecord>, StoreError> {
            self.inner.list_changed_since(since, limit).await
        }

        async fn update(&self, id: &str, patch: &RecordPatch) -> Result<StoreRecord, StoreError> {
            self.inner.update(id, patch).await
        }

        async fn checkpoint(&self, direction: Direction) -> Result<Option<Cursor>, StoreError> {
            self.inner.checkpoint(direction).await
        }

        async fn set_checkpoint(&self, direction: Direction, cursor: &Cursor) -> Result<(), StoreError> {
            self.inner.set_checkpoint(direction, cursor).await
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            factor: 2.0,
        }
    }

    fn flaky(failures: u32) -> Flaky {
        let inner = InMemoryStore::new();
        inner.insert(StoreRecord::new("X1", "CV", "Dor"));
        Flaky {
            inner,
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    #[tokio::test]
    async fn test_recovers_from_transient_failures() {
        let store = RetryingStore::new(flaky(2), policy(3), Duration::from_secs(1));
        let found = store.find_by_identifier("X1").await.unwrap();
        assert!(found.is_some());
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_surfaces_error_after_budget() {
        let store = RetryingStore::new(flaky(5), policy(2), Duration::from_secs(1));
        let err = store.find_by_identifier("X1").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 2);
    }
}
