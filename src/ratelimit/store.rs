//! Counter storage backends.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use super::record::RateLimitRecord;
use crate::error::Result;

/// Keyed storage for per-client counters.
///
/// Implementations must make a single `upsert` atomic with respect to other
/// upserts on the same `client_id`. Nothing spans more than one key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Fetch the record for a client, if one exists.
    async fn get(&self, client_id: &str) -> Result<Option<RateLimitRecord>>;

    /// Insert or replace the record keyed by `record.client_id`.
    async fn upsert(&self, record: RateLimitRecord) -> Result<()>;

    /// Drop records whose window started before `cutoff`.
    ///
    /// Maintenance only; the limiter never calls this. Returns the number of
    /// records removed.
    async fn purge_older_than(&self, cutoff: i64) -> Result<usize>;

    /// Number of stored records.
    async fn len(&self) -> Result<usize>;
}

#[async_trait]
impl<S: CounterStore + ?Sized> CounterStore for Arc<S> {
    async fn get(&self, client_id: &str) -> Result<Option<RateLimitRecord>> {
        (**self).get(client_id).await
    }

    async fn upsert(&self, record: RateLimitRecord) -> Result<()> {
        (**self).upsert(record).await
    }

    async fn purge_older_than(&self, cutoff: i64) -> Result<usize> {
        (**self).purge_older_than(cutoff).await
    }

    async fn len(&self) -> Result<usize> {
        (**self).len().await
    }
}

/// In-process store backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, RateLimitRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing records.
    pub fn from_records(records: impl IntoIterator<Item = RateLimitRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.records.insert(record.client_id.clone(), record);
        }
        store
    }

    /// Copy of every record, in no particular order.
    pub fn snapshot(&self) -> Vec<RateLimitRecord> {
        self.records.iter().map(|entry| entry.value().clone()).collect()
    }

    pub(crate) fn put(&self, record: RateLimitRecord) -> Option<RateLimitRecord> {
        self.records.insert(record.client_id.clone(), record)
    }

    pub(crate) fn remove(&self, client_id: &str) {
        self.records.remove(client_id);
    }

    pub(crate) fn lookup(&self, client_id: &str) -> Option<RateLimitRecord> {
        self.records.get(client_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn retain_from(&self, cutoff: i64) -> usize {
        let mut removed = 0;
        self.records.retain(|_, record| {
            let keep = record.window_start >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub(crate) fn count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, client_id: &str) -> Result<Option<RateLimitRecord>> {
        Ok(self.lookup(client_id))
    }

    async fn upsert(&self, record: RateLimitRecord) -> Result<()> {
        self.put(record);
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: i64) -> Result<usize> {
        Ok(self.retain_from(cutoff))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        assert_eq!(store.get("10.0.0.1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_record() {
        let store = MemoryStore::new();

        store.upsert(RateLimitRecord::first("10.0.0.1", 0)).await.unwrap();
        store
            .upsert(RateLimitRecord {
                client_id: "10.0.0.1".to_string(),
                window_start: 0,
                count: 2,
            })
            .await
            .unwrap();

        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(store.get("10.0.0.1").await.unwrap().unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_purge_older_than() {
        let store = MemoryStore::from_records([
            RateLimitRecord::first("old", 10),
            RateLimitRecord::first("edge", 100),
            RateLimitRecord::first("new", 200),
        ]);

        let removed = store.purge_older_than(100).await.unwrap();

        assert_eq!(removed, 1);
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("edge").await.unwrap().is_some());
        assert!(store.get("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_shared_store_through_arc() {
        let store = Arc::new(MemoryStore::new());
        let handle: Arc<dyn CounterStore> = store.clone();

        handle.upsert(RateLimitRecord::first("a", 1)).await.unwrap();
        assert_eq!(store.snapshot().len(), 1);
    }
}
