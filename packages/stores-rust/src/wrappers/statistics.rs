//! Statistics wrapper.
//!
//! Counts operations per collection into a process-local, non-persistent
//! structure and passes everything through unchanged. Get/ttl/delete/exists
//! track hits and misses; put tracks totals; batch operations count
//! per element. Enumeration and destroy operations are not tracked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use keygrid_core::{KvResult, ValueMap};

use crate::store::{resolve_collection, Capabilities, KeyValueStore};

#[derive(Default)]
struct Counter {
    count: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Counter {
    fn record(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    fn record_hits(&self, n: u64) {
        self.record(n);
        self.hits.fetch_add(n, Ordering::Relaxed);
    }

    fn record_misses(&self, n: u64) {
        self.record(n);
        self.misses.fetch_add(n, Ordering::Relaxed);
    }

    fn record_outcome(&self, hit: bool) {
        if hit {
            self.record_hits(1);
        } else {
            self.record_misses(1);
        }
    }

    fn snapshot(&self) -> OperationCounts {
        OperationCounts {
            count: self.count.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct CollectionCounters {
    get: Counter,
    ttl: Counter,
    put: Counter,
    delete: Counter,
    exists: Counter,
}

/// Point-in-time counter values for one operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    /// Total operations.
    pub count: u64,
    /// Operations that found an entry.
    pub hits: u64,
    /// Operations that found nothing.
    pub misses: u64,
}

/// Point-in-time counter values for one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStatisticsSnapshot {
    /// Get operation counters.
    pub get: OperationCounts,
    /// Ttl operation counters.
    pub ttl: OperationCounts,
    /// Put operation counters (hits/misses unused).
    pub put: OperationCounts,
    /// Delete operation counters.
    pub delete: OperationCounts,
    /// Exists operation counters.
    pub exists: OperationCounts,
}

/// Counts operations per collection.
pub struct StatisticsWrapper<S> {
    inner: S,
    collections: DashMap<String, Arc<CollectionCounters>>,
}

impl<S: KeyValueStore> StatisticsWrapper<S> {
    /// Wraps `inner` with fresh counters.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            collections: DashMap::new(),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Counter values for one collection (zeroes if never touched).
    #[must_use]
    pub fn snapshot(&self, collection: &str) -> CollectionStatisticsSnapshot {
        self.collections
            .get(collection)
            .map_or_else(CollectionStatisticsSnapshot::default, |counters| {
                CollectionStatisticsSnapshot {
                    get: counters.get.snapshot(),
                    ttl: counters.ttl.snapshot(),
                    put: counters.put.snapshot(),
                    delete: counters.delete.snapshot(),
                    exists: counters.exists.snapshot(),
                }
            })
    }

    /// Names of collections with recorded operations.
    #[must_use]
    pub fn tracked_collections(&self) -> Vec<String> {
        self.collections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn counters(&self, collection: Option<&str>) -> Arc<CollectionCounters> {
        let name = resolve_collection(collection);
        self.collections
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for StatisticsWrapper<S> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        let result = self.inner.get(collection, key).await?;
        self.counters(collection)
            .get
            .record_outcome(result.is_some());
        Ok(result)
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.inner.put(collection, key, value, ttl).await?;
        self.counters(collection).put.record(1);
        Ok(())
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        let deleted = self.inner.delete(collection, key).await?;
        self.counters(collection).delete.record_outcome(deleted);
        Ok(deleted)
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        let result = self.inner.ttl(collection, key).await?;
        self.counters(collection)
            .ttl
            .record_outcome(result.0.is_some());
        Ok(result)
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        let found = self.inner.exists(collection, key).await?;
        self.counters(collection).exists.record_outcome(found);
        Ok(found)
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        let results = self.inner.get_many(collection, keys).await?;
        let hits = results.iter().filter(|value| value.is_some()).count() as u64;
        let counters = self.counters(collection);
        counters.get.record_hits(hits);
        counters.get.record_misses(results.len() as u64 - hits);
        Ok(results)
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.inner.put_many(collection, keys, values, ttl).await?;
        self.counters(collection).put.record(keys.len() as u64);
        Ok(())
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        let deleted = self.inner.delete_many(collection, keys).await?;
        let counters = self.counters(collection);
        counters.delete.record_hits(deleted as u64);
        counters
            .delete
            .record_misses((keys.len() - deleted) as u64);
        Ok(deleted)
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        let results = self.inner.ttl_many(collection, keys).await?;
        let hits = results.iter().filter(|(value, _)| value.is_some()).count() as u64;
        let counters = self.counters(collection);
        counters.ttl.record_hits(hits);
        counters.ttl.record_misses(results.len() as u64 - hits);
        Ok(results)
    }

    async fn collections(&self, limit: Option<usize>) -> KvResult<Vec<String>> {
        self.inner.collections(limit).await
    }

    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        self.inner.keys(collection, limit).await
    }

    async fn destroy_collection(&self, collection: Option<&str>) -> KvResult<bool> {
        self.inner.destroy_collection(collection).await
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        self.inner.destroy_store().await
    }

    async fn cull(&self) -> KvResult<()> {
        self.inner.cull().await
    }

    async fn close(&self) -> KvResult<()> {
        self.inner.close().await
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::stores::MemoryStore;

    fn value(v: serde_json::Value) -> ValueMap {
        let serde_json::Value::Object(map) = v else {
            panic!("expected object")
        };
        map
    }

    #[tokio::test]
    async fn counters_reflect_operations_exactly() {
        let store = StatisticsWrapper::new(MemoryStore::in_memory());

        store.put(Some("t"), "k", value(json!({"a": 1})), None).await.unwrap();
        assert!(store.get(Some("t"), "k").await.unwrap().is_some());
        assert!(store.get(Some("t"), "missing").await.unwrap().is_none());
        assert!(store.delete(Some("t"), "k").await.unwrap());
        assert!(!store.delete(Some("t"), "k").await.unwrap());
        let _ = store.ttl(Some("t"), "k").await.unwrap();
        assert!(!store.exists(Some("t"), "k").await.unwrap());

        let stats = store.snapshot("t");
        assert_eq!(stats.put.count, 1);
        assert_eq!(stats.get, OperationCounts { count: 2, hits: 1, misses: 1 });
        assert_eq!(stats.delete, OperationCounts { count: 2, hits: 1, misses: 1 });
        assert_eq!(stats.ttl, OperationCounts { count: 1, hits: 0, misses: 1 });
        assert_eq!(stats.exists, OperationCounts { count: 1, hits: 0, misses: 1 });
    }

    #[tokio::test]
    async fn batch_operations_count_per_element() {
        let store = StatisticsWrapper::new(MemoryStore::in_memory());
        let keys: Vec<String> = (0..3).map(|i| format!("k{i}")).collect();
        store
            .put_many(
                Some("t"),
                &keys,
                vec![value(json!({})), value(json!({})), value(json!({}))],
                None,
            )
            .await
            .unwrap();

        let mut lookup = keys.clone();
        lookup.push("missing".to_string());
        let _ = store.get_many(Some("t"), &lookup).await.unwrap();
        let _ = store.delete_many(Some("t"), &lookup).await.unwrap();

        let stats = store.snapshot("t");
        assert_eq!(stats.put.count, 3);
        assert_eq!(stats.get, OperationCounts { count: 4, hits: 3, misses: 1 });
        assert_eq!(stats.delete, OperationCounts { count: 4, hits: 3, misses: 1 });
    }

    #[tokio::test]
    async fn collections_are_tracked_separately() {
        let store = StatisticsWrapper::new(MemoryStore::in_memory());
        store.put(Some("a"), "k", value(json!({})), None).await.unwrap();
        store.put(Some("b"), "k", value(json!({})), None).await.unwrap();
        store.put(Some("b"), "k2", value(json!({})), None).await.unwrap();

        assert_eq!(store.snapshot("a").put.count, 1);
        assert_eq!(store.snapshot("b").put.count, 2);
        assert_eq!(store.snapshot("untouched").put.count, 0);

        let mut tracked = store.tracked_collections();
        tracked.sort();
        assert_eq!(tracked, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn default_collection_is_resolved_for_counting() {
        let store = StatisticsWrapper::new(MemoryStore::in_memory());
        store.put(None, "k", value(json!({})), None).await.unwrap();
        assert_eq!(store.snapshot("default").put.count, 1);
    }
}
