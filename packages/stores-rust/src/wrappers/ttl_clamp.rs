//! TTL clamp wrapper.
//!
//! Forces every put's effective TTL into `[min_ttl, max_ttl]`. A put
//! without a TTL first receives the configured `missing_ttl` (when set)
//! and is then clamped like any other. Reads and deletes pass through.

use async_trait::async_trait;
use keygrid_core::{KvResult, ValueMap};

use crate::store::{Capabilities, KeyValueStore};

/// Clamps put TTLs into a configured range.
pub struct TtlClampWrapper<S> {
    inner: S,
    min_ttl: f64,
    max_ttl: f64,
    missing_ttl: Option<f64>,
}

impl<S: KeyValueStore> TtlClampWrapper<S> {
    /// Wraps `inner`, clamping TTLs into `[min_ttl, max_ttl]`.
    #[must_use]
    pub fn new(inner: S, min_ttl: f64, max_ttl: f64) -> Self {
        Self {
            inner,
            min_ttl,
            max_ttl,
            missing_ttl: None,
        }
    }

    /// Substitutes `missing_ttl` when a put carries no TTL.
    #[must_use]
    pub fn with_missing_ttl(mut self, missing_ttl: f64) -> Self {
        self.missing_ttl = Some(missing_ttl);
        self
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn clamp(&self, ttl: Option<f64>) -> Option<f64> {
        let ttl = ttl.or(self.missing_ttl)?;
        Some(ttl.clamp(self.min_ttl, self.max_ttl))
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for TtlClampWrapper<S> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        self.inner.get(collection, key).await
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.inner.put(collection, key, value, self.clamp(ttl)).await
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.inner.delete(collection, key).await
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        self.inner.ttl(collection, key).await
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.inner.exists(collection, key).await
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        self.inner.get_many(collection, keys).await
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.inner
            .put_many(collection, keys, values, self.clamp(ttl))
            .await
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        self.inner.delete_many(collection, keys).await
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        self.inner.ttl_many(collection, keys).await
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
    async fn short_ttls_are_raised_to_the_minimum() {
        let store = TtlClampWrapper::new(MemoryStore::in_memory(), 50.0, 100.0);
        store
            .put(Some("t"), "k", value(json!({"a": 1})), Some(5.0))
            .await
            .unwrap();

        let (found, remaining) = store.ttl(Some("t"), "k").await.unwrap();
        assert_eq!(found, Some(value(json!({"a": 1}))));
        let remaining = remaining.unwrap();
        assert!(remaining > 48.0 && remaining <= 50.0, "got {remaining}");
    }

    #[tokio::test]
    async fn long_ttls_are_capped_at_the_maximum() {
        let store = TtlClampWrapper::new(MemoryStore::in_memory(), 50.0, 100.0);
        store
            .put(Some("t"), "k", value(json!({})), Some(10_000.0))
            .await
            .unwrap();

        let (_, remaining) = store.ttl(Some("t"), "k").await.unwrap();
        assert!(remaining.unwrap() <= 100.0);
    }

    #[tokio::test]
    async fn missing_ttl_is_substituted_then_clamped() {
        let store =
            TtlClampWrapper::new(MemoryStore::in_memory(), 50.0, 100.0).with_missing_ttl(70.0);
        store.put(Some("t"), "k", value(json!({})), None).await.unwrap();

        let (_, remaining) = store.ttl(Some("t"), "k").await.unwrap();
        let remaining = remaining.unwrap();
        assert!(remaining > 68.0 && remaining <= 70.0, "got {remaining}");
    }

    #[tokio::test]
    async fn no_ttl_and_no_missing_ttl_stores_forever() {
        let store = TtlClampWrapper::new(MemoryStore::in_memory(), 50.0, 100.0);
        store.put(Some("t"), "k", value(json!({})), None).await.unwrap();

        let (found, remaining) = store.ttl(Some("t"), "k").await.unwrap();
        assert!(found.is_some());
        assert!(remaining.is_none());
    }

    #[tokio::test]
    async fn batch_puts_are_clamped_too() {
        let store = TtlClampWrapper::new(MemoryStore::in_memory(), 50.0, 100.0);
        store
            .put_many(
                Some("t"),
                &["a".to_string(), "b".to_string()],
                vec![value(json!({})), value(json!({}))],
                Some(1.0),
            )
            .await
            .unwrap();

        for (_, remaining) in store
            .ttl_many(Some("t"), &["a".to_string(), "b".to_string()])
            .await
            .unwrap()
        {
            assert!(remaining.unwrap() > 48.0);
        }
    }
}
