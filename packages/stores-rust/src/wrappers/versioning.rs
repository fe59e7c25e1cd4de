//! Versioning wrapper.
//!
//! Wraps every stored value in `{ "__version__": <tag>,
//! "__versioned_data__": <value> }`. Reads whose stored tag differs from
//! the wrapper's configured tag return a miss -- cache-invalidation
//! semantics across schema changes: bump the tag and old entries become
//! invisible instead of poisoning the new schema. Unversioned values found
//! on read pass through as-is.

use async_trait::async_trait;
use keygrid_core::{KvResult, ValueMap};
use serde_json::Value;

use crate::store::{Capabilities, KeyValueStore};

/// Field holding the version tag.
pub const VERSION_FIELD: &str = "__version__";

/// Field holding the wrapped value.
pub const DATA_FIELD: &str = "__versioned_data__";

/// Invalidates values across schema versions.
pub struct VersioningWrapper<S> {
    inner: S,
    tag: String,
}

impl<S: KeyValueStore> VersioningWrapper<S> {
    /// Wraps `inner` under the given schema tag.
    #[must_use]
    pub fn new(inner: S, tag: impl Into<String>) -> Self {
        Self {
            inner,
            tag: tag.into(),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn wrap(&self, value: ValueMap) -> ValueMap {
        if value.contains_key(VERSION_FIELD) && value.contains_key(DATA_FIELD) {
            // Already a versioning envelope; never nest.
            return value;
        }
        let mut envelope = ValueMap::new();
        envelope.insert(VERSION_FIELD.to_string(), Value::String(self.tag.clone()));
        envelope.insert(DATA_FIELD.to_string(), Value::Object(value));
        envelope
    }

    fn unwrap(&self, mut value: ValueMap) -> Option<ValueMap> {
        match value.get(VERSION_FIELD) {
            // Unversioned value written before the wrapper existed.
            None => Some(value),
            Some(Value::String(tag)) if *tag == self.tag => {
                match value.remove(DATA_FIELD) {
                    Some(Value::Object(data)) => Some(data),
                    _ => None,
                }
            }
            Some(_) => None,
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for VersioningWrapper<S> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        Ok(self
            .inner
            .get(collection, key)
            .await?
            .and_then(|value| self.unwrap(value)))
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.inner
            .put(collection, key, self.wrap(value), ttl)
            .await
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.inner.delete(collection, key).await
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        let (value, remaining) = self.inner.ttl(collection, key).await?;
        match value.and_then(|value| self.unwrap(value)) {
            Some(data) => Ok((Some(data), remaining)),
            None => Ok((None, None)),
        }
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        Ok(self.get(collection, key).await?.is_some())
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        let values = self.inner.get_many(collection, keys).await?;
        Ok(values
            .into_iter()
            .map(|value| value.and_then(|value| self.unwrap(value)))
            .collect())
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        let wrapped = values.into_iter().map(|value| self.wrap(value)).collect();
        self.inner.put_many(collection, keys, wrapped, ttl).await
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        self.inner.delete_many(collection, keys).await
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        let results = self.inner.ttl_many(collection, keys).await?;
        Ok(results
            .into_iter()
            .map(|(value, remaining)| {
                match value.and_then(|value| self.unwrap(value)) {
                    Some(data) => (Some(data), remaining),
                    None => (None, None),
                }
            })
            .collect())
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
    use std::sync::Arc;

    fn value(v: serde_json::Value) -> ValueMap {
        let serde_json::Value::Object(map) = v else {
            panic!("expected object")
        };
        map
    }

    #[tokio::test]
    async fn same_tag_round_trips() {
        let store = VersioningWrapper::new(MemoryStore::in_memory(), "v1");
        store
            .put(Some("t"), "k", value(json!({"name": "x"})), None)
            .await
            .unwrap();
        assert_eq!(
            store.get(Some("t"), "k").await.unwrap(),
            Some(value(json!({"name": "x"})))
        );
    }

    #[tokio::test]
    async fn different_tag_reads_as_miss() {
        let shared = Arc::new(MemoryStore::in_memory());
        let v1 = VersioningWrapper::new(Arc::clone(&shared), "v1");
        let v2 = VersioningWrapper::new(Arc::clone(&shared), "v2");

        v1.put(Some("t"), "k", value(json!({"name": "x"})), None).await.unwrap();
        assert!(v2.get(Some("t"), "k").await.unwrap().is_none());
        assert_eq!(v2.ttl(Some("t"), "k").await.unwrap(), (None, None));
        assert!(v1.get(Some("t"), "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn writes_are_single_wrapped() {
        let store = VersioningWrapper::new(MemoryStore::in_memory(), "v1");
        store.put(Some("t"), "k", value(json!({"a": 1})), None).await.unwrap();

        let stored = store.inner().get(Some("t"), "k").await.unwrap().unwrap();
        assert_eq!(stored.get(VERSION_FIELD), Some(&json!("v1")));
        assert_eq!(stored[DATA_FIELD], json!({"a": 1}));

        // Re-putting the stored envelope does not nest another layer.
        store.put(Some("t"), "k", stored.clone(), None).await.unwrap();
        let again = store.inner().get(Some("t"), "k").await.unwrap().unwrap();
        assert_eq!(again, stored);
    }

    #[tokio::test]
    async fn unversioned_values_pass_through() {
        let store = VersioningWrapper::new(MemoryStore::in_memory(), "v1");
        store
            .inner()
            .put(Some("t"), "legacy", value(json!({"old": true})), None)
            .await
            .unwrap();
        assert_eq!(
            store.get(Some("t"), "legacy").await.unwrap(),
            Some(value(json!({"old": true})))
        );
    }

    #[tokio::test]
    async fn batch_reads_apply_version_filtering() {
        let shared = Arc::new(MemoryStore::in_memory());
        let v1 = VersioningWrapper::new(Arc::clone(&shared), "v1");
        let v2 = VersioningWrapper::new(Arc::clone(&shared), "v2");

        v1.put(Some("t"), "a", value(json!({"n": 1})), None).await.unwrap();
        v2.put(Some("t"), "b", value(json!({"n": 2})), None).await.unwrap();

        let results = v2
            .get_many(Some("t"), &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert!(results[0].is_none());
        assert_eq!(results[1], Some(value(json!({"n": 2}))));
    }
}
