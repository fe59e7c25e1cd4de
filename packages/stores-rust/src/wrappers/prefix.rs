//! Transparent prefix wrappers.
//!
//! [`PrefixCollectionsWrapper`] prepends `prefix<separator>` to every
//! collection name on the way in and strips it on enumeration;
//! [`PrefixKeysWrapper`] does the same for keys. Both are invisible to the
//! caller and compose with any store -- typical uses are multi-tenant
//! isolation on a shared backend and blue/green namespaces.

use async_trait::async_trait;
use keygrid_core::{KvResult, ValueMap};

use crate::store::{resolve_collection, Capabilities, KeyValueStore};

const DEFAULT_SEPARATOR: &str = "__";

/// Prefixes every collection name.
pub struct PrefixCollectionsWrapper<S> {
    inner: S,
    prefix: String,
    separator: String,
}

impl<S: KeyValueStore> PrefixCollectionsWrapper<S> {
    /// Wraps `inner`, prefixing collections with `prefix`.
    #[must_use]
    pub fn new(inner: S, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }

    /// Overrides the prefix/collection separator.
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn full_prefix(&self) -> String {
        format!("{}{}", self.prefix, self.separator)
    }

    fn map(&self, collection: Option<&str>) -> String {
        format!("{}{}", self.full_prefix(), resolve_collection(collection))
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for PrefixCollectionsWrapper<S> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        self.inner.get(Some(&self.map(collection)), key).await
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.inner
            .put(Some(&self.map(collection)), key, value, ttl)
            .await
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.inner.delete(Some(&self.map(collection)), key).await
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        self.inner.ttl(Some(&self.map(collection)), key).await
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.inner.exists(Some(&self.map(collection)), key).await
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        self.inner.get_many(Some(&self.map(collection)), keys).await
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.inner
            .put_many(Some(&self.map(collection)), keys, values, ttl)
            .await
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        self.inner
            .delete_many(Some(&self.map(collection)), keys)
            .await
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        self.inner.ttl_many(Some(&self.map(collection)), keys).await
    }

    async fn collections(&self, limit: Option<usize>) -> KvResult<Vec<String>> {
        let full_prefix = self.full_prefix();
        let names = self.inner.collections(limit).await?;
        Ok(names
            .into_iter()
            .filter_map(|name| name.strip_prefix(&full_prefix).map(ToString::to_string))
            .collect())
    }

    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        self.inner.keys(Some(&self.map(collection)), limit).await
    }

    async fn destroy_collection(&self, collection: Option<&str>) -> KvResult<bool> {
        self.inner
            .destroy_collection(Some(&self.map(collection)))
            .await
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

/// Prefixes every key.
pub struct PrefixKeysWrapper<S> {
    inner: S,
    prefix: String,
    separator: String,
}

impl<S: KeyValueStore> PrefixKeysWrapper<S> {
    /// Wraps `inner`, prefixing keys with `prefix`.
    #[must_use]
    pub fn new(inner: S, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }

    /// Overrides the prefix/key separator.
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn full_prefix(&self) -> String {
        format!("{}{}", self.prefix, self.separator)
    }

    fn map(&self, key: &str) -> String {
        format!("{}{key}", self.full_prefix())
    }

    fn map_all(&self, keys: &[String]) -> Vec<String> {
        keys.iter().map(|key| self.map(key)).collect()
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for PrefixKeysWrapper<S> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        self.inner.get(collection, &self.map(key)).await
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.inner.put(collection, &self.map(key), value, ttl).await
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.inner.delete(collection, &self.map(key)).await
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        self.inner.ttl(collection, &self.map(key)).await
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.inner.exists(collection, &self.map(key)).await
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        self.inner.get_many(collection, &self.map_all(keys)).await
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.inner
            .put_many(collection, &self.map_all(keys), values, ttl)
            .await
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        self.inner
            .delete_many(collection, &self.map_all(keys))
            .await
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        self.inner.ttl_many(collection, &self.map_all(keys)).await
    }

    async fn collections(&self, limit: Option<usize>) -> KvResult<Vec<String>> {
        self.inner.collections(limit).await
    }

    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        let full_prefix = self.full_prefix();
        let keys = self.inner.keys(collection, limit).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&full_prefix).map(ToString::to_string))
            .collect())
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
    async fn collection_prefix_round_trip() {
        let store = PrefixCollectionsWrapper::new(MemoryStore::in_memory(), "tenant1");
        store.put(Some("users"), "k", value(json!({"n": 1})), None).await.unwrap();

        // The inner store sees the prefixed collection.
        assert_eq!(
            store
                .inner()
                .get(Some("tenant1__users"), "k")
                .await
                .unwrap(),
            Some(value(json!({"n": 1})))
        );
        assert_eq!(
            store.get(Some("users"), "k").await.unwrap(),
            Some(value(json!({"n": 1})))
        );
    }

    #[tokio::test]
    async fn collection_enumeration_strips_prefix_and_hides_others() {
        let inner = MemoryStore::in_memory();
        inner.put(Some("unrelated"), "k", value(json!({})), None).await.unwrap();

        let store = PrefixCollectionsWrapper::new(inner, "tenant1");
        store.put(Some("users"), "k", value(json!({})), None).await.unwrap();

        assert_eq!(store.collections(None).await.unwrap(), vec!["users"]);
    }

    #[tokio::test]
    async fn key_prefix_round_trip_and_enumeration() {
        let store = PrefixKeysWrapper::new(MemoryStore::in_memory(), "v2");
        store.put(Some("c"), "alice", value(json!({"n": 1})), None).await.unwrap();

        assert_eq!(
            store.inner().get(Some("c"), "v2__alice").await.unwrap(),
            Some(value(json!({"n": 1})))
        );
        assert_eq!(store.keys(Some("c"), None).await.unwrap(), vec!["alice"]);

        assert!(store.delete(Some("c"), "alice").await.unwrap());
        assert!(store.get(Some("c"), "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn distinct_prefixes_are_isolated() {
        let shared = std::sync::Arc::new(MemoryStore::in_memory());
        let blue = PrefixKeysWrapper::new(std::sync::Arc::clone(&shared), "blue");
        let green = PrefixKeysWrapper::new(std::sync::Arc::clone(&shared), "green");

        blue.put(Some("c"), "k", value(json!({"env": "blue"})), None).await.unwrap();
        green.put(Some("c"), "k", value(json!({"env": "green"})), None).await.unwrap();

        assert_eq!(
            blue.get(Some("c"), "k").await.unwrap(),
            Some(value(json!({"env": "blue"})))
        );
        assert_eq!(
            green.get(Some("c"), "k").await.unwrap(),
            Some(value(json!({"env": "green"})))
        );
    }
}
