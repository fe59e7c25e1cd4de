//! Single-collection wrapper.
//!
//! Remaps every operation onto one backing collection, encoding the
//! original collection into a key prefix `<collection>__<key>`. Useful for
//! backends where collections are expensive (one table, one index) or
//! where the caller only gets a single namespace. Collection enumeration
//! is not supported in this mode; key enumeration strips the prefix for
//! the requested collection.

use async_trait::async_trait;
use keygrid_core::{KvError, KvResult, ValueMap};

use crate::store::{resolve_collection, Capabilities, KeyValueStore};

const DEFAULT_SEPARATOR: &str = "__";

/// Flattens all collections into one backing collection.
pub struct SingleCollectionWrapper<S> {
    inner: S,
    backing_collection: String,
    separator: String,
}

impl<S: KeyValueStore> SingleCollectionWrapper<S> {
    /// Wraps `inner`, storing everything in `backing_collection`.
    #[must_use]
    pub fn new(inner: S, backing_collection: impl Into<String>) -> Self {
        Self {
            inner,
            backing_collection: backing_collection.into(),
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }

    /// Overrides the collection/key separator.
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn backing(&self) -> Option<&str> {
        Some(self.backing_collection.as_str())
    }

    fn prefix(&self, collection: Option<&str>) -> String {
        format!("{}{}", resolve_collection(collection), self.separator)
    }

    fn map_key(&self, collection: Option<&str>, key: &str) -> String {
        format!("{}{key}", self.prefix(collection))
    }

    fn map_keys(&self, collection: Option<&str>, keys: &[String]) -> Vec<String> {
        keys.iter().map(|key| self.map_key(collection, key)).collect()
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for SingleCollectionWrapper<S> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        self.inner
            .get(self.backing(), &self.map_key(collection, key))
            .await
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.inner
            .put(self.backing(), &self.map_key(collection, key), value, ttl)
            .await
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.inner
            .delete(self.backing(), &self.map_key(collection, key))
            .await
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        self.inner
            .ttl(self.backing(), &self.map_key(collection, key))
            .await
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.inner
            .exists(self.backing(), &self.map_key(collection, key))
            .await
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        self.inner
            .get_many(self.backing(), &self.map_keys(collection, keys))
            .await
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.inner
            .put_many(self.backing(), &self.map_keys(collection, keys), values, ttl)
            .await
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        self.inner
            .delete_many(self.backing(), &self.map_keys(collection, keys))
            .await
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        self.inner
            .ttl_many(self.backing(), &self.map_keys(collection, keys))
            .await
    }

    async fn collections(&self, _limit: Option<usize>) -> KvResult<Vec<String>> {
        // Original collection names are folded into key prefixes and are
        // not enumerable from here.
        Err(KvError::UnsupportedOperation {
            operation: "collections",
        })
    }

    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        let prefix = self.prefix(collection);
        let keys = self.inner.keys(self.backing(), limit).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(ToString::to_string))
            .collect())
    }

    async fn destroy_collection(&self, collection: Option<&str>) -> KvResult<bool> {
        let prefix = self.prefix(collection);
        let keys = self.inner.keys(self.backing(), None).await?;
        let to_delete: Vec<String> = keys
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .collect();
        if to_delete.is_empty() {
            return Ok(false);
        }
        let deleted = self.inner.delete_many(self.backing(), &to_delete).await?;
        Ok(deleted > 0)
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        self.inner.destroy_collection(self.backing()).await
    }

    async fn cull(&self) -> KvResult<()> {
        self.inner.cull().await
    }

    async fn close(&self) -> KvResult<()> {
        self.inner.close().await
    }

    fn capabilities(&self) -> Capabilities {
        let inner = self.inner.capabilities();
        Capabilities {
            enumerate_collections: false,
            enumerate_keys: inner.enumerate_keys,
            destroy_collection: inner.enumerate_keys,
            destroy_store: inner.destroy_collection,
            native_ttl: inner.native_ttl,
            cull: inner.cull,
            stable_api: inner.stable_api,
        }
    }
}
