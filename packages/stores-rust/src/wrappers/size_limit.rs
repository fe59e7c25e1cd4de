//! Size limit wrapper.
//!
//! Rejects puts whose serialized JSON envelope exceeds a configured byte
//! budget with [`KvError::ValueTooLarge`]. Batch puts check every entry
//! before any write reaches the inner store, preserving the all-or-nothing
//! view of `put_many`.

use async_trait::async_trait;
use keygrid_core::{EnvelopeFields, KvError, KvResult, ManagedEntry, ValueMap};

use crate::store::{Capabilities, KeyValueStore};

/// Rejects values whose envelope exceeds `max_size` bytes.
pub struct SizeLimitWrapper<S> {
    inner: S,
    max_size: usize,
}

impl<S: KeyValueStore> SizeLimitWrapper<S> {
    /// Wraps `inner` with a `max_size`-byte envelope budget.
    #[must_use]
    pub fn new(inner: S, max_size: usize) -> Self {
        Self { inner, max_size }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Measures the value against the envelope form it will be stored in.
    fn check(&self, value: &ValueMap) -> KvResult<()> {
        let envelope = ManagedEntry::new(value.clone()).to_json(EnvelopeFields::ALL)?;
        let size = envelope.len();
        if size > self.max_size {
            return Err(KvError::ValueTooLarge {
                size,
                max: self.max_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for SizeLimitWrapper<S> {
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
        self.check(&value)?;
        self.inner.put(collection, key, value, ttl).await
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
        for value in &values {
            self.check(value)?;
        }
        self.inner.put_many(collection, keys, values, ttl).await
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
