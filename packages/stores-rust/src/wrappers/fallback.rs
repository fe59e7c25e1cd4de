//! Fallback wrapper.
//!
//! Routes reads to a fallback store when the primary errors; writes go to
//! the primary, optionally spilling to the fallback when the primary fails
//! and `write_to_fallback` is enabled. Fallback semantics are best-effort
//! and intentionally non-atomic: the two stores can diverge, and no
//! reconciliation is attempted.

use async_trait::async_trait;
use keygrid_core::{KvError, KvResult, ValueMap};
use tracing::warn;

use crate::store::{Capabilities, KeyValueStore};

/// Fails over from a primary to a fallback store.
pub struct FallbackWrapper<P, F> {
    primary: P,
    fallback: F,
    write_to_fallback: bool,
}

impl<P: KeyValueStore, F: KeyValueStore> FallbackWrapper<P, F> {
    /// Wraps `primary` with a read fallback. Writes stay primary-only.
    #[must_use]
    pub fn new(primary: P, fallback: F) -> Self {
        Self {
            primary,
            fallback,
            write_to_fallback: false,
        }
    }

    /// Also route writes to the fallback when the primary fails.
    #[must_use]
    pub fn with_fallback_writes(mut self) -> Self {
        self.write_to_fallback = true;
        self
    }

    /// The primary store.
    pub fn primary(&self) -> &P {
        &self.primary
    }

    /// The fallback store.
    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    fn note_failover(operation: &'static str, err: &KvError) {
        warn!(operation, error = %err, "primary store failed; using fallback");
    }
}

#[async_trait]
impl<P: KeyValueStore, F: KeyValueStore> KeyValueStore for FallbackWrapper<P, F> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        match self.primary.get(collection, key).await {
            Ok(value) => Ok(value),
            Err(err) => {
                Self::note_failover("get", &err);
                self.fallback.get(collection, key).await
            }
        }
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        match self.primary.put(collection, key, value.clone(), ttl).await {
            Ok(()) => Ok(()),
            Err(err) if self.write_to_fallback => {
                Self::note_failover("put", &err);
                self.fallback.put(collection, key, value, ttl).await
            }
            Err(err) => Err(err),
        }
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        match self.primary.delete(collection, key).await {
            Ok(deleted) => Ok(deleted),
            Err(err) if self.write_to_fallback => {
                Self::note_failover("delete", &err);
                self.fallback.delete(collection, key).await
            }
            Err(err) => Err(err),
        }
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        match self.primary.ttl(collection, key).await {
            Ok(result) => Ok(result),
            Err(err) => {
                Self::note_failover("ttl", &err);
                self.fallback.ttl(collection, key).await
            }
        }
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        match self.primary.exists(collection, key).await {
            Ok(found) => Ok(found),
            Err(err) => {
                Self::note_failover("exists", &err);
                self.fallback.exists(collection, key).await
            }
        }
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        match self.primary.get_many(collection, keys).await {
            Ok(results) => Ok(results),
            Err(err) => {
                Self::note_failover("get_many", &err);
                self.fallback.get_many(collection, keys).await
            }
        }
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        match self
            .primary
            .put_many(collection, keys, values.clone(), ttl)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if self.write_to_fallback => {
                Self::note_failover("put_many", &err);
                self.fallback.put_many(collection, keys, values, ttl).await
            }
            Err(err) => Err(err),
        }
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        match self.primary.delete_many(collection, keys).await {
            Ok(deleted) => Ok(deleted),
            Err(err) if self.write_to_fallback => {
                Self::note_failover("delete_many", &err);
                self.fallback.delete_many(collection, keys).await
            }
            Err(err) => Err(err),
        }
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        match self.primary.ttl_many(collection, keys).await {
            Ok(results) => Ok(results),
            Err(err) => {
                Self::note_failover("ttl_many", &err);
                self.fallback.ttl_many(collection, keys).await
            }
        }
    }

    async fn collections(&self, limit: Option<usize>) -> KvResult<Vec<String>> {
        match self.primary.collections(limit).await {
            Ok(names) => Ok(names),
            Err(err) => {
                Self::note_failover("collections", &err);
                self.fallback.collections(limit).await
            }
        }
    }

    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        match self.primary.keys(collection, limit).await {
            Ok(keys) => Ok(keys),
            Err(err) => {
                Self::note_failover("keys", &err);
                self.fallback.keys(collection, limit).await
            }
        }
    }

    async fn destroy_collection(&self, collection: Option<&str>) -> KvResult<bool> {
        self.primary.destroy_collection(collection).await
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        self.primary.destroy_store().await
    }

    async fn cull(&self) -> KvResult<()> {
        self.primary.cull().await
    }

    async fn close(&self) -> KvResult<()> {
        self.primary.close().await?;
        self.fallback.close().await
    }

    fn capabilities(&self) -> Capabilities {
        self.primary.capabilities()
    }
}
