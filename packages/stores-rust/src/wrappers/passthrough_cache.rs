//! Passthrough cache wrapper.
//!
//! Pairs an authoritative primary store with a fast cache store. Reads
//! check the cache first and, on a primary hit, write the entry back to the
//! cache with the primary's *remaining* TTL (never longer), so a cached
//! entry can never outlive its source. Writes go to the primary and then
//! invalidate the cache before returning; a reader can therefore never
//! observe a stale cached value after a put has returned. Cache population
//! is best-effort: a failing cache degrades reads to primary speed but
//! never loses data.

use async_trait::async_trait;
use keygrid_core::{KvResult, ValueMap};
use tracing::warn;

use crate::store::{Capabilities, KeyValueStore};

/// Read-through / write-invalidate cache over a primary store.
pub struct PassthroughCacheWrapper<P, C> {
    primary: P,
    cache: C,
    populate_on_put: bool,
}

impl<P: KeyValueStore, C: KeyValueStore> PassthroughCacheWrapper<P, C> {
    /// Wraps `primary` with `cache`, populating the cache on puts.
    #[must_use]
    pub fn new(primary: P, cache: C) -> Self {
        Self {
            primary,
            cache,
            populate_on_put: true,
        }
    }

    /// Only invalidate on put; the cache fills on subsequent reads.
    #[must_use]
    pub fn without_put_population(mut self) -> Self {
        self.populate_on_put = false;
        self
    }

    /// The authoritative store.
    pub fn primary(&self) -> &P {
        &self.primary
    }

    /// The cache store.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Best-effort cache write; the cache never gets a longer TTL than the
    /// primary's remaining one.
    async fn populate(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        remaining_ttl: Option<f64>,
    ) {
        if let Err(err) = self.cache.put(collection, key, value, remaining_ttl).await {
            warn!(key, error = %err, "cache population failed; continuing");
        }
    }
}

#[async_trait]
impl<P: KeyValueStore, C: KeyValueStore> KeyValueStore for PassthroughCacheWrapper<P, C> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        if let Some(cached) = self.cache.get(collection, key).await? {
            return Ok(Some(cached));
        }
        let (value, remaining) = self.primary.ttl(collection, key).await?;
        match value {
            Some(value) => {
                self.populate(collection, key, value.clone(), remaining).await;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.primary
            .put(collection, key, value.clone(), ttl)
            .await?;
        // Invalidation must complete before the put returns.
        self.cache.delete(collection, key).await?;
        if self.populate_on_put {
            self.populate(collection, key, value, ttl).await;
        }
        Ok(())
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        let deleted = self.primary.delete(collection, key).await?;
        self.cache.delete(collection, key).await?;
        Ok(deleted)
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        let (cached, remaining) = self.cache.ttl(collection, key).await?;
        if cached.is_some() {
            return Ok((cached, remaining));
        }
        let (value, remaining) = self.primary.ttl(collection, key).await?;
        if let Some(ref value) = value {
            self.populate(collection, key, value.clone(), remaining).await;
        }
        Ok((value, remaining))
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        Ok(self.get(collection, key).await?.is_some())
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        let mut results = self.cache.get_many(collection, keys).await?;

        let missing: Vec<(usize, String)> = results
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_none())
            .map(|(index, _)| (index, keys[index].clone()))
            .collect();
        if missing.is_empty() {
            return Ok(results);
        }

        let missing_keys: Vec<String> = missing.iter().map(|(_, key)| key.clone()).collect();
        let from_primary = self.primary.ttl_many(collection, &missing_keys).await?;
        for ((index, key), (value, remaining)) in missing.into_iter().zip(from_primary) {
            if let Some(value) = value {
                self.populate(collection, &key, value.clone(), remaining).await;
                results[index] = Some(value);
            }
        }
        Ok(results)
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.primary
            .put_many(collection, keys, values.clone(), ttl)
            .await?;
        self.cache.delete_many(collection, keys).await?;
        if self.populate_on_put {
            if let Err(err) = self.cache.put_many(collection, keys, values, ttl).await {
                warn!(error = %err, "batch cache population failed; continuing");
            }
        }
        Ok(())
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        let deleted = self.primary.delete_many(collection, keys).await?;
        self.cache.delete_many(collection, keys).await?;
        Ok(deleted)
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        let mut results = self.cache.ttl_many(collection, keys).await?;

        let missing: Vec<(usize, String)> = results
            .iter()
            .enumerate()
            .filter(|(_, (value, _))| value.is_none())
            .map(|(index, _)| (index, keys[index].clone()))
            .collect();
        if missing.is_empty() {
            return Ok(results);
        }

        let missing_keys: Vec<String> = missing.iter().map(|(_, key)| key.clone()).collect();
        let from_primary = self.primary.ttl_many(collection, &missing_keys).await?;
        for ((index, key), (value, remaining)) in missing.into_iter().zip(from_primary) {
            if let Some(ref found) = value {
                self.populate(collection, &key, found.clone(), remaining).await;
            }
            results[index] = (value, remaining);
        }
        Ok(results)
    }

    async fn collections(&self, limit: Option<usize>) -> KvResult<Vec<String>> {
        self.primary.collections(limit).await
    }

    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        self.primary.keys(collection, limit).await
    }

    async fn destroy_collection(&self, collection: Option<&str>) -> KvResult<bool> {
        let destroyed = self.primary.destroy_collection(collection).await?;
        if self.cache.capabilities().destroy_collection {
            let _ = self.cache.destroy_collection(collection).await?;
        }
        Ok(destroyed)
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        let destroyed = self.primary.destroy_store().await?;
        if self.cache.capabilities().destroy_store {
            let _ = self.cache.destroy_store().await?;
        }
        Ok(destroyed)
    }

    async fn cull(&self) -> KvResult<()> {
        // Cache entries carry bounded TTLs and age out on their own.
        self.primary.cull().await
    }

    async fn close(&self) -> KvResult<()> {
        self.primary.close().await?;
        self.cache.close().await
    }

    fn capabilities(&self) -> Capabilities {
        self.primary.capabilities()
    }
}
