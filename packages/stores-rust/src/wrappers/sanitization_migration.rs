//! Sanitization migration wrapper.
//!
//! Bridges two stores during a sanitization-strategy change: `current`
//! (new strategy) and `legacy` (old strategy). Reads try current first and
//! fall back to legacy; with `migrate_on_read` a legacy hit is copied into
//! current preserving its remaining TTL, and with `delete_after_migration`
//! the legacy copy is then removed. Writes land in current only; deletes
//! hit both; enumeration is the union of both.
//!
//! A bounded in-memory cache remembers where each `(collection, key)` was
//! last seen (`Current` / `Legacy` / `Missing`) so repeat reads skip the
//! double lookup. The cache is invalidated by puts and deletes and
//! self-heals when an entry expires out from under a cached location.

use async_trait::async_trait;
use keygrid_core::{KvResult, ValueMap};
use quick_cache::sync::Cache;

use crate::store::{resolve_collection, Capabilities, KeyValueStore};

const DEFAULT_CACHE_SIZE: usize = 1024;

/// Where a key was last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryLocation {
    /// Found in the current store.
    Current,
    /// Found in the legacy store.
    Legacy,
    /// Found in neither store.
    Missing,
}

/// Dual-store read path for sanitization-strategy migrations.
pub struct SanitizationMigrationWrapper<Cur, Leg> {
    current: Cur,
    legacy: Leg,
    migrate_on_read: bool,
    delete_after_migration: bool,
    cache: Cache<(String, String), EntryLocation>,
}

impl<Cur: KeyValueStore, Leg: KeyValueStore> SanitizationMigrationWrapper<Cur, Leg> {
    /// Wraps `current` and `legacy` with a default-sized location cache.
    /// Migration on read is off until enabled.
    #[must_use]
    pub fn new(current: Cur, legacy: Leg) -> Self {
        Self::with_cache_size(current, legacy, DEFAULT_CACHE_SIZE)
    }

    /// Wraps with an explicit location-cache capacity.
    #[must_use]
    pub fn with_cache_size(current: Cur, legacy: Leg, cache_size: usize) -> Self {
        Self {
            current,
            legacy,
            migrate_on_read: false,
            delete_after_migration: false,
            cache: Cache::new(cache_size),
        }
    }

    /// Copies legacy hits into the current store on read.
    #[must_use]
    pub fn with_migrate_on_read(mut self) -> Self {
        self.migrate_on_read = true;
        self
    }

    /// Removes the legacy copy once migrated (requires migrate-on-read).
    #[must_use]
    pub fn with_delete_after_migration(mut self) -> Self {
        self.delete_after_migration = true;
        self
    }

    /// The current (new strategy) store.
    pub fn current(&self) -> &Cur {
        &self.current
    }

    /// The legacy (old strategy) store.
    pub fn legacy(&self) -> &Leg {
        &self.legacy
    }

    /// The cached location for a key, if any.
    #[must_use]
    pub fn cached_location(&self, collection: Option<&str>, key: &str) -> Option<EntryLocation> {
        self.cache.get(&cache_key(collection, key))
    }

    fn remember(&self, collection: Option<&str>, key: &str, location: EntryLocation) {
        self.cache.insert(cache_key(collection, key), location);
    }

    fn forget(&self, collection: Option<&str>, key: &str) {
        self.cache.remove(&cache_key(collection, key));
    }

    /// Legacy-side lookup with optional migration. Returns the value and
    /// its remaining TTL and records the key's location.
    async fn read_legacy(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        let (value, remaining) = self.legacy.ttl(collection, key).await?;
        let Some(value) = value else {
            return Ok((None, None));
        };

        if self.migrate_on_read {
            self.current
                .put(collection, key, value.clone(), remaining)
                .await?;
            self.remember(collection, key, EntryLocation::Current);
            if self.delete_after_migration {
                let _ = self.legacy.delete(collection, key).await?;
            }
        } else {
            self.remember(collection, key, EntryLocation::Legacy);
        }
        Ok((Some(value), remaining))
    }

    async fn lookup(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        match self.cached_location(collection, key) {
            Some(EntryLocation::Missing) => return Ok((None, None)),
            Some(EntryLocation::Current) => {
                let result = self.current.ttl(collection, key).await?;
                if result.0.is_some() {
                    return Ok(result);
                }
                // The cached entry expired or was removed out-of-band.
                self.forget(collection, key);
            }
            Some(EntryLocation::Legacy) => {
                let result = self.read_legacy(collection, key).await?;
                if result.0.is_some() {
                    return Ok(result);
                }
                self.forget(collection, key);
            }
            None => {}
        }

        let result = self.current.ttl(collection, key).await?;
        if result.0.is_some() {
            self.remember(collection, key, EntryLocation::Current);
            return Ok(result);
        }

        let result = self.read_legacy(collection, key).await?;
        if result.0.is_some() {
            return Ok(result);
        }

        self.remember(collection, key, EntryLocation::Missing);
        Ok((None, None))
    }
}

fn cache_key(collection: Option<&str>, key: &str) -> (String, String) {
    (resolve_collection(collection).to_string(), key.to_string())
}

#[async_trait]
impl<Cur: KeyValueStore, Leg: KeyValueStore> KeyValueStore
    for SanitizationMigrationWrapper<Cur, Leg>
{
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        Ok(self.lookup(collection, key).await?.0)
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.current.put(collection, key, value, ttl).await?;
        self.remember(collection, key, EntryLocation::Current);
        Ok(())
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        let from_current = self.current.delete(collection, key).await?;
        let from_legacy = self.legacy.delete(collection, key).await?;
        self.remember(collection, key, EntryLocation::Missing);
        Ok(from_current || from_legacy)
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        self.lookup(collection, key).await
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        Ok(self.lookup(collection, key).await?.0.is_some())
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.lookup(collection, key).await?.0);
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
        self.current.put_many(collection, keys, values, ttl).await?;
        for key in keys {
            self.remember(collection, key, EntryLocation::Current);
        }
        Ok(())
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(collection, key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.lookup(collection, key).await?);
        }
        Ok(results)
    }

    async fn collections(&self, limit: Option<usize>) -> KvResult<Vec<String>> {
        let mut names = self.current.collections(limit).await?;
        for name in self.legacy.collections(limit).await? {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }

    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        let mut keys = self.current.keys(collection, limit).await?;
        for key in self.legacy.keys(collection, limit).await? {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn destroy_collection(&self, collection: Option<&str>) -> KvResult<bool> {
        let from_current = self.current.destroy_collection(collection).await?;
        let from_legacy = self.legacy.destroy_collection(collection).await?;
        Ok(from_current || from_legacy)
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        let from_current = self.current.destroy_store().await?;
        let from_legacy = self.legacy.destroy_store().await?;
        Ok(from_current || from_legacy)
    }

    async fn cull(&self) -> KvResult<()> {
        self.current.cull().await?;
        self.legacy.cull().await
    }

    async fn close(&self) -> KvResult<()> {
        self.current.close().await?;
        self.legacy.close().await
    }

    fn capabilities(&self) -> Capabilities {
        let current = self.current.capabilities();
        let legacy = self.legacy.capabilities();
        Capabilities {
            enumerate_collections: current.enumerate_collections && legacy.enumerate_collections,
            enumerate_keys: current.enumerate_keys && legacy.enumerate_keys,
            destroy_collection: current.destroy_collection && legacy.destroy_collection,
            destroy_store: current.destroy_store && legacy.destroy_store,
            native_ttl: current.native_ttl,
            cull: current.cull && legacy.cull,
            stable_api: current.stable_api && legacy.stable_api,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::stores::MemoryStore;
    use crate::wrappers::StatisticsWrapper;

    fn value(v: serde_json::Value) -> ValueMap {
        let serde_json::Value::Object(map) = v else {
            panic!("expected object")
        };
        map
    }

    #[tokio::test]
    async fn reads_find_data_in_either_store() {
        let wrapper =
            SanitizationMigrationWrapper::new(MemoryStore::in_memory(), MemoryStore::in_memory());

        wrapper
            .current()
            .put(Some("d"), "new", value(json!({"data": "current"})), None)
            .await
            .unwrap();
        wrapper
            .legacy()
            .put(Some("d"), "old", value(json!({"data": "legacy"})), None)
            .await
            .unwrap();

        assert_eq!(
            wrapper.get(Some("d"), "new").await.unwrap(),
            Some(value(json!({"data": "current"})))
        );
        assert_eq!(
            wrapper.get(Some("d"), "old").await.unwrap(),
            Some(value(json!({"data": "legacy"})))
        );
        assert!(wrapper.get(Some("d"), "missing").await.unwrap().is_none());

        // Without migrate-on-read the legacy entry stays where it was.
        assert!(wrapper.current().get(Some("d"), "old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn migrate_on_read_copies_and_preserves_remaining_ttl() {
        let wrapper =
            SanitizationMigrationWrapper::new(MemoryStore::in_memory(), MemoryStore::in_memory())
                .with_migrate_on_read();

        wrapper
            .legacy()
            .put(Some("d"), "k", value(json!({"n": 1})), Some(3600.0))
            .await
            .unwrap();

        assert_eq!(
            wrapper.get(Some("d"), "k").await.unwrap(),
            Some(value(json!({"n": 1})))
        );

        // Copied into current with a TTL no longer than the original.
        let (migrated, remaining) = wrapper.current().ttl(Some("d"), "k").await.unwrap();
        assert!(migrated.is_some());
        assert!(remaining.unwrap() <= 3600.0);

        // Legacy copy survives without delete-after-migration.
        assert!(wrapper.legacy().get(Some("d"), "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_after_migration_removes_the_legacy_copy() {
        let wrapper =
            SanitizationMigrationWrapper::new(MemoryStore::in_memory(), MemoryStore::in_memory())
                .with_migrate_on_read()
                .with_delete_after_migration();

        wrapper
            .legacy()
            .put(Some("d"), "k", value(json!({"n": 1})), None)
            .await
            .unwrap();

        assert!(wrapper.get(Some("d"), "k").await.unwrap().is_some());
        assert!(wrapper.legacy().get(Some("d"), "k").await.unwrap().is_none());
        assert!(wrapper.current().get(Some("d"), "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cache_skips_the_double_lookup_on_repeat_reads() {
        let current = StatisticsWrapper::new(MemoryStore::in_memory());
        let legacy = MemoryStore::in_memory();
        legacy
            .put(Some("d"), "k", value(json!({"n": 1})), None)
            .await
            .unwrap();

        let wrapper = SanitizationMigrationWrapper::new(current, legacy);

        // First read misses current, hits legacy, caches the location.
        assert!(wrapper.get(Some("d"), "k").await.unwrap().is_some());
        assert_eq!(
            wrapper.cached_location(Some("d"), "k"),
            Some(EntryLocation::Legacy)
        );
        assert_eq!(wrapper.current().snapshot("d").ttl.count, 1);

        // Second read goes straight to legacy.
        assert!(wrapper.get(Some("d"), "k").await.unwrap().is_some());
        assert_eq!(wrapper.current().snapshot("d").ttl.count, 1);
    }

    #[tokio::test]
    async fn negative_results_are_cached_and_invalidated_by_writes() {
        let wrapper =
            SanitizationMigrationWrapper::new(MemoryStore::in_memory(), MemoryStore::in_memory());

        assert!(wrapper.get(Some("d"), "k").await.unwrap().is_none());
        assert_eq!(
            wrapper.cached_location(Some("d"), "k"),
            Some(EntryLocation::Missing)
        );

        wrapper.put(Some("d"), "k", value(json!({"n": 1})), None).await.unwrap();
        assert_eq!(
            wrapper.cached_location(Some("d"), "k"),
            Some(EntryLocation::Current)
        );
        assert!(wrapper.get(Some("d"), "k").await.unwrap().is_some());

        assert!(wrapper.delete(Some("d"), "k").await.unwrap());
        assert!(wrapper.get(Some("d"), "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_is_size_bounded() {
        let wrapper = SanitizationMigrationWrapper::with_cache_size(
            MemoryStore::in_memory(),
            MemoryStore::in_memory(),
            16,
        );
        for i in 0..200 {
            let _ = wrapper.get(Some("d"), &format!("k{i}")).await.unwrap();
        }
        assert!(wrapper.cache.len() <= 16);
    }

    #[tokio::test]
    async fn enumeration_is_the_union_of_both_stores() {
        let wrapper =
            SanitizationMigrationWrapper::new(MemoryStore::in_memory(), MemoryStore::in_memory());
        wrapper.current().put(Some("d"), "a", value(json!({})), None).await.unwrap();
        wrapper.legacy().put(Some("d"), "b", value(json!({})), None).await.unwrap();
        wrapper.legacy().put(Some("e"), "c", value(json!({})), None).await.unwrap();

        let mut keys = wrapper.keys(Some("d"), None).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        let mut collections = wrapper.collections(None).await.unwrap();
        collections.sort();
        assert_eq!(collections, vec!["d", "e"]);
    }
}
