//! In-memory store backed by per-collection maps with a FIFO cap.
//!
//! Entries are stored as [`ManagedEntry`] values directly; there is no
//! serialization. Each collection holds at most
//! [`MemoryStoreConfig::max_entries_per_collection`] entries; inserting
//! beyond the cap evicts the oldest-inserted entry, so the store is never
//! unbounded. Expired entries are filtered on read and reclaimed by
//! [`cull`](crate::store::KeyValueStore::cull).

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;
use keygrid_core::{KvResult, ManagedEntry};
use parking_lot::Mutex;

use crate::store::{BackendStore, Capabilities, StoreBackend};

/// Construction-time configuration for [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// FIFO cap per collection; the oldest-inserted entry is evicted when
    /// an insert would exceed it.
    pub max_entries_per_collection: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_entries_per_collection: 10_000,
        }
    }
}

/// One collection's entries plus FIFO insertion order.
#[derive(Default)]
struct MemoryCollection {
    entries: HashMap<String, ManagedEntry>,
    order: VecDeque<String>,
}

impl MemoryCollection {
    fn insert(&mut self, key: String, entry: ManagedEntry, cap: usize) {
        if self.entries.insert(key.clone(), entry).is_none() {
            self.order.push_back(key);
            while self.entries.len() > cap {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.entries.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.order.retain(|existing| existing != key);
        }
        removed
    }
}

/// In-memory [`StoreBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    config: MemoryStoreConfig,
    collections: DashMap<String, Mutex<MemoryCollection>>,
}

impl MemoryBackend {
    /// Creates a backend with the default per-collection cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with an explicit configuration.
    #[must_use]
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            collections: DashMap::new(),
        }
    }

    /// Number of entries currently held in a collection (expired included).
    #[must_use]
    pub fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map_or(0, |coll| coll.lock().entries.len())
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn setup_collection(&self, collection: &str) -> KvResult<()> {
        self.collections
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn get_entry(&self, collection: &str, key: &str) -> KvResult<Option<ManagedEntry>> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|coll| coll.lock().entries.get(key).cloned()))
    }

    async fn put_entry(&self, collection: &str, key: &str, entry: &ManagedEntry) -> KvResult<()> {
        let coll = self
            .collections
            .entry(collection.to_string())
            .or_default();
        coll.lock().insert(
            key.to_string(),
            entry.clone(),
            self.config.max_entries_per_collection,
        );
        Ok(())
    }

    async fn delete_entry(&self, collection: &str, key: &str) -> KvResult<bool> {
        Ok(self
            .collections
            .get(collection)
            .is_some_and(|coll| coll.lock().remove(key)))
    }

    async fn collection_names(&self, limit: usize) -> KvResult<Vec<String>> {
        Ok(self
            .collections
            .iter()
            .map(|entry| entry.key().clone())
            .take(limit)
            .collect())
    }

    async fn collection_keys(&self, collection: &str, limit: usize) -> KvResult<Vec<String>> {
        Ok(self.collections.get(collection).map_or_else(Vec::new, |coll| {
            coll.lock().order.iter().take(limit).cloned().collect()
        }))
    }

    async fn destroy_collection(&self, collection: &str) -> KvResult<bool> {
        Ok(self.collections.remove(collection).is_some())
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        self.collections.clear();
        Ok(true)
    }

    async fn cull(&self) -> KvResult<()> {
        for coll in &self.collections {
            let mut guard = coll.lock();
            let expired: Vec<String> = guard
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_expired())
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                guard.remove(&key);
            }
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            enumerate_collections: true,
            enumerate_keys: true,
            destroy_collection: true,
            destroy_store: true,
            native_ttl: false,
            cull: true,
            stable_api: true,
        }
    }
}

/// In-memory key-value store with a FIFO cap per collection.
pub type MemoryStore = BackendStore<MemoryBackend>;

impl BackendStore<MemoryBackend> {
    /// Creates an in-memory store with default configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Creates an in-memory store with an explicit configuration.
    #[must_use]
    pub fn in_memory_with_config(config: MemoryStoreConfig) -> Self {
        Self::new(MemoryBackend::with_config(config))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::KeyValueStore;

    fn value(v: serde_json::Value) -> keygrid_core::ValueMap {
        let serde_json::Value::Object(map) = v else {
            panic!("expected object")
        };
        map
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let store = MemoryStore::in_memory();
        store
            .put(Some("users"), "alice", value(json!({"age": 30})), None)
            .await
            .unwrap();

        let fetched = store.get(Some("users"), "alice").await.unwrap();
        assert_eq!(fetched, Some(value(json!({"age": 30}))));

        assert!(store.delete(Some("users"), "alice").await.unwrap());
        assert!(!store.delete(Some("users"), "alice").await.unwrap());
        assert!(store.get(Some("users"), "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn not_unbounded() {
        let store = MemoryStore::in_memory_with_config(MemoryStoreConfig {
            max_entries_per_collection: 5,
        });
        for i in 0..20 {
            store
                .put(Some("c"), &format!("k{i}"), value(json!({"i": i})), None)
                .await
                .unwrap();
        }
        assert_eq!(store.backend().collection_len("c"), 5);
        // Oldest-inserted entries were evicted; the newest survive.
        assert!(store.get(Some("c"), "k0").await.unwrap().is_none());
        assert!(store.get(Some("c"), "k19").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn overwrite_keeps_a_single_slot() {
        let store = MemoryStore::in_memory_with_config(MemoryStoreConfig {
            max_entries_per_collection: 2,
        });
        store.put(Some("c"), "k", value(json!({"v": 1})), None).await.unwrap();
        store.put(Some("c"), "k", value(json!({"v": 2})), None).await.unwrap();
        assert_eq!(store.backend().collection_len("c"), 1);
        assert_eq!(
            store.get(Some("c"), "k").await.unwrap(),
            Some(value(json!({"v": 2})))
        );
    }

    #[tokio::test]
    async fn collections_never_alias() {
        let store = MemoryStore::in_memory();
        store.put(Some("a"), "k", value(json!({"from": "a"})), None).await.unwrap();
        store.put(Some("b"), "k", value(json!({"from": "b"})), None).await.unwrap();
        assert_eq!(
            store.get(Some("a"), "k").await.unwrap(),
            Some(value(json!({"from": "a"})))
        );
        assert_eq!(
            store.get(Some("b"), "k").await.unwrap(),
            Some(value(json!({"from": "b"})))
        );
    }

    #[tokio::test]
    async fn enumeration_lists_collections_and_keys() {
        let store = MemoryStore::in_memory();
        store.put(Some("a"), "k1", value(json!({})), None).await.unwrap();
        store.put(Some("a"), "k2", value(json!({})), None).await.unwrap();
        store.put(Some("b"), "k3", value(json!({})), None).await.unwrap();

        let mut collections = store.collections(None).await.unwrap();
        collections.sort();
        assert_eq!(collections, vec!["a", "b"]);

        let keys = store.keys(Some("a"), None).await.unwrap();
        assert_eq!(keys, vec!["k1", "k2"]);

        let limited = store.keys(Some("a"), Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn destroy_collection_and_store() {
        let store = MemoryStore::in_memory();
        store.put(Some("a"), "k", value(json!({})), None).await.unwrap();
        store.put(Some("b"), "k", value(json!({})), None).await.unwrap();

        assert!(store.destroy_collection(Some("a")).await.unwrap());
        assert!(!store.destroy_collection(Some("missing")).await.unwrap());
        assert!(store.get(Some("a"), "k").await.unwrap().is_none());

        assert!(store.destroy_store().await.unwrap());
        assert!(store.get(Some("b"), "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cull_reclaims_expired_entries() {
        let store = MemoryStore::in_memory();
        store
            .put(Some("c"), "short", value(json!({})), Some(0.05))
            .await
            .unwrap();
        store.put(Some("c"), "long", value(json!({})), None).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        store.cull().await.unwrap();

        assert_eq!(store.backend().collection_len("c"), 1);
        assert!(store.get(Some("c"), "long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn capabilities_are_advertised() {
        let store = MemoryStore::in_memory();
        let caps = store.capabilities();
        assert!(caps.enumerate_keys);
        assert!(caps.cull);
        assert!(!caps.native_ttl);
        assert!(caps.stable_api);
    }
}
