//! Distributed cache store over Redis.
//!
//! Entries live under the compound key `collection::key` as full-JSON
//! envelope strings. TTLs map to Redis's native expiry (`SET .. EX`), so
//! the server reclaims expired entries on its own; the store still filters
//! on read like every other backend. Batch reads use `MGET`, batch writes
//! a pipeline (plain `MSET` when no TTL is involved), and key enumeration
//! a single `SCAN MATCH collection::*` page.
//!
//! The multiplexed connection is designed to be cloned cheaply; every
//! clone shares one TCP connection, so there is nothing for `close()` to
//! tear down regardless of whether the connection was provided or opened
//! from a URL.

use async_trait::async_trait;
use keygrid_core::compound::{compound_key, compound_prefix, key_from_compound_key};
use keygrid_core::{
    FullJsonAdapter, KvError, KvResult, ManagedEntry, SerializationAdapter, StorageDatum,
};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::warn;

use crate::store::{BackendStore, Capabilities, StoreBackend};

/// Distributed cache [`StoreBackend`] over Redis.
pub struct RedisBackend {
    conn: MultiplexedConnection,
    adapter: FullJsonAdapter,
}

impl RedisBackend {
    /// Connects to a Redis URL (`redis://host:port/db`).
    ///
    /// # Errors
    ///
    /// [`KvError::Connection`] when the server is unreachable.
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = redis::Client::open(url).map_err(|err| KvError::Connection {
            reason: format!("invalid redis url: {err}"),
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| KvError::Connection {
                reason: format!("cannot connect to redis: {err}"),
            })?;
        Ok(Self::with_connection(conn))
    }

    /// Wraps an existing multiplexed connection.
    #[must_use]
    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            adapter: FullJsonAdapter,
        }
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    fn decode(&self, collection: &str, key: &str, raw: String) -> Option<ManagedEntry> {
        match self.adapter.from_storage(StorageDatum::Text(raw)) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(collection, key, error = %err, "skipping undecodable redis entry");
                None
            }
        }
    }

    fn encode(&self, key: &str, entry: &ManagedEntry) -> KvResult<String> {
        match self.adapter.to_storage(key, entry, None)? {
            StorageDatum::Text(text) => Ok(text),
            StorageDatum::Document(_) => {
                Err(KvError::serialization("expected a text storage form"))
            }
        }
    }

    /// Redis rejects expiries below one second.
    fn expiry_seconds(entry: &ManagedEntry) -> Option<u64> {
        entry.ttl().map(|ttl| {
            let rounded = ttl.ceil();
            if rounded < 1.0 { 1 } else { rounded as u64 }
        })
    }
}

#[async_trait]
impl StoreBackend for RedisBackend {
    async fn get_entry(&self, collection: &str, key: &str) -> KvResult<Option<ManagedEntry>> {
        let compound = compound_key(collection, key);
        let raw: Option<String> = self
            .conn()
            .get(&compound)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(raw.and_then(|raw| self.decode(collection, key, raw)))
    }

    async fn put_entry(&self, collection: &str, key: &str, entry: &ManagedEntry) -> KvResult<()> {
        let compound = compound_key(collection, key);
        let json = self.encode(key, entry)?;
        let mut conn = self.conn();
        match Self::expiry_seconds(entry) {
            Some(seconds) => conn
                .set_ex::<_, _, ()>(&compound, json, seconds)
                .await
                .map_err(anyhow::Error::from)?,
            None => conn
                .set::<_, _, ()>(&compound, json)
                .await
                .map_err(anyhow::Error::from)?,
        }
        Ok(())
    }

    async fn delete_entry(&self, collection: &str, key: &str) -> KvResult<bool> {
        let compound = compound_key(collection, key);
        let removed: i64 = self
            .conn()
            .del(&compound)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(removed != 0)
    }

    async fn get_entries(
        &self,
        collection: &str,
        keys: &[String],
    ) -> KvResult<Vec<Option<ManagedEntry>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let compounds: Vec<String> = keys
            .iter()
            .map(|key| compound_key(collection, key))
            .collect();
        let raw: Vec<Option<String>> = self
            .conn()
            .mget(&compounds)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(raw
            .into_iter()
            .zip(keys)
            .map(|(raw, key)| raw.and_then(|raw| self.decode(collection, key, raw)))
            .collect())
    }

    async fn put_entries(
        &self,
        collection: &str,
        keys: &[String],
        entries: &[ManagedEntry],
    ) -> KvResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (key, entry) in keys.iter().zip(entries) {
            let compound = compound_key(collection, key);
            let json = self.encode(key, entry)?;
            match Self::expiry_seconds(entry) {
                Some(seconds) => {
                    pipe.set_ex(&compound, json, seconds).ignore();
                }
                None => {
                    pipe.set(&compound, json).ignore();
                }
            }
        }
        pipe.query_async::<()>(&mut self.conn())
            .await
            .map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn delete_entries(&self, collection: &str, keys: &[String]) -> KvResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let compounds: Vec<String> = keys
            .iter()
            .map(|key| compound_key(collection, key))
            .collect();
        let removed: i64 = self
            .conn()
            .del(&compounds)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(usize::try_from(removed).unwrap_or(0))
    }

    async fn collection_keys(&self, collection: &str, limit: usize) -> KvResult<Vec<String>> {
        let pattern = format!("{}*", compound_prefix(collection));
        let (_cursor, found): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(0)
            .arg("MATCH")
            .arg(&pattern)
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut self.conn())
            .await
            .map_err(anyhow::Error::from)?;
        Ok(found
            .iter()
            .filter_map(|compound| key_from_compound_key(compound, collection))
            .take(limit)
            .collect())
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        redis::cmd("FLUSHDB")
            .query_async::<()>(&mut self.conn())
            .await
            .map_err(anyhow::Error::from)?;
        Ok(true)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            enumerate_collections: false,
            enumerate_keys: true,
            destroy_collection: false,
            destroy_store: true,
            native_ttl: true,
            cull: false,
            stable_api: true,
        }
    }
}

/// Redis-backed key-value store.
pub type RedisStore = BackendStore<RedisBackend>;

impl BackendStore<RedisBackend> {
    /// Connects to a Redis URL.
    ///
    /// # Errors
    ///
    /// [`KvError::Connection`] when the server is unreachable.
    pub async fn open_redis(url: &str) -> KvResult<Self> {
        Ok(Self::new(RedisBackend::connect(url).await?))
    }
}

// These tests require a live server; run with
// `cargo test --features redis -- --ignored` against a local Redis.
#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::KeyValueStore;

    const TEST_URL: &str = "redis://127.0.0.1:6379/0";

    fn value(v: serde_json::Value) -> keygrid_core::ValueMap {
        let serde_json::Value::Object(map) = v else {
            panic!("expected object")
        };
        map
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn round_trip_with_native_ttl() {
        let store = RedisStore::open_redis(TEST_URL).await.unwrap();
        store
            .put(Some("kg-test"), "k", value(json!({"a": 1})), Some(60.0))
            .await
            .unwrap();

        let (found, remaining) = store.ttl(Some("kg-test"), "k").await.unwrap();
        assert_eq!(found, Some(value(json!({"a": 1}))));
        assert!(remaining.unwrap() > 58.0);

        assert!(store.delete(Some("kg-test"), "k").await.unwrap());
        assert!(!store.delete(Some("kg-test"), "k").await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires a running redis server"]
    async fn batch_round_trip_and_scan() {
        let store = RedisStore::open_redis(TEST_URL).await.unwrap();
        let keys: Vec<String> = (0..4).map(|i| format!("mk{i}")).collect();
        let values: Vec<_> = (0..4).map(|i| value(json!({"i": i}))).collect();
        store
            .put_many(Some("kg-batch"), &keys, values, Some(60.0))
            .await
            .unwrap();

        let results = store.get_many(Some("kg-batch"), &keys).await.unwrap();
        assert!(results.iter().all(Option::is_some));

        let mut scanned = store.keys(Some("kg-batch"), None).await.unwrap();
        scanned.sort();
        assert_eq!(scanned, keys);

        assert_eq!(
            store.delete_many(Some("kg-batch"), &keys).await.unwrap(),
            4
        );
    }
}
