//! Logging wrapper.
//!
//! Emits a `tracing` event before and after every operation, carrying the
//! operation name, collection, key, and outcome (hit/miss/deleted/count).
//! The event level is chosen at construction. Behavior is never altered;
//! errors are logged and propagated untouched.

use async_trait::async_trait;
use keygrid_core::{KvResult, ValueMap};
use tracing::Level;

use crate::store::{resolve_collection, Capabilities, KeyValueStore};

/// Logs every operation and its outcome.
pub struct LoggingWrapper<S> {
    inner: S,
    level: Level,
}

impl<S: KeyValueStore> LoggingWrapper<S> {
    /// Wraps `inner`, logging at `DEBUG`.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self::with_level(inner, Level::DEBUG)
    }

    /// Wraps `inner`, logging at the given level.
    #[must_use]
    pub fn with_level(inner: S, level: Level) -> Self {
        Self { inner, level }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn emit(&self, operation: &'static str, collection: &str, key: &str, outcome: &str) {
        // `tracing` requires a const level per event; dispatch over the
        // configured one.
        match self.level {
            Level::ERROR => tracing::error!(operation, collection, key, outcome, "kv"),
            Level::WARN => tracing::warn!(operation, collection, key, outcome, "kv"),
            Level::INFO => tracing::info!(operation, collection, key, outcome, "kv"),
            Level::DEBUG => tracing::debug!(operation, collection, key, outcome, "kv"),
            Level::TRACE => tracing::trace!(operation, collection, key, outcome, "kv"),
        }
    }

    fn observe<T>(
        &self,
        operation: &'static str,
        collection: Option<&str>,
        key: &str,
        result: &KvResult<T>,
        describe: impl FnOnce(&T) -> String,
    ) {
        let collection = resolve_collection(collection);
        match result {
            Ok(value) => self.emit(operation, collection, key, &describe(value)),
            Err(err) => self.emit(operation, collection, key, &format!("error: {err}")),
        }
    }

    fn started(&self, operation: &'static str, collection: Option<&str>, key: &str) {
        self.emit(operation, resolve_collection(collection), key, "started");
    }
}

fn describe_option(value: &Option<ValueMap>) -> String {
    if value.is_some() { "hit" } else { "miss" }.to_string()
}

fn describe_ttl(result: &(Option<ValueMap>, Option<f64>)) -> String {
    match result {
        (Some(_), Some(ttl)) => format!("hit ttl={ttl:.1}s"),
        (Some(_), None) => "hit no-ttl".to_string(),
        _ => "miss".to_string(),
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for LoggingWrapper<S> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        self.started("get", collection, key);
        let result = self.inner.get(collection, key).await;
        self.observe("get", collection, key, &result, describe_option);
        result
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.started("put", collection, key);
        let result = self.inner.put(collection, key, value, ttl).await;
        self.observe("put", collection, key, &result, |()| "ok".to_string());
        result
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.started("delete", collection, key);
        let result = self.inner.delete(collection, key).await;
        self.observe("delete", collection, key, &result, |deleted| {
            format!("deleted={deleted}")
        });
        result
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        self.started("ttl", collection, key);
        let result = self.inner.ttl(collection, key).await;
        self.observe("ttl", collection, key, &result, describe_ttl);
        result
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.started("exists", collection, key);
        let result = self.inner.exists(collection, key).await;
        self.observe("exists", collection, key, &result, |found| {
            format!("exists={found}")
        });
        result
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        self.started("get_many", collection, "*");
        let result = self.inner.get_many(collection, keys).await;
        self.observe("get_many", collection, "*", &result, |values| {
            let hits = values.iter().filter(|value| value.is_some()).count();
            format!("hits={hits}/{}", values.len())
        });
        result
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.started("put_many", collection, "*");
        let count = keys.len();
        let result = self.inner.put_many(collection, keys, values, ttl).await;
        self.observe("put_many", collection, "*", &result, |()| {
            format!("count={count}")
        });
        result
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        self.started("delete_many", collection, "*");
        let result = self.inner.delete_many(collection, keys).await;
        self.observe("delete_many", collection, "*", &result, |deleted| {
            format!("deleted={deleted}")
        });
        result
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        self.started("ttl_many", collection, "*");
        let result = self.inner.ttl_many(collection, keys).await;
        self.observe("ttl_many", collection, "*", &result, |results| {
            let hits = results.iter().filter(|(value, _)| value.is_some()).count();
            format!("hits={hits}/{}", results.len())
        });
        result
    }

    async fn collections(&self, limit: Option<usize>) -> KvResult<Vec<String>> {
        let result = self.inner.collections(limit).await;
        self.observe("collections", None, "*", &result, |names| {
            format!("count={}", names.len())
        });
        result
    }

    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        let result = self.inner.keys(collection, limit).await;
        self.observe("keys", collection, "*", &result, |keys| {
            format!("count={}", keys.len())
        });
        result
    }

    async fn destroy_collection(&self, collection: Option<&str>) -> KvResult<bool> {
        let result = self.inner.destroy_collection(collection).await;
        self.observe("destroy_collection", collection, "*", &result, |removed| {
            format!("removed={removed}")
        });
        result
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        let result = self.inner.destroy_store().await;
        self.observe("destroy_store", None, "*", &result, |removed| {
            format!("removed={removed}")
        });
        result
    }

    async fn cull(&self) -> KvResult<()> {
        let result = self.inner.cull().await;
        self.observe("cull", None, "*", &result, |()| "ok".to_string());
        result
    }

    async fn close(&self) -> KvResult<()> {
        let result = self.inner.close().await;
        self.observe("close", None, "*", &result, |()| "ok".to_string());
        result
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }
}

#[cfg(test)]
mod tests {
    use keygrid_core::KvError;
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
    async fn behavior_is_unchanged() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let store = LoggingWrapper::with_level(MemoryStore::in_memory(), Level::INFO);

        store.put(Some("t"), "k", value(json!({"a": 1})), None).await.unwrap();
        assert_eq!(
            store.get(Some("t"), "k").await.unwrap(),
            Some(value(json!({"a": 1})))
        );
        assert!(store.get(Some("t"), "missing").await.unwrap().is_none());
        assert!(store.delete(Some("t"), "k").await.unwrap());

        let err = store
            .put(Some("t"), "k", value(json!({})), Some(-1.0))
            .await;
        assert!(matches!(err, Err(KvError::InvalidTtl { .. })));
    }

    #[tokio::test]
    async fn batch_paths_log_and_delegate() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let store = LoggingWrapper::new(MemoryStore::in_memory());
        let keys = vec!["a".to_string(), "b".to_string()];
        store
            .put_many(Some("t"), &keys, vec![value(json!({})), value(json!({}))], None)
            .await
            .unwrap();
        let results = store.get_many(Some("t"), &keys).await.unwrap();
        assert!(results.iter().all(Option::is_some));
    }
}
