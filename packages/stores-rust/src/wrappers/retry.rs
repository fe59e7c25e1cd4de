//! Retry wrapper.
//!
//! Retries operations that fail with a configured transient error kind, up
//! to `max_retries` additional attempts with exponential backoff starting
//! at `initial_delay`. Errors outside the predicate propagate immediately.
//! Each attempt gets the backend's full timeout; the wrapper never
//! stretches or divides timeouts across attempts.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use keygrid_core::{KvResult, ValueMap};
use tracing::debug;

use super::{transient_errors, ErrorPredicate};
use crate::store::{Capabilities, KeyValueStore};

/// Retry policy.
#[derive(Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per attempt.
    pub initial_delay: Duration,
    /// Which errors are worth retrying.
    pub predicate: ErrorPredicate,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            predicate: transient_errors(),
        }
    }
}

/// Retries transient failures with exponential backoff.
pub struct RetryWrapper<S> {
    inner: S,
    config: RetryConfig,
}

impl<S: KeyValueStore> RetryWrapper<S> {
    /// Wraps `inner` with the default policy (3 retries from 100ms,
    /// transient errors only).
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, RetryConfig::default())
    }

    /// Wraps `inner` with an explicit policy.
    #[must_use]
    pub fn with_config(inner: S, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn run<T, F, Fut>(&self, operation_name: &'static str, operation: F) -> KvResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = KvResult<T>> + Send,
    {
        let mut attempt: u32 = 0;
        let mut delay = self.config.initial_delay;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.config.max_retries && (self.config.predicate)(&err) => {
                    attempt += 1;
                    debug!(
                        operation = operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for RetryWrapper<S> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        self.run("get", || self.inner.get(collection, key)).await
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.run("put", || {
            self.inner.put(collection, key, value.clone(), ttl)
        })
        .await
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.run("delete", || self.inner.delete(collection, key))
            .await
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        self.run("ttl", || self.inner.ttl(collection, key)).await
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.run("exists", || self.inner.exists(collection, key))
            .await
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        self.run("get_many", || self.inner.get_many(collection, keys))
            .await
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.run("put_many", || {
            self.inner.put_many(collection, keys, values.clone(), ttl)
        })
        .await
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        self.run("delete_many", || self.inner.delete_many(collection, keys))
            .await
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        self.run("ttl_many", || self.inner.ttl_many(collection, keys))
            .await
    }

    async fn collections(&self, limit: Option<usize>) -> KvResult<Vec<String>> {
        self.run("collections", || self.inner.collections(limit))
            .await
    }

    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        self.run("keys", || self.inner.keys(collection, limit)).await
    }

    async fn destroy_collection(&self, collection: Option<&str>) -> KvResult<bool> {
        self.run("destroy_collection", || {
            self.inner.destroy_collection(collection)
        })
        .await
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        self.run("destroy_store", || self.inner.destroy_store())
            .await
    }

    async fn cull(&self) -> KvResult<()> {
        self.run("cull", || self.inner.cull()).await
    }

    async fn close(&self) -> KvResult<()> {
        self.inner.close().await
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }
}
