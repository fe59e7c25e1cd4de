//! Circuit breaker wrapper.
//!
//! Fails fast during backend outages. State machine:
//!
//! ```text
//! closed --N consecutive failures--> open
//! open   --recovery timeout-------> half-open (next call probes)
//! half-open --M successes---------> closed
//! half-open --any failure---------> open
//! ```
//!
//! Only errors matching the configured predicate move the state machine;
//! everything else passes through untouched. While open, operations fail
//! immediately with [`KvError::CircuitOpen`] without reaching the backend.
//! State is per-wrapper-instance and shared across all keys it serves.
//!
//! Composition with [`RetryWrapper`](super::RetryWrapper) is the user's
//! choice: retry inside the breaker trips after retries are exhausted;
//! retry outside probes again after recovery.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use keygrid_core::{KvError, KvResult, ValueMap};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{transient_errors, ErrorPredicate};
use crate::store::{Capabilities, KeyValueStore};

/// Breaker policy.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive matching failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long the circuit stays open before admitting a probe.
    pub recovery_timeout: Duration,
    /// Which errors count as failures.
    pub predicate: ErrorPredicate,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            predicate: transient_errors(),
        }
    }
}

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Operations flow through; failures are counted.
    Closed,
    /// Operations fail immediately.
    Open,
    /// Probing: operations flow through, a failure re-opens.
    HalfOpen,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// Fails fast once a backend looks down.
pub struct CircuitBreakerWrapper<S> {
    inner: S,
    config: CircuitBreakerConfig,
    breaker: Mutex<BreakerState>,
}

impl<S: KeyValueStore> CircuitBreakerWrapper<S> {
    /// Wraps `inner` with the default policy (5 failures, 2 successes,
    /// 60s recovery, transient errors).
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, CircuitBreakerConfig::default())
    }

    /// Wraps `inner` with an explicit policy.
    #[must_use]
    pub fn with_config(inner: S, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            config,
            breaker: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Current breaker position.
    pub fn state(&self) -> CircuitState {
        self.breaker.lock().state
    }

    /// Admits or rejects an operation, handling the open -> half-open
    /// transition. The decision is atomic under the state lock.
    fn admit(&self) -> KvResult<()> {
        let mut breaker = self.breaker.lock();
        match breaker.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = breaker
                    .opened_at
                    .map_or(Duration::ZERO, |opened| opened.elapsed());
                if elapsed >= self.config.recovery_timeout {
                    debug!("circuit entering half-open; admitting probe");
                    breaker.state = CircuitState::HalfOpen;
                    breaker.success_count = 0;
                    Ok(())
                } else {
                    let retry_after = self.config.recovery_timeout - elapsed;
                    Err(KvError::CircuitOpen {
                        retry_after_secs: retry_after.as_secs_f64(),
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        let mut breaker = self.breaker.lock();
        match breaker.state {
            CircuitState::Closed => breaker.failure_count = 0,
            CircuitState::HalfOpen => {
                breaker.success_count += 1;
                if breaker.success_count >= self.config.success_threshold {
                    debug!("circuit closed after successful recovery");
                    breaker.state = CircuitState::Closed;
                    breaker.failure_count = 0;
                    breaker.success_count = 0;
                    breaker.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut breaker = self.breaker.lock();
        match breaker.state {
            CircuitState::Closed => {
                breaker.failure_count += 1;
                if breaker.failure_count >= self.config.failure_threshold {
                    warn!(
                        failures = breaker.failure_count,
                        "circuit opened after consecutive failures"
                    );
                    breaker.state = CircuitState::Open;
                    breaker.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!("probe failed; circuit re-opened");
                breaker.state = CircuitState::Open;
                breaker.success_count = 0;
                breaker.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    async fn run<T, F, Fut>(&self, operation: F) -> KvResult<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = KvResult<T>> + Send,
    {
        self.admit()?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if (self.config.predicate)(&err) {
                    self.record_failure();
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for CircuitBreakerWrapper<S> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        self.run(|| self.inner.get(collection, key)).await
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.run(|| self.inner.put(collection, key, value, ttl))
            .await
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.run(|| self.inner.delete(collection, key)).await
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        self.run(|| self.inner.ttl(collection, key)).await
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        self.run(|| self.inner.exists(collection, key)).await
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        self.run(|| self.inner.get_many(collection, keys)).await
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        self.run(|| self.inner.put_many(collection, keys, values, ttl))
            .await
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        self.run(|| self.inner.delete_many(collection, keys)).await
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        self.run(|| self.inner.ttl_many(collection, keys)).await
    }

    async fn collections(&self, limit: Option<usize>) -> KvResult<Vec<String>> {
        self.run(|| self.inner.collections(limit)).await
    }

    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        self.run(|| self.inner.keys(collection, limit)).await
    }

    async fn destroy_collection(&self, collection: Option<&str>) -> KvResult<bool> {
        self.run(|| self.inner.destroy_collection(collection)).await
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        self.run(|| self.inner.destroy_store()).await
    }

    async fn cull(&self) -> KvResult<()> {
        self.run(|| self.inner.cull()).await
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
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use serde_json::json;

    use super::*;
    use crate::stores::MemoryStore;

    fn value(v: serde_json::Value) -> ValueMap {
        let serde_json::Value::Object(map) = v else {
            panic!("expected object")
        };
        map
    }

    /// Store whose failure mode can be toggled; counts backend calls.
    struct ToggleStore {
        failing: AtomicBool,
        calls: AtomicU32,
        inner: MemoryStore,
    }

    impl ToggleStore {
        fn healthy() -> Self {
            Self {
                failing: AtomicBool::new(false),
                calls: AtomicU32::new(0),
                inner: MemoryStore::in_memory(),
            }
        }

        fn failing() -> Self {
            let store = Self::healthy();
            store.failing.store(true, Ordering::SeqCst);
            store
        }

        fn check(&self) -> KvResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(KvError::Connection {
                    reason: "simulated outage".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KeyValueStore for ToggleStore {
        async fn get(&self, c: Option<&str>, k: &str) -> KvResult<Option<ValueMap>> {
            self.check()?;
            self.inner.get(c, k).await
        }

        async fn put(
            &self,
            c: Option<&str>,
            k: &str,
            v: ValueMap,
            t: Option<f64>,
        ) -> KvResult<()> {
            self.check()?;
            self.inner.put(c, k, v, t).await
        }

        async fn delete(&self, c: Option<&str>, k: &str) -> KvResult<bool> {
            self.check()?;
            self.inner.delete(c, k).await
        }

        async fn ttl(
            &self,
            c: Option<&str>,
            k: &str,
        ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
            self.check()?;
            self.inner.ttl(c, k).await
        }

        async fn get_many(&self, c: Option<&str>, k: &[String]) -> KvResult<Vec<Option<ValueMap>>> {
            self.check()?;
            self.inner.get_many(c, k).await
        }

        async fn put_many(
            &self,
            c: Option<&str>,
            k: &[String],
            v: Vec<ValueMap>,
            t: Option<f64>,
        ) -> KvResult<()> {
            self.check()?;
            self.inner.put_many(c, k, v, t).await
        }

        async fn delete_many(&self, c: Option<&str>, k: &[String]) -> KvResult<usize> {
            self.check()?;
            self.inner.delete_many(c, k).await
        }

        async fn ttl_many(
            &self,
            c: Option<&str>,
            k: &[String],
        ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
            self.check()?;
            self.inner.ttl_many(c, k).await
        }

        fn capabilities(&self) -> Capabilities {
            self.inner.capabilities()
        }
    }

    fn breaker_config(failures: u32, successes: u32, recovery: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: failures,
            success_threshold: successes,
            recovery_timeout: recovery,
            predicate: transient_errors(),
        }
    }

    #[tokio::test]
    async fn successes_keep_the_circuit_closed() {
        let store = CircuitBreakerWrapper::new(ToggleStore::healthy());
        store.put(Some("t"), "k1", value(json!({"v": 1})), None).await.unwrap();
        store.put(Some("t"), "k2", value(json!({"v": 2})), None).await.unwrap();
        store.get(Some("t"), "k1").await.unwrap();
        assert_eq!(store.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_and_fails_fast() {
        let store = CircuitBreakerWrapper::with_config(
            ToggleStore::failing(),
            breaker_config(3, 2, Duration::from_secs(60)),
        );

        for _ in 0..3 {
            let err = store.get(Some("t"), "k").await;
            assert!(matches!(err, Err(KvError::Connection { .. })));
        }
        assert_eq!(store.state(), CircuitState::Open);

        // The fourth call is rejected without touching the backend.
        let err = store.get(Some("t"), "k").await;
        assert!(matches!(err, Err(KvError::CircuitOpen { .. })));
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_reopens_the_circuit() {
        let store = CircuitBreakerWrapper::with_config(
            ToggleStore::failing(),
            breaker_config(3, 2, Duration::from_millis(100)),
        );
        for _ in 0..3 {
            let _ = store.get(Some("t"), "k").await;
        }
        assert_eq!(store.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;

        // The probe runs against the still-failing backend and re-opens.
        let err = store.get(Some("t"), "k").await;
        assert!(matches!(err, Err(KvError::Connection { .. })));
        assert_eq!(store.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_closes_after_enough_successes() {
        let store = CircuitBreakerWrapper::with_config(
            ToggleStore::failing(),
            breaker_config(3, 2, Duration::from_millis(100)),
        );
        for _ in 0..3 {
            let _ = store.get(Some("t"), "k").await;
        }
        assert_eq!(store.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;
        store.inner().failing.store(false, Ordering::SeqCst);

        // First success: still half-open.
        store.get(Some("t"), "k").await.unwrap();
        assert_eq!(store.state(), CircuitState::HalfOpen);

        // Second success closes the circuit.
        store.get(Some("t"), "k").await.unwrap();
        assert_eq!(store.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let store = CircuitBreakerWrapper::with_config(
            ToggleStore::failing(),
            breaker_config(5, 1, Duration::from_secs(60)),
        );
        for _ in 0..2 {
            let _ = store.get(Some("t"), "k").await;
        }

        store.inner().failing.store(false, Ordering::SeqCst);
        store.get(Some("t"), "k").await.unwrap();

        // Two more failures would have opened a circuit that kept its
        // old count; after the reset they do not.
        store.inner().failing.store(true, Ordering::SeqCst);
        for _ in 0..2 {
            let _ = store.get(Some("t"), "k").await;
        }
        assert_eq!(store.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn non_configured_errors_do_not_move_the_state_machine() {
        let store = CircuitBreakerWrapper::with_config(
            ToggleStore::healthy(),
            breaker_config(2, 1, Duration::from_secs(60)),
        );
        // InvalidTtl is a caller bug, not an outage.
        for _ in 0..5 {
            let err = store.put(Some("t"), "k", value(json!({})), Some(-1.0)).await;
            assert!(matches!(err, Err(KvError::InvalidTtl { .. })));
        }
        assert_eq!(store.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn all_operations_count_toward_the_breaker() {
        let store = CircuitBreakerWrapper::with_config(
            ToggleStore::failing(),
            breaker_config(2, 1, Duration::from_secs(60)),
        );
        let _ = store.put(Some("t"), "k", value(json!({})), None).await;
        let _ = store.delete(Some("t"), "k").await;
        assert_eq!(store.state(), CircuitState::Open);
    }
}
