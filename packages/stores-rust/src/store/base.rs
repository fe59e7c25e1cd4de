//! Generic store orchestrator.
//!
//! [`BackendStore`] implements the full [`KeyValueStore`] contract over any
//! [`StoreBackend`], owning everything that must behave identically across
//! backends: setup-once (global and per-collection), sanitization,
//! TTL validation, expired-entry filtering, batch alignment, the
//! decode-failure-is-a-miss policy, and the closed-store guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use keygrid_core::entry::ttl_duration;
use keygrid_core::{KvError, KvResult, ManagedEntry, SanitizationStrategy, ValueMap};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{effective_limit, resolve_collection, Capabilities, KeyValueStore, StoreBackend};

/// Orchestrates one backend into a full [`KeyValueStore`].
///
/// Concrete stores are type aliases over this: `MemoryStore =
/// BackendStore<MemoryBackend>` and so on. The backend only sees sanitized
/// identifiers and whole [`ManagedEntry`] values.
pub struct BackendStore<B> {
    backend: B,
    key_strategy: SanitizationStrategy,
    collection_strategy: SanitizationStrategy,
    setup_once: OnceCell<()>,
    setup_failed: AtomicBool,
    collection_setups: DashMap<String, Arc<OnceCell<()>>>,
    closed: AtomicBool,
}

impl<B: StoreBackend> BackendStore<B> {
    /// Wraps a backend with its default sanitization strategies.
    #[must_use]
    pub fn new(backend: B) -> Self {
        let key_strategy = backend.default_key_strategy();
        let collection_strategy = backend.default_collection_strategy();
        Self {
            backend,
            key_strategy,
            collection_strategy,
            setup_once: OnceCell::new(),
            setup_failed: AtomicBool::new(false),
            collection_setups: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Overrides the sanitization strategies (user-selectable per store).
    #[must_use]
    pub fn with_strategies(
        mut self,
        key_strategy: SanitizationStrategy,
        collection_strategy: SanitizationStrategy,
    ) -> Self {
        self.key_strategy = key_strategy;
        self.collection_strategy = collection_strategy;
        self
    }

    /// Direct access to the backend (inspection in tests, native handles).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Validates and sanitizes a user collection name.
    fn prepare_collection(&self, collection: Option<&str>) -> KvResult<String> {
        let collection = resolve_collection(collection);
        self.collection_strategy.validate(collection)?;
        Ok(self.collection_strategy.sanitize(collection))
    }

    /// Validates and sanitizes a user key.
    fn prepare_key(&self, key: &str) -> KvResult<String> {
        self.key_strategy.validate(key)?;
        Ok(self.key_strategy.sanitize(key))
    }

    /// Guards against closed/failed stores and runs global setup at most
    /// once, with concurrent callers awaiting the same completion.
    async fn ensure_setup(&self) -> KvResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KvError::StoreClosed);
        }
        if self.setup_failed.load(Ordering::Acquire) {
            return Err(KvError::SetupFailed {
                reason: "a previous setup attempt failed; create a new store instance".to_string(),
            });
        }

        self.setup_once
            .get_or_try_init(|| async {
                self.backend.setup().await.map_err(|err| {
                    self.setup_failed.store(true, Ordering::Release);
                    match err {
                        failure @ KvError::SetupFailed { .. } => failure,
                        other => KvError::SetupFailed {
                            reason: other.to_string(),
                        },
                    }
                })
            })
            .await?;
        Ok(())
    }

    /// [`Self::ensure_setup`] plus at-most-once per-collection setup.
    async fn ensure_ready(&self, collection: &str) -> KvResult<()> {
        self.ensure_setup().await?;

        let cell = self
            .collection_setups
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        cell.get_or_try_init(|| self.backend.setup_collection(collection))
            .await?;
        Ok(())
    }

    /// Fetches an entry, applying the corrupt-record-is-a-miss policy and
    /// expiry filtering.
    async fn load_entry(&self, collection: &str, key: &str) -> KvResult<Option<ManagedEntry>> {
        match self.backend.get_entry(collection, key).await {
            Ok(Some(entry)) if entry.is_expired() => Ok(None),
            Ok(entry) => Ok(entry),
            Err(KvError::Deserialization { reason }) => {
                warn!(collection, key, %reason, "treating undecodable entry as a miss");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn unsanitize_all(names: Vec<String>, strategy: &SanitizationStrategy) -> Vec<String> {
        names
            .into_iter()
            .map(|name| strategy.try_unsanitize(&name).unwrap_or(name))
            .collect()
    }
}

#[async_trait]
impl<B: StoreBackend> KeyValueStore for BackendStore<B> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        let collection = self.prepare_collection(collection)?;
        let key = self.prepare_key(key)?;
        self.ensure_ready(&collection).await?;
        Ok(self
            .load_entry(&collection, &key)
            .await?
            .map(|entry| entry.value))
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        let collection = self.prepare_collection(collection)?;
        let key = self.prepare_key(key)?;
        let entry = ManagedEntry::with_ttl(value, ttl)?;
        self.ensure_ready(&collection).await?;
        self.backend.put_entry(&collection, &key, &entry).await
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        let collection = self.prepare_collection(collection)?;
        let key = self.prepare_key(key)?;
        self.ensure_ready(&collection).await?;
        self.backend.delete_entry(&collection, &key).await
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        let collection = self.prepare_collection(collection)?;
        let key = self.prepare_key(key)?;
        self.ensure_ready(&collection).await?;
        match self.load_entry(&collection, &key).await? {
            Some(entry) => {
                let remaining = entry.ttl();
                Ok((Some(entry.value), remaining))
            }
            None => Ok((None, None)),
        }
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        let collection = self.prepare_collection(collection)?;
        let sanitized: Vec<String> = keys
            .iter()
            .map(|key| self.prepare_key(key))
            .collect::<KvResult<_>>()?;
        self.ensure_ready(&collection).await?;
        let entries = self.backend.get_entries(&collection, &sanitized).await?;
        Ok(entries
            .into_iter()
            .map(|entry| match entry {
                Some(entry) if entry.is_expired() => None,
                other => other.map(|entry| entry.value),
            })
            .collect())
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        if keys.len() != values.len() {
            return Err(KvError::MismatchedLengths {
                keys: keys.len(),
                values: values.len(),
            });
        }
        let collection = self.prepare_collection(collection)?;
        let sanitized: Vec<String> = keys
            .iter()
            .map(|key| self.prepare_key(key))
            .collect::<KvResult<_>>()?;

        // One created_at / expires_at pair for the whole batch.
        let now = Utc::now();
        let expires_at = match ttl {
            Some(secs) => Some(now + ttl_duration(secs)?),
            None => None,
        };
        let entries: Vec<ManagedEntry> = values
            .into_iter()
            .map(|value| ManagedEntry::from_parts(value, Some(now), expires_at))
            .collect::<KvResult<_>>()?;

        self.ensure_ready(&collection).await?;
        self.backend
            .put_entries(&collection, &sanitized, &entries)
            .await
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        let collection = self.prepare_collection(collection)?;
        let sanitized: Vec<String> = keys
            .iter()
            .map(|key| self.prepare_key(key))
            .collect::<KvResult<_>>()?;
        self.ensure_ready(&collection).await?;
        self.backend.delete_entries(&collection, &sanitized).await
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        let collection = self.prepare_collection(collection)?;
        let sanitized: Vec<String> = keys
            .iter()
            .map(|key| self.prepare_key(key))
            .collect::<KvResult<_>>()?;
        self.ensure_ready(&collection).await?;
        let entries = self.backend.get_entries(&collection, &sanitized).await?;
        Ok(entries
            .into_iter()
            .map(|entry| match entry {
                Some(entry) if entry.is_expired() => (None, None),
                Some(entry) => {
                    let remaining = entry.ttl();
                    (Some(entry.value), remaining)
                }
                None => (None, None),
            })
            .collect())
    }

    async fn collections(&self, limit: Option<usize>) -> KvResult<Vec<String>> {
        self.ensure_setup().await?;
        let names = self
            .backend
            .collection_names(effective_limit(limit))
            .await?;
        Ok(Self::unsanitize_all(names, &self.collection_strategy))
    }

    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        let collection = self.prepare_collection(collection)?;
        self.ensure_ready(&collection).await?;
        let keys = self
            .backend
            .collection_keys(&collection, effective_limit(limit))
            .await?;
        Ok(Self::unsanitize_all(keys, &self.key_strategy))
    }

    async fn destroy_collection(&self, collection: Option<&str>) -> KvResult<bool> {
        let collection = self.prepare_collection(collection)?;
        self.ensure_ready(&collection).await?;
        self.backend.destroy_collection(&collection).await
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        self.ensure_setup().await?;
        self.backend.destroy_store().await
    }

    async fn cull(&self) -> KvResult<()> {
        self.ensure_setup().await?;
        self.backend.cull().await
    }

    async fn close(&self) -> KvResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("closing store");
        if let Err(err) = self.backend.close().await {
            warn!(error = %err, "error while closing store; ignoring");
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }
}
