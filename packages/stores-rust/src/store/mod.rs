//! The uniform store contract.
//!
//! Defines the trait hierarchy for the two-layer store architecture:
//!
//! - [`KeyValueStore`]: the public operational contract that users and
//!   wrappers see -- point operations, batch operations, enumeration,
//!   destroy, lifecycle, and capability advertisement
//! - [`StoreBackend`] ([`backend`]): the primitives a concrete backend
//!   implements, with default batch fan-out over the singular forms
//! - [`BackendStore`] ([`base`]): the generic orchestrator implementing
//!   [`KeyValueStore`] over any backend, owning setup-once, sanitization,
//!   TTL validation, and expired-entry filtering

pub mod backend;
pub mod base;

use std::sync::Arc;

use async_trait::async_trait;
use keygrid_core::{KvError, KvResult, ValueMap};

pub use backend::StoreBackend;
pub use base::BackendStore;

/// Collection used when the caller passes none.
pub const DEFAULT_COLLECTION: &str = "default";

/// Default page size for enumeration operations.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// Hard cap on enumeration page size.
pub const PAGE_LIMIT: usize = 10_000;

/// Resolves an optional user collection to the effective collection name.
#[must_use]
pub fn resolve_collection(collection: Option<&str>) -> &str {
    collection.unwrap_or(DEFAULT_COLLECTION)
}

/// Clamps an optional enumeration limit to the page cap.
#[must_use]
pub fn effective_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).min(PAGE_LIMIT)
}

/// Optional capabilities advertised per store.
///
/// Callers use these to skip unsupported operations or pick alternative
/// code paths; invoking an unadvertised operation fails with
/// [`KvError::UnsupportedOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// `collections()` is implemented.
    pub enumerate_collections: bool,
    /// `keys()` is implemented.
    pub enumerate_keys: bool,
    /// `destroy_collection()` is implemented.
    pub destroy_collection: bool,
    /// `destroy_store()` is implemented.
    pub destroy_store: bool,
    /// The backend expires entries itself; the store still filters on read.
    pub native_ttl: bool,
    /// `cull()` proactively deletes expired entries.
    pub cull: bool,
    /// The backend integration is considered stable.
    pub stable_api: bool,
}

/// Records whether a backend client was created by the store or handed in
/// by the caller.
///
/// `close()` tears down only [`ClientSource::Owned`] resources; provided
/// clients remain the caller's to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSource {
    /// The store created the client and closes it on `close()`.
    Owned,
    /// The caller provided the client and retains ownership.
    Provided,
}

impl ClientSource {
    /// Whether the store owns (and must tear down) the client.
    #[must_use]
    pub fn is_owned(self) -> bool {
        matches!(self, Self::Owned)
    }
}

/// The uniform, polymorphic key-value contract.
///
/// Every backend and every wrapper satisfies this trait with identical
/// observable semantics: expired entries are invisible, batched operations
/// are order- and size-preserving over their inputs, and a single corrupt
/// record reads as a miss rather than an error.
///
/// Used as a generic bound by wrappers and as `Arc<dyn KeyValueStore>` for
/// heterogeneous composition.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value at `(collection, key)` if present and not expired.
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>>;

    /// Stores `value` at `(collection, key)`, overwriting any existing
    /// entry. A positive `ttl` in seconds expires the entry; `None` stores
    /// without expiration.
    ///
    /// # Errors
    ///
    /// [`KvError::InvalidTtl`] when `ttl <= 0` or is not finite.
    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()>;

    /// Removes the entry at `(collection, key)`. Returns whether an entry
    /// was removed.
    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool>;

    /// Returns `(value, remaining_ttl_seconds)` if present and not expired,
    /// `(None, None)` otherwise. A hit without expiration yields
    /// `(Some(value), None)`.
    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)>;

    /// Whether an unexpired entry exists at `(collection, key)`.
    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        Ok(self.get(collection, key).await?.is_some())
    }

    /// Batch get; the result is aligned to `keys` with misses as `None`.
    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>>;

    /// Batch put; all entries share one `ttl`, one `created_at`, and one
    /// `expires_at`.
    ///
    /// # Errors
    ///
    /// [`KvError::MismatchedLengths`] when `keys` and `values` differ in
    /// length.
    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()>;

    /// Batch delete; returns the count of entries actually removed.
    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize>;

    /// Batch ttl; order-preserving, misses are `(None, None)`.
    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>>;

    /// Enumerates collection names, up to `limit` (default and cap
    /// [`PAGE_LIMIT`]).
    async fn collections(&self, limit: Option<usize>) -> KvResult<Vec<String>> {
        let _ = limit;
        Err(KvError::UnsupportedOperation {
            operation: "collections",
        })
    }

    /// Enumerates keys in a collection, up to `limit`.
    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        let _ = (collection, limit);
        Err(KvError::UnsupportedOperation { operation: "keys" })
    }

    /// Removes every key in one collection. Returns whether anything was
    /// removed. Explicitly non-atomic.
    async fn destroy_collection(&self, collection: Option<&str>) -> KvResult<bool> {
        let _ = collection;
        Err(KvError::UnsupportedOperation {
            operation: "destroy_collection",
        })
    }

    /// Removes all data across all collections.
    async fn destroy_store(&self) -> KvResult<bool> {
        Err(KvError::UnsupportedOperation {
            operation: "destroy_store",
        })
    }

    /// Proactively deletes expired entries (backends without native TTL).
    async fn cull(&self) -> KvResult<()> {
        Err(KvError::UnsupportedOperation { operation: "cull" })
    }

    /// Releases resources. Subsequent data operations fail with
    /// [`KvError::StoreClosed`]. Close errors are logged and swallowed.
    async fn close(&self) -> KvResult<()> {
        Ok(())
    }

    /// The optional capabilities this store implements.
    fn capabilities(&self) -> Capabilities;
}

/// Shared stores compose: wrapping an `Arc<S>` delegates to the inner store.
#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, collection: Option<&str>, key: &str) -> KvResult<Option<ValueMap>> {
        (**self).get(collection, key).await
    }

    async fn put(
        &self,
        collection: Option<&str>,
        key: &str,
        value: ValueMap,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        (**self).put(collection, key, value, ttl).await
    }

    async fn delete(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        (**self).delete(collection, key).await
    }

    async fn ttl(
        &self,
        collection: Option<&str>,
        key: &str,
    ) -> KvResult<(Option<ValueMap>, Option<f64>)> {
        (**self).ttl(collection, key).await
    }

    async fn exists(&self, collection: Option<&str>, key: &str) -> KvResult<bool> {
        (**self).exists(collection, key).await
    }

    async fn get_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<Option<ValueMap>>> {
        (**self).get_many(collection, keys).await
    }

    async fn put_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
        values: Vec<ValueMap>,
        ttl: Option<f64>,
    ) -> KvResult<()> {
        (**self).put_many(collection, keys, values, ttl).await
    }

    async fn delete_many(&self, collection: Option<&str>, keys: &[String]) -> KvResult<usize> {
        (**self).delete_many(collection, keys).await
    }

    async fn ttl_many(
        &self,
        collection: Option<&str>,
        keys: &[String],
    ) -> KvResult<Vec<(Option<ValueMap>, Option<f64>)>> {
        (**self).ttl_many(collection, keys).await
    }

    async fn collections(&self, limit: Option<usize>) -> KvResult<Vec<String>> {
        (**self).collections(limit).await
    }

    async fn keys(&self, collection: Option<&str>, limit: Option<usize>) -> KvResult<Vec<String>> {
        (**self).keys(collection, limit).await
    }

    async fn destroy_collection(&self, collection: Option<&str>) -> KvResult<bool> {
        (**self).destroy_collection(collection).await
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        (**self).destroy_store().await
    }

    async fn cull(&self) -> KvResult<()> {
        (**self).cull().await
    }

    async fn close(&self) -> KvResult<()> {
        (**self).close().await
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }
}
