//! `KeyGrid` Stores -- one key-value contract over heterogeneous backends.
//!
//! This crate provides the operational layer of the `KeyGrid` key-value
//! fabric:
//!
//! - **Store** ([`store`]): the [`KeyValueStore`] contract, the
//!   [`StoreBackend`] primitives each backend implements, and the
//!   [`BackendStore`] orchestrator that turns a backend into a full store
//! - **Stores** ([`stores`]): concrete backends -- in-memory, file tree,
//!   and (feature-gated) SQLite, Redis, and tantivy search
//! - **Wrappers** ([`wrappers`]): composable decorators adding TTL
//!   clamping, size limits, caching, fallback, retry, circuit breaking,
//!   encryption, versioning, statistics, logging, namespace remapping,
//!   and sanitization migration
//!
//! Every store and wrapper satisfies the same observable semantics:
//! expired entries are invisible, batched operations preserve order and
//! size, and a single corrupt record reads as a miss instead of an error.
//!
//! ```no_run
//! use keygrid_stores::store::KeyValueStore;
//! use keygrid_stores::stores::MemoryStore;
//! use keygrid_stores::wrappers::TtlClampWrapper;
//!
//! # async fn example() -> keygrid_core::KvResult<()> {
//! let store = TtlClampWrapper::new(MemoryStore::in_memory(), 60.0, 3600.0);
//! let mut value = keygrid_core::ValueMap::new();
//! value.insert("plan".into(), serde_json::Value::String("pro".into()));
//! store.put(Some("accounts"), "acme", value, Some(600.0)).await?;
//! let fetched = store.get(Some("accounts"), "acme").await?;
//! assert!(fetched.is_some());
//! # Ok(())
//! # }
//! ```

pub mod store;
pub mod stores;
pub mod wrappers;

// Store contract
pub use store::{
    BackendStore, Capabilities, ClientSource, KeyValueStore, StoreBackend, DEFAULT_COLLECTION,
    DEFAULT_PAGE_SIZE, PAGE_LIMIT,
};

// Concrete stores
pub use stores::{FileTreeStore, MemoryStore, MemoryStoreConfig};
#[cfg(feature = "redis")]
pub use stores::RedisStore;
#[cfg(feature = "search")]
pub use stores::SearchStore;
#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

// Wrappers
pub use wrappers::{
    CircuitBreakerWrapper, EncryptionWrapper, FallbackWrapper, LoggingWrapper,
    PassthroughCacheWrapper, PrefixCollectionsWrapper, PrefixKeysWrapper, RetryWrapper,
    SanitizationMigrationWrapper, SingleCollectionWrapper, SizeLimitWrapper, StatisticsWrapper,
    TtlClampWrapper, VersioningWrapper,
};
