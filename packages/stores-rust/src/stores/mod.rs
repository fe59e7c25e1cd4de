//! Concrete store implementations, one per backend.
//!
//! Each backend implements only [`StoreBackend`](crate::store::StoreBackend)
//! primitives; the shared [`BackendStore`](crate::store::BackendStore)
//! orchestrator provides the rest of the contract. Heavier backends are
//! feature-gated:
//!
//! | Store | Feature | Backend |
//! |---|---|---|
//! | [`MemoryStore`] | always | per-collection maps with a FIFO cap |
//! | [`FileTreeStore`] | always | directory tree of JSON envelopes |
//! | `SqliteStore` | `sqlite` | single-table embedded SQL |
//! | `RedisStore` | `redis` | distributed cache with native TTL |
//! | `SearchStore` | `search` | tantivy index per collection |

pub mod filetree;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
#[cfg(feature = "search")]
pub mod search;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use filetree::{FileTreeBackend, FileTreeStore};
pub use memory::{MemoryBackend, MemoryStore, MemoryStoreConfig};
#[cfg(feature = "redis")]
pub use redis::{RedisBackend, RedisStore};
#[cfg(feature = "search")]
pub use search::{SearchBackend, SearchStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteBackend, SqliteStore};
