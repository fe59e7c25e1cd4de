//! Backend primitives implemented by each concrete store.
//!
//! [`StoreBackend`] is the narrow trait a backend implements: singular
//! entry operations plus whatever native batch, enumeration, and destroy
//! primitives the backend actually has. The default batch implementations
//! fan out over the singular forms; backends with a native batch primitive
//! (`MGET`, bulk APIs, `IN` lists) override them for throughput.
//!
//! Backends receive *sanitized* collection and key identifiers -- the
//! [`BackendStore`](super::BackendStore) orchestrator has already validated
//! and transformed user input via the configured sanitization strategies.

use async_trait::async_trait;
use keygrid_core::{KvError, KvResult, ManagedEntry, SanitizationStrategy};
use tracing::warn;

use super::Capabilities;

/// The primitives of one storage backend.
///
/// Decode failures: `get_entry` returns [`KvError::Deserialization`] for a
/// corrupt record; the orchestrator converts it to a miss. Native batch
/// overrides must apply the same policy per position so one corrupt record
/// does not poison the batch.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Global one-time initialization (create table, bucket, pool).
    /// Idempotent; called at most once per store instance.
    async fn setup(&self) -> KvResult<()> {
        Ok(())
    }

    /// Per-collection one-time initialization (create directory, index).
    /// Idempotent; called at most once per (instance, collection).
    async fn setup_collection(&self, collection: &str) -> KvResult<()> {
        let _ = collection;
        Ok(())
    }

    /// Fetches the stored entry, expired or not. Expiry filtering happens
    /// in the orchestrator.
    async fn get_entry(&self, collection: &str, key: &str) -> KvResult<Option<ManagedEntry>>;

    /// Stores an entry, overwriting any existing one.
    async fn put_entry(&self, collection: &str, key: &str, entry: &ManagedEntry) -> KvResult<()>;

    /// Removes an entry; returns whether one was present.
    async fn delete_entry(&self, collection: &str, key: &str) -> KvResult<bool>;

    /// Batch fetch aligned to `keys`. Default: loop over [`Self::get_entry`],
    /// treating per-record corruption as a miss.
    async fn get_entries(
        &self,
        collection: &str,
        keys: &[String],
    ) -> KvResult<Vec<Option<ManagedEntry>>> {
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get_entry(collection, key).await {
                Ok(entry) => entries.push(entry),
                Err(KvError::Deserialization { reason }) => {
                    warn!(collection, key, %reason, "skipping undecodable entry");
                    entries.push(None);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(entries)
    }

    /// Batch store. `keys` and `entries` are equal length (checked by the
    /// orchestrator). Default: loop over [`Self::put_entry`].
    async fn put_entries(
        &self,
        collection: &str,
        keys: &[String],
        entries: &[ManagedEntry],
    ) -> KvResult<()> {
        for (key, entry) in keys.iter().zip(entries) {
            self.put_entry(collection, key, entry).await?;
        }
        Ok(())
    }

    /// Batch delete; returns the count removed. Default: loop over
    /// [`Self::delete_entry`].
    async fn delete_entries(&self, collection: &str, keys: &[String]) -> KvResult<usize> {
        let mut deleted = 0;
        for key in keys {
            if self.delete_entry(collection, key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Enumerates (sanitized) collection names, up to `limit`.
    async fn collection_names(&self, limit: usize) -> KvResult<Vec<String>> {
        let _ = limit;
        Err(KvError::UnsupportedOperation {
            operation: "collections",
        })
    }

    /// Enumerates (sanitized) keys in a collection, up to `limit`.
    async fn collection_keys(&self, collection: &str, limit: usize) -> KvResult<Vec<String>> {
        let _ = (collection, limit);
        Err(KvError::UnsupportedOperation { operation: "keys" })
    }

    /// Removes every key in a collection; returns whether anything was
    /// removed.
    async fn destroy_collection(&self, collection: &str) -> KvResult<bool> {
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

    /// Proactively deletes expired entries.
    async fn cull(&self) -> KvResult<()> {
        Err(KvError::UnsupportedOperation { operation: "cull" })
    }

    /// Releases backend resources the store owns.
    async fn close(&self) -> KvResult<()> {
        Ok(())
    }

    /// The optional capabilities this backend implements.
    fn capabilities(&self) -> Capabilities;

    /// Default key sanitization matching the backend's native constraints.
    fn default_key_strategy(&self) -> SanitizationStrategy {
        SanitizationStrategy::Passthrough
    }

    /// Default collection sanitization matching the backend's native
    /// constraints.
    fn default_collection_strategy(&self) -> SanitizationStrategy {
        SanitizationStrategy::Passthrough
    }
}
