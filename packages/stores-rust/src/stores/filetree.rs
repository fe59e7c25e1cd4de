//! Local-disk store: one directory per collection, one file per key.
//!
//! Each entry is a `<key>.json` file holding the full JSON envelope. Writes
//! are atomic: the envelope is written to a unique temp file in the same
//! directory, fsynced, and renamed over the destination, so readers never
//! observe a partial record and no temp files remain on success.
//!
//! All resolved paths are confined under the configured root directory;
//! lexically unsafe names are rejected and symlinked collection directories
//! that escape the root are refused. The default hybrid sanitization keeps
//! names filesystem-legal in the first place.
//!
//! Intended for development and small deployments: no native TTL (expired
//! entries are filtered on read and reclaimed by `cull`) and enumeration
//! scans the directory tree.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use keygrid_core::{
    FullJsonAdapter, KvError, KvResult, ManagedEntry, SanitizationStrategy, SerializationAdapter,
    StorageDatum,
};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::store::{BackendStore, Capabilities, StoreBackend};

const FILE_EXTENSION: &str = "json";
const MAX_NAME_LENGTH: usize = 120;

/// Local-disk [`StoreBackend`].
pub struct FileTreeBackend {
    configured_root: PathBuf,
    canonical_root: OnceLock<PathBuf>,
    adapter: FullJsonAdapter,
}

impl FileTreeBackend {
    /// Creates a backend rooted at `root`. The directory is created on
    /// setup.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            configured_root: root.into(),
            canonical_root: OnceLock::new(),
            adapter: FullJsonAdapter,
        }
    }

    fn root(&self) -> &Path {
        self.canonical_root
            .get()
            .map_or(self.configured_root.as_path(), PathBuf::as_path)
    }

    /// Rejects names that could step outside their directory.
    fn validate_component(name: &str) -> KvResult<()> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
        {
            return Err(KvError::invalid_key(format!(
                "`{name}` is not a legal file-tree component"
            )));
        }
        Ok(())
    }

    /// Resolves a collection directory, refusing symlinks that escape the
    /// root.
    async fn collection_dir(&self, collection: &str) -> KvResult<PathBuf> {
        Self::validate_component(collection)?;
        let dir = self.root().join(collection);
        if let Ok(canonical) = tokio::fs::canonicalize(&dir).await {
            if !canonical.starts_with(self.root()) {
                return Err(KvError::invalid_key(format!(
                    "collection `{collection}` escapes the store root"
                )));
            }
            return Ok(canonical);
        }
        Ok(dir)
    }

    async fn key_path(&self, collection: &str, key: &str) -> KvResult<PathBuf> {
        Self::validate_component(key)?;
        let dir = self.collection_dir(collection).await?;
        Ok(dir.join(format!("{key}.{FILE_EXTENSION}")))
    }

    /// Write-temp, fsync, rename. No partial records, no leftovers on
    /// success.
    async fn write_atomically(path: &Path, contents: &str) -> KvResult<()> {
        let Some(dir) = path.parent() else {
            return Err(KvError::invalid_key("entry path has no parent directory"));
        };
        let tmp = dir.join(format!(".write.{}.tmp", Uuid::new_v4()));

        let result = async {
            let mut file = tokio::fs::File::create(&tmp)
                .await
                .map_err(anyhow::Error::from)?;
            file.write_all(contents.as_bytes())
                .await
                .map_err(anyhow::Error::from)?;
            file.sync_all().await.map_err(anyhow::Error::from)?;
            drop(file);
            tokio::fs::rename(&tmp, path)
                .await
                .map_err(anyhow::Error::from)?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if result.is_err() {
            // The rename never happened; drop the temp file.
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result.map_err(KvError::from)
    }
}

#[async_trait]
impl StoreBackend for FileTreeBackend {
    async fn setup(&self) -> KvResult<()> {
        tokio::fs::create_dir_all(&self.configured_root)
            .await
            .map_err(|err| KvError::SetupFailed {
                reason: format!("cannot create store root: {err}"),
            })?;
        let canonical = tokio::fs::canonicalize(&self.configured_root)
            .await
            .map_err(|err| KvError::SetupFailed {
                reason: format!("cannot resolve store root: {err}"),
            })?;
        let _ = self.canonical_root.set(canonical);
        Ok(())
    }

    async fn setup_collection(&self, collection: &str) -> KvResult<()> {
        let dir = self.collection_dir(collection).await?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| KvError::SetupFailed {
                reason: format!("cannot create collection directory: {err}"),
            })?;
        Ok(())
    }

    async fn get_entry(&self, collection: &str, key: &str) -> KvResult<Option<ManagedEntry>> {
        let path = self.key_path(collection, key).await?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => self
                .adapter
                .from_storage(StorageDatum::Text(contents))
                .map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                warn!(collection, key, error = %err, "unreadable entry file; treating as a miss");
                Ok(None)
            }
        }
    }

    async fn put_entry(&self, collection: &str, key: &str, entry: &ManagedEntry) -> KvResult<()> {
        let path = self.key_path(collection, key).await?;
        if let Some(dir) = path.parent() {
            // The collection directory may have been destroyed since setup.
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(anyhow::Error::from)?;
        }
        let StorageDatum::Text(json) = self.adapter.to_storage(key, entry, Some(collection))?
        else {
            return Err(KvError::serialization("expected a text storage form"));
        };
        Self::write_atomically(&path, &json).await
    }

    async fn delete_entry(&self, collection: &str, key: &str) -> KvResult<bool> {
        let path = self.key_path(collection, key).await?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(KvError::Backend(err.into())),
        }
    }

    async fn collection_names(&self, limit: usize) -> KvResult<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(self.root()).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(KvError::Backend(err.into())),
        };
        while let Some(dirent) = dir.next_entry().await.map_err(anyhow::Error::from)? {
            if dirent.file_type().await.map_err(anyhow::Error::from)?.is_dir() {
                names.push(dirent.file_name().to_string_lossy().into_owned());
                if names.len() >= limit {
                    break;
                }
            }
        }
        Ok(names)
    }

    async fn collection_keys(&self, collection: &str, limit: usize) -> KvResult<Vec<String>> {
        let path = self.collection_dir(collection).await?;
        let mut keys = Vec::new();
        let mut dir = match tokio::fs::read_dir(&path).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(err) => return Err(KvError::Backend(err.into())),
        };
        while let Some(dirent) = dir.next_entry().await.map_err(anyhow::Error::from)? {
            let name = PathBuf::from(dirent.file_name());
            if name.extension().is_some_and(|ext| ext == FILE_EXTENSION) {
                if let Some(stem) = name.file_stem() {
                    keys.push(stem.to_string_lossy().into_owned());
                    if keys.len() >= limit {
                        break;
                    }
                }
            }
        }
        Ok(keys)
    }

    async fn destroy_collection(&self, collection: &str) -> KvResult<bool> {
        let path = self.collection_dir(collection).await?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(KvError::Backend(err.into())),
        }
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        let names = self.collection_names(usize::MAX).await?;
        for name in names {
            let _ = self.destroy_collection(&name).await?;
        }
        Ok(true)
    }

    async fn cull(&self) -> KvResult<()> {
        for collection in self.collection_names(usize::MAX).await? {
            for key in self.collection_keys(&collection, usize::MAX).await? {
                if let Some(entry) = self.get_entry(&collection, &key).await? {
                    if entry.is_expired() {
                        let _ = self.delete_entry(&collection, &key).await?;
                    }
                }
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
            stable_api: false,
        }
    }

    fn default_key_strategy(&self) -> SanitizationStrategy {
        SanitizationStrategy::filesystem_safe(MAX_NAME_LENGTH)
    }

    fn default_collection_strategy(&self) -> SanitizationStrategy {
        SanitizationStrategy::filesystem_safe(MAX_NAME_LENGTH)
    }
}

/// Local-disk key-value store.
pub type FileTreeStore = BackendStore<FileTreeBackend>;

impl BackendStore<FileTreeBackend> {
    /// Creates a file-tree store rooted at `root`.
    #[must_use]
    pub fn open_tree(root: impl Into<PathBuf>) -> Self {
        Self::new(FileTreeBackend::new(root))
    }
}
