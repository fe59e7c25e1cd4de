//! Search-index store over tantivy: one index per collection.
//!
//! Each collection maps to an index directory `kv-<collection>` under the
//! configured root. Documents carry the flattened-value shape: the entry's
//! value lives under a stored JSON field, the key is a raw indexed term,
//! and timestamps are stored RFC-3339 text. Gets are key term queries;
//! puts delete the old term, add the new document, and commit (so writes
//! are visible immediately after the reader reload). Destroying a
//! collection removes the index directory.
//!
//! Tantivy has no native TTL; expired entries are filtered on read and
//! reclaimed by `cull`. Index operations block the calling task briefly;
//! this store targets embedded search workloads, not high-throughput
//! caching.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use keygrid_core::{
    FlattenedDocumentAdapter, KvError, KvResult, ManagedEntry, SanitizationStrategy,
    SerializationAdapter, StorageDatum, ValueMap,
};
use parking_lot::Mutex;
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, STORED, STRING};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::store::{BackendStore, Capabilities, StoreBackend};

const INDEX_DIR_PREFIX: &str = "kv-";
const WRITER_HEAP_BYTES: usize = 15_000_000;
const MAX_INDEX_NAME_LENGTH: usize = 60;

#[derive(Clone, Copy)]
struct SearchFields {
    key: Field,
}

/// One open collection index: writer serialized behind a mutex, reader
/// reloaded manually after each commit.
struct CollectionIndex {
    writer: Mutex<IndexWriter<TantivyDocument>>,
    reader: IndexReader,
}

/// Search-index [`StoreBackend`] over tantivy.
pub struct SearchBackend {
    root: PathBuf,
    schema: Schema,
    fields: SearchFields,
    indexes: DashMap<String, Arc<CollectionIndex>>,
    adapter: FlattenedDocumentAdapter,
}

impl SearchBackend {
    /// Creates a backend storing its indexes under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let mut builder = Schema::builder();
        builder.add_text_field("collection", STRING | STORED);
        let key = builder.add_text_field("key", STRING | STORED);
        builder.add_json_field("value", STORED);
        builder.add_text_field("created_at", STORED);
        builder.add_text_field("expires_at", STORED);
        let schema = builder.build();

        Self {
            root: root.into(),
            schema,
            fields: SearchFields { key },
            indexes: DashMap::new(),
            adapter: FlattenedDocumentAdapter,
        }
    }

    fn index_dir(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{INDEX_DIR_PREFIX}{collection}"))
    }

    fn open_collection(&self, collection: &str) -> KvResult<Arc<CollectionIndex>> {
        // The entry guard serializes racing opens; a second writer on the
        // same index directory would fail to take tantivy's lock file.
        match self.indexes.entry(collection.to_string()) {
            Entry::Occupied(open) => Ok(Arc::clone(open.get())),
            Entry::Vacant(slot) => {
                let dir = self.index_dir(collection);
                std::fs::create_dir_all(&dir).map_err(anyhow::Error::from)?;
                let directory = MmapDirectory::open(&dir).map_err(anyhow::Error::from)?;
                let index = Index::open_or_create(directory, self.schema.clone())
                    .map_err(anyhow::Error::from)?;
                let writer = index
                    .writer(WRITER_HEAP_BYTES)
                    .map_err(anyhow::Error::from)?;
                let reader = index
                    .reader_builder()
                    .reload_policy(ReloadPolicy::Manual)
                    .try_into()
                    .map_err(anyhow::Error::from)?;

                let state = Arc::new(CollectionIndex {
                    writer: Mutex::new(writer),
                    reader,
                });
                slot.insert(Arc::clone(&state));
                Ok(state)
            }
        }
    }

    fn entry_to_document(
        &self,
        collection: &str,
        key: &str,
        entry: &ManagedEntry,
    ) -> KvResult<TantivyDocument> {
        let StorageDatum::Document(document) =
            self.adapter.to_storage(key, entry, Some(collection))?
        else {
            return Err(KvError::serialization("expected a document storage form"));
        };
        let json =
            serde_json::to_string(&document).map_err(|err| KvError::serialization(err.to_string()))?;
        TantivyDocument::parse_json(&self.schema, &json)
            .map_err(|err| KvError::serialization(format!("cannot build index document: {err}")))
    }

    /// Flattens a retrieved document (tantivy returns every field as a
    /// list) back into the adapter's shape.
    fn document_to_entry(&self, doc: &TantivyDocument) -> KvResult<ManagedEntry> {
        let named = doc.to_named_doc(&self.schema);
        let as_value =
            serde_json::to_value(&named).map_err(|err| KvError::deserialization(err.to_string()))?;
        let serde_json::Value::Object(fields) = as_value else {
            return Err(KvError::deserialization("expected a document object"));
        };

        let mut document = ValueMap::new();
        for (name, values) in fields {
            if let serde_json::Value::Array(mut items) = values {
                if !items.is_empty() {
                    document.insert(name, items.swap_remove(0));
                }
            }
        }
        self.adapter.from_storage(StorageDatum::Document(document))
    }

    fn find_document(
        &self,
        state: &CollectionIndex,
        key: &str,
    ) -> KvResult<Option<TantivyDocument>> {
        let searcher = state.reader.searcher();
        let term = Term::from_field_text(self.fields.key, key);
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        let top = searcher
            .search(&query, &TopDocs::with_limit(1))
            .map_err(anyhow::Error::from)?;
        match top.first() {
            Some((_score, address)) => {
                let doc: TantivyDocument =
                    searcher.doc(*address).map_err(anyhow::Error::from)?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    fn commit_and_reload(state: &CollectionIndex) -> KvResult<()> {
        state
            .writer
            .lock()
            .commit()
            .map_err(anyhow::Error::from)?;
        state.reader.reload().map_err(anyhow::Error::from)?;
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for SearchBackend {
    async fn setup(&self) -> KvResult<()> {
        std::fs::create_dir_all(&self.root).map_err(|err| KvError::SetupFailed {
            reason: format!("cannot create index root: {err}"),
        })?;
        Ok(())
    }

    async fn setup_collection(&self, collection: &str) -> KvResult<()> {
        self.open_collection(collection)?;
        Ok(())
    }

    async fn get_entry(&self, collection: &str, key: &str) -> KvResult<Option<ManagedEntry>> {
        let state = self.open_collection(collection)?;
        match self.find_document(&state, key)? {
            Some(doc) => self.document_to_entry(&doc).map(Some),
            None => Ok(None),
        }
    }

    async fn put_entry(&self, collection: &str, key: &str, entry: &ManagedEntry) -> KvResult<()> {
        let state = self.open_collection(collection)?;
        let document = self.entry_to_document(collection, key, entry)?;
        {
            let writer = state.writer.lock();
            writer.delete_term(Term::from_field_text(self.fields.key, key));
            writer.add_document(document).map_err(anyhow::Error::from)?;
        }
        Self::commit_and_reload(&state)
    }

    async fn delete_entry(&self, collection: &str, key: &str) -> KvResult<bool> {
        let state = self.open_collection(collection)?;
        if self.find_document(&state, key)?.is_none() {
            return Ok(false);
        }
        state
            .writer
            .lock()
            .delete_term(Term::from_field_text(self.fields.key, key));
        Self::commit_and_reload(&state)?;
        Ok(true)
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
        let state = self.open_collection(collection)?;
        {
            let writer = state.writer.lock();
            for (key, entry) in keys.iter().zip(entries) {
                let document = self.entry_to_document(collection, key, entry)?;
                writer.delete_term(Term::from_field_text(self.fields.key, key));
                writer.add_document(document).map_err(anyhow::Error::from)?;
            }
        }
        Self::commit_and_reload(&state)
    }

    async fn collection_names(&self, limit: usize) -> KvResult<Vec<String>> {
        let mut names = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(KvError::Backend(err.into())),
        };
        for dirent in entries.filter_map(Result::ok) {
            let name = dirent.file_name().to_string_lossy().into_owned();
            if let Some(collection) = name.strip_prefix(INDEX_DIR_PREFIX) {
                if dirent.path().is_dir() {
                    names.push(collection.to_string());
                    if names.len() >= limit {
                        break;
                    }
                }
            }
        }
        Ok(names)
    }

    async fn collection_keys(&self, collection: &str, limit: usize) -> KvResult<Vec<String>> {
        let state = self.open_collection(collection)?;
        let searcher = state.reader.searcher();
        let available = usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX);
        let limit = limit.min(available);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let top = searcher
            .search(&AllQuery, &TopDocs::with_limit(limit))
            .map_err(anyhow::Error::from)?;

        let mut keys = Vec::with_capacity(top.len());
        for (_score, address) in top {
            let doc: TantivyDocument = searcher.doc(address).map_err(anyhow::Error::from)?;
            let named = doc.to_named_doc(&self.schema);
            if let Some(values) = named.0.get("key") {
                if let Some(value) = values.first() {
                    let as_json =
                        serde_json::to_value(value).map_err(|err| KvError::deserialization(err.to_string()))?;
                    if let serde_json::Value::String(key) = as_json {
                        keys.push(key);
                    }
                }
            }
        }
        Ok(keys)
    }

    async fn destroy_collection(&self, collection: &str) -> KvResult<bool> {
        // Drop the open index (writer lock file included) before removing
        // the directory.
        self.indexes.remove(collection);
        let dir = self.index_dir(collection);
        match std::fs::remove_dir_all(&dir) {
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

    fn default_collection_strategy(&self) -> SanitizationStrategy {
        SanitizationStrategy::index_name_safe(MAX_INDEX_NAME_LENGTH)
    }
}

/// Search-index key-value store.
pub type SearchStore = BackendStore<SearchBackend>;

impl BackendStore<SearchBackend> {
    /// Creates a search store with its indexes under `root`.
    #[must_use]
    pub fn open_search(root: impl Into<PathBuf>) -> Self {
        Self::new(SearchBackend::new(root))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::KeyValueStore;

    fn value(v: serde_json::Value) -> ValueMap {
        let serde_json::Value::Object(map) = v else {
            panic!("expected object")
        };
        map
    }

    #[tokio::test]
    async fn round_trip_through_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = SearchStore::open_search(dir.path());

        store
            .put(
                Some("articles"),
                "a1",
                value(json!({"title": "storage engines", "words": 900})),
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            store.get(Some("articles"), "a1").await.unwrap(),
            Some(value(json!({"title": "storage engines", "words": 900})))
        );
        assert!(store.get(Some("articles"), "a2").await.unwrap().is_none());

        // The collection landed in its own prefixed index directory.
        assert!(dir.path().join("kv-articles").is_dir());
    }

    #[tokio::test]
    async fn overwrite_replaces_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = SearchStore::open_search(dir.path());
        store.put(Some("c"), "k", value(json!({"v": 1})), None).await.unwrap();
        store.put(Some("c"), "k", value(json!({"v": 2})), None).await.unwrap();

        assert_eq!(
            store.get(Some("c"), "k").await.unwrap(),
            Some(value(json!({"v": 2})))
        );
        assert_eq!(store.keys(Some("c"), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let store = SearchStore::open_search(dir.path());
        store.put(Some("c"), "k", value(json!({})), None).await.unwrap();

        assert!(store.delete(Some("c"), "k").await.unwrap());
        assert!(!store.delete(Some("c"), "k").await.unwrap());
        assert!(store.get(Some("c"), "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_put_commits_once_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SearchStore::open_search(dir.path());
        let keys: Vec<String> = (0..3).map(|i| format!("k{i}")).collect();
        let values: Vec<_> = (0..3).map(|i| value(json!({"i": i}))).collect();
        store.put_many(Some("c"), &keys, values, None).await.unwrap();

        let results = store.get_many(Some("c"), &keys).await.unwrap();
        assert!(results.iter().all(Option::is_some));
    }

    #[tokio::test]
    async fn enumeration_and_destroy_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = SearchStore::open_search(dir.path());
        store.put(Some("a"), "k1", value(json!({})), None).await.unwrap();
        store.put(Some("b"), "k2", value(json!({})), None).await.unwrap();

        let mut collections = store.collections(None).await.unwrap();
        collections.sort();
        assert_eq!(collections, vec!["a", "b"]);

        assert!(store.destroy_collection(Some("a")).await.unwrap());
        assert!(!dir.path().join("kv-a").exists());
    }

    #[tokio::test]
    async fn expired_entries_filtered_client_side() {
        let dir = tempfile::tempdir().unwrap();
        let store = SearchStore::open_search(dir.path());
        store
            .put(Some("c"), "short", value(json!({})), Some(0.05))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(store.get(Some("c"), "short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hostile_collection_names_are_sanitized_to_index_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = SearchStore::open_search(dir.path());
        store
            .put(Some("My Collection!"), "k", value(json!({"x": 1})), None)
            .await
            .unwrap();
        assert_eq!(
            store.get(Some("My Collection!"), "k").await.unwrap(),
            Some(value(json!({"x": 1})))
        );
        // The index directory uses the sanitized name, not the raw input.
        assert!(!dir.path().join("kv-My Collection!").exists());
    }
}
