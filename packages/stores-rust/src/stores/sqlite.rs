//! Embedded SQL store over a single SQLite table.
//!
//! Layout: one row per entry with columns `(collection, key, value,
//! created_at, expires_at, ttl_secs)` and primary key `(collection, key)`.
//! The value column holds the entry's JSON object as text; timestamps are
//! RFC-3339 text columns (fixed-width, so lexicographic comparison matches
//! chronological order) with an index on `expires_at` for culling.
//! `ttl_secs` records the TTL the entry was written with, for diagnostics.
//!
//! Upserts use `INSERT .. ON CONFLICT .. DO UPDATE`; deletes report the
//! affected row count. Batch puts run in a transaction, so a failed batch
//! leaves no partial writes. The table name is validated (alphanumeric
//! plus underscore, 64 characters max) before it is ever spliced into SQL.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use keygrid_core::entry::{format_timestamp, parse_timestamp, parse_value_object};
use keygrid_core::{KvError, KvResult, ManagedEntry, CURRENT_ENVELOPE_VERSION};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::store::{BackendStore, Capabilities, ClientSource, StoreBackend};

/// Table used when the caller does not name one.
pub const DEFAULT_TABLE_NAME: &str = "kv_store";

const MAX_TABLE_NAME_LENGTH: usize = 64;

/// Embedded SQL [`StoreBackend`] over SQLite.
pub struct SqliteBackend {
    pool: SqlitePool,
    table: String,
    source: ClientSource,
}

impl SqliteBackend {
    /// Opens (creating if missing) a database file and owns the pool.
    ///
    /// # Errors
    ///
    /// [`KvError::SetupFailed`] when the database cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> KvResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|err| KvError::SetupFailed {
                reason: format!("cannot open sqlite database: {err}"),
            })?;
        Self::from_pool(pool, DEFAULT_TABLE_NAME, ClientSource::Owned)
    }

    /// Opens an in-memory database on a single connection (each connection
    /// of a pool would otherwise see its own empty database).
    ///
    /// # Errors
    ///
    /// [`KvError::SetupFailed`] when the database cannot be opened.
    pub async fn open_in_memory() -> KvResult<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|err| KvError::SetupFailed {
                reason: format!("cannot open in-memory sqlite database: {err}"),
            })?;
        Self::from_pool(pool, DEFAULT_TABLE_NAME, ClientSource::Owned)
    }

    /// Wraps a caller-provided pool; the caller retains ownership and must
    /// close it.
    ///
    /// # Errors
    ///
    /// [`KvError::InvalidKey`] when the table name is not a legal
    /// identifier.
    pub fn with_pool(pool: SqlitePool, table: impl Into<String>) -> KvResult<Self> {
        Self::from_pool(pool, table, ClientSource::Provided)
    }

    fn from_pool(
        pool: SqlitePool,
        table: impl Into<String>,
        source: ClientSource,
    ) -> KvResult<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self {
            pool,
            table,
            source,
        })
    }

    fn row_to_entry(row: &SqliteRow) -> KvResult<ManagedEntry> {
        let value_json: String = row.get("value");
        let value = parse_value_object(&value_json)?;
        let created_at = match row.get::<Option<String>, _>("created_at") {
            Some(raw) => Some(parse_timestamp("created_at", &raw)?),
            None => None,
        };
        let expires_at = match row.get::<Option<String>, _>("expires_at") {
            Some(raw) => Some(parse_timestamp("expires_at", &raw)?),
            None => None,
        };
        Ok(ManagedEntry {
            value,
            created_at,
            expires_at,
            version: CURRENT_ENVELOPE_VERSION,
        })
    }

    fn entry_columns(entry: &ManagedEntry) -> KvResult<(String, Option<String>, Option<String>, Option<f64>)> {
        let value = entry.value_as_json()?;
        let created_at = entry.created_at.map(format_timestamp);
        let expires_at = entry.expires_at.map(format_timestamp);
        let ttl_secs = match (entry.created_at, entry.expires_at) {
            (Some(created), Some(expires)) => {
                Some((expires - created).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        };
        Ok((value, created_at, expires_at, ttl_secs))
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {table} (collection, key, value, created_at, expires_at, ttl_secs) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (collection, key) DO UPDATE SET \
             value = excluded.value, created_at = excluded.created_at, \
             expires_at = excluded.expires_at, ttl_secs = excluded.ttl_secs",
            table = self.table
        )
    }
}

/// Rejects table names that are not plain identifiers.
fn validate_table_name(table: &str) -> KvResult<()> {
    let legal = !table.is_empty()
        && table.len() <= MAX_TABLE_NAME_LENGTH
        && !table.starts_with(|c: char| c.is_ascii_digit())
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if legal {
        Ok(())
    } else {
        Err(KvError::invalid_key(format!(
            "`{table}` is not a legal table name"
        )))
    }
}

#[async_trait]
impl StoreBackend for SqliteBackend {
    async fn setup(&self) -> KvResult<()> {
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at TEXT,
                expires_at TEXT,
                ttl_secs REAL,
                PRIMARY KEY (collection, key)
            )",
            table = self.table
        );
        sqlx::query(&create_table)
            .execute(&self.pool)
            .await
            .map_err(|err| KvError::SetupFailed {
                reason: format!("cannot create table: {err}"),
            })?;

        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_expires_at ON {table} (expires_at)",
            table = self.table
        );
        sqlx::query(&create_index)
            .execute(&self.pool)
            .await
            .map_err(|err| KvError::SetupFailed {
                reason: format!("cannot create index: {err}"),
            })?;
        Ok(())
    }

    async fn get_entry(&self, collection: &str, key: &str) -> KvResult<Option<ManagedEntry>> {
        let sql = format!(
            "SELECT value, created_at, expires_at FROM {table} WHERE collection = ? AND key = ?",
            table = self.table
        );
        let row = sqlx::query(&sql)
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn put_entry(&self, collection: &str, key: &str, entry: &ManagedEntry) -> KvResult<()> {
        let (value, created_at, expires_at, ttl_secs) = Self::entry_columns(entry)?;
        sqlx::query(&self.upsert_sql())
            .bind(collection)
            .bind(key)
            .bind(value)
            .bind(created_at)
            .bind(expires_at)
            .bind(ttl_secs)
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn delete_entry(&self, collection: &str, key: &str) -> KvResult<bool> {
        let sql = format!(
            "DELETE FROM {table} WHERE collection = ? AND key = ?",
            table = self.table
        );
        let result = sqlx::query(&sql)
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_entries(
        &self,
        collection: &str,
        keys: &[String],
    ) -> KvResult<Vec<Option<ManagedEntry>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT key, value, created_at, expires_at FROM {table} \
             WHERE collection = ? AND key IN ({placeholders})",
            table = self.table
        );
        let mut query = sqlx::query(&sql).bind(collection);
        for key in keys {
            query = query.bind(key);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;

        let mut found = std::collections::HashMap::with_capacity(rows.len());
        for row in &rows {
            let key: String = row.get("key");
            match Self::row_to_entry(row) {
                Ok(entry) => {
                    found.insert(key, entry);
                }
                Err(err) => {
                    warn!(collection, key, error = %err, "skipping undecodable row");
                }
            }
        }
        Ok(keys.iter().map(|key| found.remove(key)).collect())
    }

    async fn put_entries(
        &self,
        collection: &str,
        keys: &[String],
        entries: &[ManagedEntry],
    ) -> KvResult<()> {
        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;
        let sql = self.upsert_sql();
        for (key, entry) in keys.iter().zip(entries) {
            let (value, created_at, expires_at, ttl_secs) = Self::entry_columns(entry)?;
            sqlx::query(&sql)
                .bind(collection)
                .bind(key)
                .bind(value)
                .bind(created_at)
                .bind(expires_at)
                .bind(ttl_secs)
                .execute(&mut *tx)
                .await
                .map_err(anyhow::Error::from)?;
        }
        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn delete_entries(&self, collection: &str, keys: &[String]) -> KvResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "DELETE FROM {table} WHERE collection = ? AND key IN ({placeholders})",
            table = self.table
        );
        let mut query = sqlx::query(&sql).bind(collection);
        for key in keys {
            query = query.bind(key);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    async fn collection_names(&self, limit: usize) -> KvResult<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT collection FROM {table} ORDER BY collection LIMIT ?",
            table = self.table
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(rows.iter().map(|row| row.get("collection")).collect())
    }

    async fn collection_keys(&self, collection: &str, limit: usize) -> KvResult<Vec<String>> {
        let sql = format!(
            "SELECT key FROM {table} WHERE collection = ? ORDER BY key LIMIT ?",
            table = self.table
        );
        let rows = sqlx::query(&sql)
            .bind(collection)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(rows.iter().map(|row| row.get("key")).collect())
    }

    async fn destroy_collection(&self, collection: &str) -> KvResult<bool> {
        let sql = format!(
            "DELETE FROM {table} WHERE collection = ?",
            table = self.table
        );
        let result = sqlx::query(&sql)
            .bind(collection)
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn destroy_store(&self) -> KvResult<bool> {
        let sql = format!("DELETE FROM {table}", table = self.table);
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(true)
    }

    async fn cull(&self) -> KvResult<()> {
        let sql = format!(
            "DELETE FROM {table} WHERE expires_at IS NOT NULL AND expires_at <= ?",
            table = self.table
        );
        sqlx::query(&sql)
            .bind(format_timestamp(chrono::Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn close(&self) -> KvResult<()> {
        if self.source.is_owned() {
            self.pool.close().await;
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
            stable_api: true,
        }
    }
}

/// Embedded SQL key-value store.
pub type SqliteStore = BackendStore<SqliteBackend>;

impl BackendStore<SqliteBackend> {
    /// Opens (creating if missing) a store in the given database file.
    ///
    /// # Errors
    ///
    /// [`KvError::SetupFailed`] when the database cannot be opened.
    pub async fn open_sqlite(path: impl AsRef<Path>) -> KvResult<Self> {
        Ok(Self::new(SqliteBackend::open(path).await?))
    }

    /// Opens an in-memory store (single connection).
    ///
    /// # Errors
    ///
    /// [`KvError::SetupFailed`] when the database cannot be opened.
    pub async fn open_sqlite_in_memory() -> KvResult<Self> {
        Ok(Self::new(SqliteBackend::open_in_memory().await?))
    }
}
