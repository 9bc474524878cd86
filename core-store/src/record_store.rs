//! Record store: SQLite-backed key → file index for the on-disk cache.
//!
//! The store owns the index only; payload bytes live as files in the store
//! directory and are written by the download path. Queries read-repair:
//! an expired record (or a record whose backing file is gone) is removed
//! during the lookup and reported as a miss.

use async_trait::async_trait;
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use bridge_traits::storage::FileSystemAccess;

use crate::error::{Result, StoreError};
use crate::record::StoreRecord;

/// Persistence operations for store records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the schema if it does not exist.
    async fn initialize(&self) -> Result<()>;

    /// Insert or replace the record for its key.
    async fn create(&self, record: &StoreRecord) -> Result<()>;

    /// Look up the record for a key.
    ///
    /// Expired records and records whose backing file no longer exists are
    /// removed during the lookup and `None` is returned.
    async fn query(&self, key: &str) -> Result<Option<StoreRecord>>;

    /// Look up records by original URL.
    ///
    /// With `case_insensitive` the comparison ignores ASCII case. Expired
    /// matches are repaired away just like [`RecordStore::query`].
    async fn query_by_url(&self, url: &str, case_insensitive: bool) -> Result<Vec<StoreRecord>>;

    /// Delete the record for a key and best-effort remove its backing file.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete all expired records and their backing files. Returns the
    /// number of records removed.
    async fn delete_expired(&self) -> Result<usize>;

    /// Delete every record and backing file.
    async fn delete_all(&self) -> Result<()>;

    /// Resolve a record's backing file to an absolute path.
    fn resolve_path(&self, record: &StoreRecord) -> PathBuf;
}

/// SQLite implementation of [`RecordStore`].
pub struct SqliteRecordStore {
    pool: Pool<Sqlite>,
    fs: Arc<dyn FileSystemAccess>,
    store_dir: PathBuf,
}

impl SqliteRecordStore {
    pub fn new(pool: Pool<Sqlite>, fs: Arc<dyn FileSystemAccess>, store_dir: PathBuf) -> Self {
        Self {
            pool,
            fs,
            store_dir,
        }
    }

    /// Directory holding the backing files.
    pub fn store_dir(&self) -> &PathBuf {
        &self.store_dir
    }

    /// Remove a backing file without failing the caller.
    async fn remove_backing_file(&self, record: &StoreRecord) {
        let path = self.resolve_path(record);
        if let Err(e) = self.fs.delete_file(&path).await {
            debug!(key = %record.key, error = %e, "Backing file removal skipped");
        }
    }

    /// Drop a record that failed validation during a lookup.
    async fn repair(&self, record: &StoreRecord, reason: &str) -> Result<()> {
        warn!(key = %record.key, reason, "Repairing stale store record");
        sqlx::query("DELETE FROM store_records WHERE key = ?")
            .bind(&record.key)
            .execute(&self.pool)
            .await?;
        self.remove_backing_file(record).await;
        Ok(())
    }

    /// Validate a fetched record, repairing and filtering out stale ones.
    async fn validate(&self, record: StoreRecord) -> Result<Option<StoreRecord>> {
        if record.is_expired() {
            self.repair(&record, "expired").await?;
            return Ok(None);
        }
        let path = self.resolve_path(&record);
        match self.fs.exists(&path).await {
            Ok(true) => Ok(Some(record)),
            Ok(false) => {
                self.repair(&record, "backing file missing").await?;
                Ok(None)
            }
            Err(e) => Err(StoreError::Bridge(e)),
        }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS store_records (
                key TEXT PRIMARY KEY NOT NULL,
                file_name TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                original_url TEXT,
                response_meta TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_store_records_url ON store_records (original_url)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_store_records_expires ON store_records (expires_at)",
        )
        .execute(&self.pool)
        .await?;

        self.fs.create_dir_all(&self.store_dir).await?;

        Ok(())
    }

    async fn create(&self, record: &StoreRecord) -> Result<()> {
        if record.key.is_empty() {
            return Err(StoreError::InvalidRecord {
                field: "key".to_string(),
                message: "key must not be empty".to_string(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO store_records (key, file_name, created_at, expires_at, original_url, response_meta)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                file_name = excluded.file_name,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                original_url = excluded.original_url,
                response_meta = excluded.response_meta
            "#,
        )
        .bind(&record.key)
        .bind(&record.file_name)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(&record.original_url)
        .bind(&record.response_meta)
        .execute(&self.pool)
        .await?;

        debug!(key = %record.key, file = %record.file_name, "Stored record");
        Ok(())
    }

    async fn query(&self, key: &str) -> Result<Option<StoreRecord>> {
        let record = sqlx::query_as::<_, StoreRecord>(
            "SELECT key, file_name, created_at, expires_at, original_url, response_meta
             FROM store_records WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match record {
            Some(record) => self.validate(record).await,
            None => Ok(None),
        }
    }

    async fn query_by_url(&self, url: &str, case_insensitive: bool) -> Result<Vec<StoreRecord>> {
        let records = if case_insensitive {
            sqlx::query_as::<_, StoreRecord>(
                "SELECT key, file_name, created_at, expires_at, original_url, response_meta
                 FROM store_records WHERE LOWER(original_url) = LOWER(?)",
            )
            .bind(url)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, StoreRecord>(
                "SELECT key, file_name, created_at, expires_at, original_url, response_meta
                 FROM store_records WHERE original_url = ?",
            )
            .bind(url)
            .fetch_all(&self.pool)
            .await?
        };

        let mut valid = Vec::with_capacity(records.len());
        for record in records {
            if let Some(record) = self.validate(record).await? {
                valid.push(record);
            }
        }
        Ok(valid)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let record = sqlx::query_as::<_, StoreRecord>(
            "SELECT key, file_name, created_at, expires_at, original_url, response_meta
             FROM store_records WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(record) = record else {
            return Ok(());
        };

        sqlx::query("DELETE FROM store_records WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        self.remove_backing_file(&record).await;
        Ok(())
    }

    async fn delete_expired(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp_millis();
        let expired = sqlx::query_as::<_, StoreRecord>(
            "SELECT key, file_name, created_at, expires_at, original_url, response_meta
             FROM store_records WHERE expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        for record in &expired {
            self.remove_backing_file(record).await;
        }

        let result = sqlx::query(
            "DELETE FROM store_records WHERE expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn delete_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM store_records")
            .execute(&self.pool)
            .await?;

        if let Err(e) = self.fs.delete_dir_all(&self.store_dir).await {
            debug!(error = %e, "Store directory removal skipped");
        }
        self.fs.create_dir_all(&self.store_dir).await?;

        Ok(())
    }

    fn resolve_path(&self, record: &StoreRecord) -> PathBuf {
        self.store_dir.join(&record.file_name)
    }
}
