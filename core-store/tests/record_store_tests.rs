//! Integration tests for the SQLite record store against a real temp
//! directory, exercising upsert, read-repair, and URL lookups.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::storage::{FileMetadata, FileSystemAccess};
use core_store::{
    create_pool, DatabaseConfig, RecordStore, SqliteRecordStore, StoreRecord,
};

/// Filesystem bridge rooted at a temp directory.
struct TempFs {
    root: PathBuf,
}

#[async_trait]
impl FileSystemAccess for TempFs {
    async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
        Ok(self.root.clone())
    }

    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn metadata(&self, path: &Path) -> BridgeResult<FileMetadata> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(FileMetadata {
            size: meta.len(),
            created_at: None,
            modified_at: None,
            is_directory: meta.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> BridgeResult<()> {
        Ok(tokio::fs::create_dir_all(path).await?)
    }

    async fn read_file(&self, path: &Path) -> BridgeResult<Bytes> {
        Ok(Bytes::from(tokio::fs::read(path).await?))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
        Ok(tokio::fs::write(path, &data).await?)
    }

    async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
        Ok(tokio::fs::remove_file(path).await?)
    }

    async fn delete_dir_all(&self, path: &Path) -> BridgeResult<()> {
        Ok(tokio::fs::remove_dir_all(path).await?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> BridgeResult<()> {
        Ok(tokio::fs::rename(from, to).await?)
    }
}

async fn setup() -> (SqliteRecordStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store_dir = dir.path().join("store");
    let fs = Arc::new(TempFs {
        root: dir.path().to_path_buf(),
    });
    let pool = create_pool(DatabaseConfig::in_memory()).await.unwrap();
    let store = SqliteRecordStore::new(pool, fs, store_dir);
    store.initialize().await.unwrap();
    (store, dir)
}

async fn write_backing_file(store: &SqliteRecordStore, record: &StoreRecord, data: &[u8]) {
    let path = store.resolve_path(record);
    tokio::fs::write(&path, data).await.unwrap();
}

#[tokio::test]
async fn test_create_and_query_round_trip() {
    let (store, _dir) = setup().await;

    let record = StoreRecord::new("https://example.com/logo.png")
        .with_original_url("https://example.com/logo.png");
    write_backing_file(&store, &record, b"payload").await;
    store.create(&record).await.unwrap();

    let fetched = store.query(&record.key).await.unwrap().unwrap();
    assert_eq!(fetched, record);
}

#[tokio::test]
async fn test_create_is_an_upsert() {
    let (store, _dir) = setup().await;

    let first = StoreRecord::new("k").with_original_url("https://a.example/x");
    write_backing_file(&store, &first, b"one").await;
    store.create(&first).await.unwrap();

    let second = StoreRecord::new("k").with_original_url("https://b.example/y");
    write_backing_file(&store, &second, b"two").await;
    store.create(&second).await.unwrap();

    let fetched = store.query("k").await.unwrap().unwrap();
    assert_eq!(fetched.original_url.as_deref(), Some("https://b.example/y"));
}

#[tokio::test]
async fn test_empty_key_is_rejected() {
    let (store, _dir) = setup().await;
    let mut record = StoreRecord::new("k");
    record.key = String::new();

    assert!(store.create(&record).await.is_err());
}

#[tokio::test]
async fn test_expired_record_is_repaired_on_query() {
    let (store, _dir) = setup().await;

    let now = chrono::Utc::now().timestamp_millis();
    let record = StoreRecord::new("stale").with_expires_at(now - 5_000);
    write_backing_file(&store, &record, b"old").await;
    store.create(&record).await.unwrap();

    assert!(store.query("stale").await.unwrap().is_none());

    // Both the row and the backing file are gone.
    assert!(store.query("stale").await.unwrap().is_none());
    assert!(!tokio::fs::try_exists(store.resolve_path(&record))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_short_ttl_expires_in_real_time() {
    let (store, _dir) = setup().await;

    let record = StoreRecord::new("short").with_ttl(std::time::Duration::from_millis(100));
    write_backing_file(&store, &record, b"ephemeral").await;
    store.create(&record).await.unwrap();
    assert!(store.query("short").await.unwrap().is_some());

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    assert!(store.query("short").await.unwrap().is_none());
    assert!(!tokio::fs::try_exists(store.resolve_path(&record))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_record_without_backing_file_is_repaired() {
    let (store, _dir) = setup().await;

    let record = StoreRecord::new("orphan");
    store.create(&record).await.unwrap();

    // The backing file was never written, so the lookup self-heals.
    assert!(store.query("orphan").await.unwrap().is_none());
}

#[tokio::test]
async fn test_query_by_url_case_insensitive() {
    let (store, _dir) = setup().await;

    let record = StoreRecord::new("k").with_original_url("https://Example.com/Logo.PNG");
    write_backing_file(&store, &record, b"data").await;
    store.create(&record).await.unwrap();

    let exact = store
        .query_by_url("https://example.com/logo.png", false)
        .await
        .unwrap();
    assert!(exact.is_empty());

    let relaxed = store
        .query_by_url("https://example.com/logo.png", true)
        .await
        .unwrap();
    assert_eq!(relaxed.len(), 1);
    assert_eq!(relaxed[0].key, "k");
}

#[tokio::test]
async fn test_delete_removes_row_and_file() {
    let (store, _dir) = setup().await;

    let record = StoreRecord::new("k");
    write_backing_file(&store, &record, b"data").await;
    store.create(&record).await.unwrap();

    store.delete("k").await.unwrap();

    assert!(store.query("k").await.unwrap().is_none());
    assert!(!tokio::fs::try_exists(store.resolve_path(&record))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_delete_missing_key_is_ok() {
    let (store, _dir) = setup().await;
    store.delete("never-existed").await.unwrap();
}

#[tokio::test]
async fn test_delete_expired_sweeps_only_stale_rows() {
    let (store, _dir) = setup().await;
    let now = chrono::Utc::now().timestamp_millis();

    let fresh = StoreRecord::new("fresh").with_expires_at(now + 3_600_000);
    let stale_a = StoreRecord::new("stale-a").with_expires_at(now - 10_000);
    let stale_b = StoreRecord::new("stale-b").with_expires_at(now - 20_000);
    for record in [&fresh, &stale_a, &stale_b] {
        write_backing_file(&store, record, b"data").await;
        store.create(record).await.unwrap();
    }

    let removed = store.delete_expired().await.unwrap();
    assert_eq!(removed, 2);

    assert!(store.query("fresh").await.unwrap().is_some());
    assert!(store.query("stale-a").await.unwrap().is_none());
    assert!(!tokio::fs::try_exists(store.resolve_path(&stale_a))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_delete_all_leaves_usable_store() {
    let (store, _dir) = setup().await;

    let record = StoreRecord::new("k");
    write_backing_file(&store, &record, b"data").await;
    store.create(&record).await.unwrap();

    store.delete_all().await.unwrap();
    assert!(store.query("k").await.unwrap().is_none());

    // The store directory is recreated and accepts new writes.
    let next = StoreRecord::new("k2");
    write_backing_file(&store, &next, b"fresh").await;
    store.create(&next).await.unwrap();
    assert!(store.query("k2").await.unwrap().is_some());
}
