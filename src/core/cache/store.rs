//! Persistent keyed byte-blob store.
//!
//! The persistent cache tier talks to this interface only: get by key,
//! put with a last-touched timestamp, prune to the most recently touched
//! entries. Any embedded KV store can implement it; the bundled
//! implementation keeps blob + metadata file pairs on the filesystem.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_128;

/// Errors from persistent store operations. Callers treat every variant
/// as a cache miss; nothing here is fatal.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Keyed byte-blob store with recency-based pruning.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Retrieves a blob by key, refreshing its last-touched timestamp.
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Stores a blob under `key`, stamping it as touched now.
    async fn put(&self, key: &str, value: Bytes) -> StoreResult<()>;

    /// Drops all but the `keep` most recently touched entries.
    async fn prune(&self, keep: usize) -> StoreResult<()>;
}

/// Per-entry metadata kept alongside each blob.
#[derive(Serialize, Deserialize)]
struct EntryMeta {
    touched_at: u64,
    size: usize,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Filesystem-backed store: one blob file and one `.meta` JSON file per
/// entry, fanned out by key hash.
pub struct FsStore {
    base_path: PathBuf,
}

impl FsStore {
    pub async fn new(base_path: PathBuf) -> StoreResult<Self> {
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        let hash = format!("{:032x}", xxh3_128(key.as_bytes()));
        let dir = &hash[0..2];
        self.base_path.join(dir).join(hash)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        let mut path = self.blob_path(key);
        path.set_extension("meta");
        path
    }

    async fn write_atomic(path: &PathBuf, contents: &[u8]) -> StoreResult<()> {
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await?;
        Ok(())
    }

    async fn write_meta(path: &PathBuf, meta: &EntryMeta) -> StoreResult<()> {
        let json = serde_json::to_vec(meta)?;
        Self::write_atomic(path, &json).await
    }

    /// Walks the fan-out directories collecting (touched_at, blob, meta).
    async fn collect_entries(&self) -> StoreResult<Vec<(u64, PathBuf, PathBuf)>> {
        let mut entries = Vec::new();
        let mut dirs = fs::read_dir(&self.base_path).await?;
        while let Some(dir) = dirs.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let meta_path = file.path();
                if meta_path.extension().and_then(|e| e.to_str()) != Some("meta") {
                    continue;
                }
                let Ok(raw) = fs::read(&meta_path).await else {
                    continue;
                };
                let Ok(meta) = serde_json::from_slice::<EntryMeta>(&raw) else {
                    continue;
                };
                let blob_path = meta_path.with_extension("");
                entries.push((meta.touched_at, blob_path, meta_path));
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl PersistentStore for FsStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let blob_path = self.blob_path(key);
        let meta_path = self.meta_path(key);

        let data = match fs::read(&blob_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Refresh recency best-effort; a failed touch never fails the read.
        let meta = EntryMeta {
            touched_at: unix_now(),
            size: data.len(),
        };
        if let Err(e) = Self::write_meta(&meta_path, &meta).await {
            debug!("failed to refresh cache entry timestamp: {e}");
        }

        Ok(Some(Bytes::from(data)))
    }

    async fn put(&self, key: &str, value: Bytes) -> StoreResult<()> {
        let blob_path = self.blob_path(key);
        let meta_path = self.meta_path(key);

        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        Self::write_atomic(&blob_path, &value).await?;
        let meta = EntryMeta {
            touched_at: unix_now(),
            size: value.len(),
        };
        Self::write_meta(&meta_path, &meta).await
    }

    async fn prune(&self, keep: usize) -> StoreResult<()> {
        let mut entries = self.collect_entries().await?;
        if entries.len() <= keep {
            return Ok(());
        }

        entries.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, blob_path, meta_path) in entries.drain(keep..) {
            debug!("pruning cache entry {:?}", blob_path);
            let _ = fs::remove_file(&blob_path).await;
            let _ = fs::remove_file(&meta_path).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, FsStore) {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path().to_path_buf()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn roundtrip_and_missing_key() {
        let (_dir, store) = store().await;

        store.put("key1", Bytes::from("audio")).await.unwrap();
        assert_eq!(
            store.get("key1").await.unwrap(),
            Some(Bytes::from("audio"))
        );
        assert_eq!(store.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn overwrite_replaces_value() {
        let (_dir, store) = store().await;

        store.put("key1", Bytes::from("old")).await.unwrap();
        store.put("key1", Bytes::from("new")).await.unwrap();
        assert_eq!(store.get("key1").await.unwrap(), Some(Bytes::from("new")));
    }

    #[tokio::test]
    async fn prune_keeps_most_recently_touched() {
        let (_dir, store) = store().await;

        store.put("a", Bytes::from("a")).await.unwrap();
        store.put("b", Bytes::from("b")).await.unwrap();
        store.put("c", Bytes::from("c")).await.unwrap();

        // Backdate "a" so it is the eviction candidate.
        let meta_path = store.meta_path("a");
        let meta = EntryMeta {
            touched_at: 1,
            size: 1,
        };
        FsStore::write_meta(&meta_path, &meta).await.unwrap();

        store.prune(2).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.get("b").await.unwrap().is_some());
        assert!(store.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn prune_below_capacity_is_noop() {
        let (_dir, store) = store().await;

        store.put("a", Bytes::from("a")).await.unwrap();
        store.prune(5).await.unwrap();
        assert!(store.get("a").await.unwrap().is_some());
    }
}
