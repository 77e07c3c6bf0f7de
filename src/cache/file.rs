//! File-backed cache store.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/
//! ├── restaurants/
//! │   ├── _all.json
//! │   └── 3f2a...e1.json      # sha256(partition key)
//! ├── schedules/
//! └── ...
//! ```
//!
//! Each file holds the JSON array of [`CacheRecord`]s for one partition. A
//! put is a read-modify-write of the whole file, so puts to the same file are
//! serialized with a per-path async mutex and the file is replaced atomically.
//! Reads take no lock: the rename makes every read see a complete file.

use super::{CacheKind, CacheRecord, CacheStore, upsert_records};
use crate::constants::UNPARTITIONED_CACHE_FILE;
use crate::core::FeedError;
use crate::utils::fs::{atomic_write, read_optional};
use anyhow::{Context, Result};
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// [`CacheStore`] persisting partitions as JSON files.
#[derive(Debug)]
pub struct FileCacheStore {
    root: PathBuf,
    write_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl FileCacheStore {
    /// Creates a store rooted at `root`. Directories are created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_locks: DashMap::new(),
        }
    }

    /// The cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding one partition.
    #[must_use]
    pub fn partition_path(&self, kind: CacheKind, key: Option<&str>) -> PathBuf {
        let file_stem = match key {
            Some(key) => hex::encode(Sha256::digest(key.as_bytes())),
            None => UNPARTITIONED_CACHE_FILE.to_string(),
        };
        self.root.join(kind.as_str()).join(format!("{file_stem}.json"))
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.write_locks.entry(path.to_path_buf()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn read_partition(path: &Path) -> Result<Vec<CacheRecord>> {
        match read_optional(path).await? {
            Some(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse cache file {}", path.display())),
            None => Ok(Vec::new()),
        }
    }

    async fn write_partition(&self, path: PathBuf, records: Vec<CacheRecord>) -> Result<()> {
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        let mut existing = Self::read_partition(&path).await?;
        upsert_records(&mut existing, records);

        let content = serde_json::to_vec(&existing).context("Failed to serialize cache records")?;
        atomic_write(&path, &content).await
    }
}

impl CacheStore for FileCacheStore {
    fn get<'a>(
        &'a self,
        kind: CacheKind,
        key: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<CacheRecord>, FeedError>> {
        let path = self.partition_path(kind, key);
        async move {
            Self::read_partition(&path)
                .await
                .map_err(|e| FeedError::cache(format!("read {kind}"), format!("{e:#}")))
        }
        .boxed()
    }

    fn put<'a>(
        &'a self,
        kind: CacheKind,
        key: Option<&'a str>,
        records: Vec<CacheRecord>,
    ) -> BoxFuture<'a, Result<(), FeedError>> {
        let path = self.partition_path(kind, key);
        async move {
            self.write_partition(path, records)
                .await
                .map_err(|e| FeedError::cache(format!("write {kind}"), format!("{e:#}")))
        }
        .boxed()
    }
}
