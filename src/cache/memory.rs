//! In-memory cache store.
//!
//! Partitions live in a `DashMap` so concurrent readers and writers on
//! different partitions never contend, and a writer only locks the shard that
//! holds its partition.

use super::{CacheKind, CacheRecord, CacheStore, upsert_records};
use crate::core::FeedError;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;

type PartitionKey = (CacheKind, Option<String>);

/// Process-lifetime [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    partitions: DashMap<PartitionKey, Vec<CacheRecord>>,
}

impl MemoryCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held in one partition.
    #[must_use]
    pub fn len(&self, kind: CacheKind, key: Option<&str>) -> usize {
        self.partitions.get(&(kind, key.map(str::to_string))).map_or(0, |records| records.len())
    }

    /// Whether a partition holds no records.
    #[must_use]
    pub fn is_empty(&self, kind: CacheKind, key: Option<&str>) -> bool {
        self.len(kind, key) == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get<'a>(
        &'a self,
        kind: CacheKind,
        key: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<CacheRecord>, FeedError>> {
        let records = self
            .partitions
            .get(&(kind, key.map(str::to_string)))
            .map(|records| records.clone())
            .unwrap_or_default();
        async move { Ok(records) }.boxed()
    }

    fn put<'a>(
        &'a self,
        kind: CacheKind,
        key: Option<&'a str>,
        records: Vec<CacheRecord>,
    ) -> BoxFuture<'a, Result<(), FeedError>> {
        {
            let mut partition = self.partitions.entry((kind, key.map(str::to_string))).or_default();
            upsert_records(&mut partition, records);
        }
        async { Ok(()) }.boxed()
    }
}
