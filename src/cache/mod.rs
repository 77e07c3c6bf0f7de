//! Local cache for resources and dependent-dataset containers.
//!
//! The cache is what lets a screen render content before any network round
//! trip. It is split into two layers:
//!
//! - [`CacheStore`] is the raw persistence capability: per-kind, optionally
//!   partitioned get/put of [`CacheRecord`]s. Stores may fail.
//! - [`Cache`] is the typed facade used by the pipeline. It never fails
//!   observably: store errors and undecodable records are logged at `warn`
//!   and read as "nothing cached".
//!
//! # Upsert Semantics
//!
//! `put` is an idempotent upsert keyed by record id. An incoming record with
//! a known id replaces the stored one in place (last write wins); unknown ids
//! are appended. Records are never removed, only superseded.
//!
//! # Partitions
//!
//! The optional `key` selects a partition within a kind. The pipeline uses the
//! query scope (see [`QuerySession::cache_key`]) so cached restaurants for one
//! city are not rendered for another. `None` is the unpartitioned set.
//!
//! # Stores
//!
//! - [`MemoryCacheStore`] - `DashMap`-backed, process lifetime
//! - [`FileCacheStore`] - one JSON file per partition, atomic rewrites
//!
//! # Examples
//!
//! ```rust,no_run
//! use discovery_feed::cache::{Cache, CacheKind};
//! use discovery_feed::core::{Resource, ResourceKind};
//!
//! # async fn example() {
//! let cache = Cache::in_memory();
//! let items = vec![Resource::new("r-1", ResourceKind::Restaurant, "Trattoria")];
//! cache.put(CacheKind::Restaurants, Some("city=1"), &items).await;
//!
//! let cached: Vec<Resource> = cache.get(CacheKind::Restaurants, Some("city=1")).await;
//! assert_eq!(cached.len(), 1);
//! # }
//! ```
//!
//! [`QuerySession::cache_key`]: crate::session::QuerySession::cache_key

pub mod file;
pub mod memory;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;

use crate::core::{Assessment, FeedError, Resource, ResourceKind, Schedule};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Kind of cached collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// Restaurant resources
    Restaurants,
    /// Event resources
    Events,
    /// Schedule dataset container
    Schedules,
    /// Assessment dataset container
    Assessments,
}

impl CacheKind {
    /// The cache kind holding resources of `kind`.
    #[must_use]
    pub const fn for_resources(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Restaurant => CacheKind::Restaurants,
            ResourceKind::Event => CacheKind::Events,
        }
    }

    /// Stable name used for directories and log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Restaurants => "restaurants",
            CacheKind::Events => "events",
            CacheKind::Schedules => "schedules",
            CacheKind::Assessments => "assessments",
        }
    }
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored value with its upsert identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Identity used for last-write-wins upserts
    pub id: String,
    /// Encoded value
    pub payload: serde_json::Value,
}

/// Raw persistence capability.
///
/// Implementations must allow concurrent `get`/`put` from multiple tasks.
pub trait CacheStore: Send + Sync {
    /// Reads every record of `kind` in partition `key`. A missing partition is
    /// an empty result, not an error.
    fn get<'a>(
        &'a self,
        kind: CacheKind,
        key: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<CacheRecord>, FeedError>>;

    /// Upserts `records` into partition `key` of `kind`.
    fn put<'a>(
        &'a self,
        kind: CacheKind,
        key: Option<&'a str>,
        records: Vec<CacheRecord>,
    ) -> BoxFuture<'a, Result<(), FeedError>>;
}

/// Values that can live in the cache.
pub trait Cached: Serialize + DeserializeOwned + Send + Sync {
    /// Upsert identity.
    fn cache_id(&self) -> String;
}

impl Cached for Resource {
    fn cache_id(&self) -> String {
        self.id.clone()
    }
}

impl Cached for Schedule {
    fn cache_id(&self) -> String {
        self.restaurant_key.clone()
    }
}

impl Cached for Assessment {
    fn cache_id(&self) -> String {
        self.place_id.clone()
    }
}

/// Applies last-write-wins upserts of `incoming` onto `existing`.
///
/// Known ids are replaced in place so the cached order stays stable; new ids
/// are appended in incoming order.
pub fn upsert_records(existing: &mut Vec<CacheRecord>, incoming: Vec<CacheRecord>) {
    for record in incoming {
        match existing.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => existing.push(record),
        }
    }
}

/// Typed, infallible facade over a [`CacheStore`].
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

impl Cache {
    /// Wraps a store.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
        }
    }

    /// A cache backed by a fresh [`MemoryCacheStore`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()))
    }

    /// Reads and decodes every cached value of `kind` in partition `key`.
    ///
    /// Never fails: a store error yields an empty list and an undecodable
    /// record is skipped. Both are logged.
    pub async fn get<T: Cached>(&self, kind: CacheKind, key: Option<&str>) -> Vec<T> {
        let records = match self.store.get(kind, key).await {
            Ok(records) => records,
            Err(e) => {
                warn!(kind = %kind, key = ?key, error = %e, "Cache read failed, treating as miss");
                return Vec::new();
            }
        };

        records
            .into_iter()
            .filter_map(|record| match serde_json::from_value::<T>(record.payload) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(kind = %kind, id = %record.id, error = %e, "Skipping undecodable cache record");
                    None
                }
            })
            .collect()
    }

    /// Encodes and upserts `items` into partition `key` of `kind`.
    ///
    /// Failures are logged and otherwise ignored.
    pub async fn put<T: Cached>(&self, kind: CacheKind, key: Option<&str>, items: &[T]) {
        if items.is_empty() {
            return;
        }

        let records: Vec<CacheRecord> = items
            .iter()
            .filter_map(|item| match serde_json::to_value(item) {
                Ok(payload) => Some(CacheRecord {
                    id: item.cache_id(),
                    payload,
                }),
                Err(e) => {
                    warn!(kind = %kind, id = %item.cache_id(), error = %e, "Failed to encode cache record");
                    None
                }
            })
            .collect();

        let count = records.len();
        match self.store.put(kind, key, records).await {
            Ok(()) => debug!(kind = %kind, key = ?key, count, "Cache write complete"),
            Err(e) => warn!(kind = %kind, key = ?key, error = %e, "Cache write failed, ignoring"),
        }
    }
}
