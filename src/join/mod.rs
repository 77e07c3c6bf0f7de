//! Resource join engine.
//!
//! Given the resources of one list response, the engine fetches the dependent
//! datasets keyed off fields of those resources and returns them as one
//! [`JoinedDatasets`] value. Two strategies exist:
//!
//! - **Batched** (schedules): every distinct key goes into a single request
//!   together with a reference date.
//! - **Fan-out** (assessments): one request per distinct key, run concurrently
//!   with `buffer_unordered`, every request awaited regardless of outcome.
//!
//! # Failure Isolation
//!
//! The engine never returns an error. A failed batch request degrades the
//! whole schedule dataset to empty; a failed per-item request drops only that
//! key. Both are logged here and nowhere else. Resources without a usable key
//! are left out of the request for that dataset.
//!
//! Both branches run concurrently and [`JoinEngine::join`] returns only after
//! both resolved, so a caller never observes a partially joined result.
//!
//! # Examples
//!
//! ```rust,no_run
//! use discovery_feed::join::{JoinEngine, assemble};
//! use discovery_feed::core::{Resource, ResourceKind};
//! use chrono::NaiveDate;
//!
//! # async fn example(engine: JoinEngine) {
//! let resources = vec![
//!     Resource::new("r-1", ResourceKind::Restaurant, "Trattoria").with_place_id("p-1"),
//! ];
//! let date = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
//! let datasets = engine.join(&resources, date).await;
//! let items = assemble(resources, &datasets, None);
//! assert_eq!(items.len(), 1);
//! # }
//! ```

use crate::constants::DEFAULT_FAN_OUT_LIMIT;
use crate::core::{Assessment, FeedItem, GeoPoint, Resource, Schedule};
use crate::request::{BatchDatasetEndpoint, PerItemDatasetEndpoint};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Dependent-dataset items indexed by join key.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetIndex<T> {
    entries: HashMap<String, T>,
}

impl<T> Default for DatasetIndex<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> DatasetIndex<T> {
    /// An empty dataset.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds an index keyed by `key_of`. Later items win on duplicate keys.
    pub fn from_items(items: impl IntoIterator<Item = T>, key_of: impl Fn(&T) -> &str) -> Self {
        let mut entries = HashMap::new();
        for item in items {
            entries.insert(key_of(&item).to_string(), item);
        }
        Self {
            entries,
        }
    }

    /// Looks up one key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of joined keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key was joined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds every entry of `other`, replacing existing keys.
    pub fn extend(&mut self, other: DatasetIndex<T>) {
        self.entries.extend(other.entries);
    }

    /// The joined items, in no particular order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }
}

/// All dependent datasets joined for one resource list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinedDatasets {
    /// Schedules by restaurant key
    pub schedules: DatasetIndex<Schedule>,
    /// Assessments by place id
    pub assessments: DatasetIndex<Assessment>,
}

impl JoinedDatasets {
    /// Rebuilds datasets from cached dataset containers.
    #[must_use]
    pub fn from_cached(schedules: Vec<Schedule>, assessments: Vec<Assessment>) -> Self {
        Self {
            schedules: DatasetIndex::from_items(schedules, |s| s.restaurant_key.as_str()),
            assessments: DatasetIndex::from_items(assessments, |a| a.place_id.as_str()),
        }
    }
}

/// Collects distinct usable keys in first-seen order.
pub fn collect_keys<'a>(
    resources: &'a [Resource],
    key_of: impl Fn(&'a Resource) -> Option<&'a str>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    resources
        .iter()
        .filter_map(key_of)
        .filter(|key| seen.insert(*key))
        .map(str::to_string)
        .collect()
}

/// Fetches and merges dependent datasets for resource lists.
#[derive(Clone)]
pub struct JoinEngine {
    schedules: Option<Arc<dyn BatchDatasetEndpoint>>,
    assessments: Option<Arc<dyn PerItemDatasetEndpoint>>,
    fan_out_limit: usize,
}

impl std::fmt::Debug for JoinEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinEngine")
            .field("schedules", &self.schedules.is_some())
            .field("assessments", &self.assessments.is_some())
            .field("fan_out_limit", &self.fan_out_limit)
            .finish()
    }
}

impl Default for JoinEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinEngine {
    /// An engine with no dependent datasets; every join is empty.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schedules: None,
            assessments: None,
            fan_out_limit: DEFAULT_FAN_OUT_LIMIT,
        }
    }

    /// Enables the batched schedule dataset.
    #[must_use]
    pub fn with_schedules(mut self, endpoint: Arc<dyn BatchDatasetEndpoint>) -> Self {
        self.schedules = Some(endpoint);
        self
    }

    /// Enables the fan-out assessment dataset.
    #[must_use]
    pub fn with_assessments(mut self, endpoint: Arc<dyn PerItemDatasetEndpoint>) -> Self {
        self.assessments = Some(endpoint);
        self
    }

    /// Bounds concurrent per-item requests. Zero is treated as one.
    #[must_use]
    pub fn with_fan_out_limit(mut self, limit: usize) -> Self {
        self.fan_out_limit = limit.max(1);
        self
    }

    /// Joins every dataset for `resources`.
    pub async fn join(&self, resources: &[Resource], reference_date: NaiveDate) -> JoinedDatasets {
        let schedule_keys = collect_keys(resources, Resource::schedule_key);
        let place_ids = collect_keys(resources, Resource::place_id);
        self.join_keys(schedule_keys, place_ids, reference_date).await
    }

    /// Joins only the keys of `resources` that `existing` lacks, and returns
    /// `existing` extended with the result.
    pub async fn join_missing(
        &self,
        resources: &[Resource],
        existing: JoinedDatasets,
        reference_date: NaiveDate,
    ) -> JoinedDatasets {
        let schedule_keys: Vec<String> = collect_keys(resources, Resource::schedule_key)
            .into_iter()
            .filter(|key| !existing.schedules.contains(key))
            .collect();
        let place_ids: Vec<String> = collect_keys(resources, Resource::place_id)
            .into_iter()
            .filter(|key| !existing.assessments.contains(key))
            .collect();

        debug!(
            missing_schedules = schedule_keys.len(),
            missing_assessments = place_ids.len(),
            "Joining keys missing from reused datasets"
        );

        let delta = self.join_keys(schedule_keys, place_ids, reference_date).await;
        let mut merged = existing;
        merged.schedules.extend(delta.schedules);
        merged.assessments.extend(delta.assessments);
        merged
    }

    async fn join_keys(
        &self,
        schedule_keys: Vec<String>,
        place_ids: Vec<String>,
        reference_date: NaiveDate,
    ) -> JoinedDatasets {
        let (schedules, assessments) = tokio::join!(
            self.join_schedules(schedule_keys, reference_date),
            self.join_assessments(place_ids),
        );

        JoinedDatasets {
            schedules,
            assessments,
        }
    }

    async fn join_schedules(
        &self,
        keys: Vec<String>,
        reference_date: NaiveDate,
    ) -> DatasetIndex<Schedule> {
        let Some(endpoint) = &self.schedules else {
            return DatasetIndex::empty();
        };
        if keys.is_empty() {
            return DatasetIndex::empty();
        }

        let requested = keys.len();
        match endpoint.batch(keys, reference_date).await {
            Ok(schedules) => {
                debug!(requested, received = schedules.len(), "Schedule batch joined");
                DatasetIndex::from_items(schedules, |s| s.restaurant_key.as_str())
            }
            Err(e) => {
                warn!(requested, error = %e, "Schedule batch failed, continuing without schedules");
                DatasetIndex::empty()
            }
        }
    }

    async fn join_assessments(&self, place_ids: Vec<String>) -> DatasetIndex<Assessment> {
        let Some(endpoint) = &self.assessments else {
            return DatasetIndex::empty();
        };
        if place_ids.is_empty() {
            return DatasetIndex::empty();
        }

        let requested = place_ids.len();
        let results: Vec<(String, Option<Assessment>)> = stream::iter(place_ids)
            .map(|place_id| {
                let endpoint = Arc::clone(endpoint);
                async move {
                    match endpoint.retrieve(place_id.clone()).await {
                        Ok(assessments) => {
                            let picked = pick_assessment(&place_id, assessments);
                            (place_id, picked)
                        }
                        Err(e) => {
                            warn!(place_id = %place_id, error = %e, "Assessment request failed, skipping item");
                            (place_id, None)
                        }
                    }
                }
            })
            .buffer_unordered(self.fan_out_limit)
            .collect()
            .await;

        let joined = DatasetIndex::from_items(
            results.into_iter().filter_map(|(_, assessment)| assessment),
            |a| a.place_id.as_str(),
        );
        debug!(requested, joined = joined.len(), "Assessment fan-out joined");
        joined
    }
}

/// Picks the assessment for `place_id` out of a per-item response.
///
/// Responses normally hold one entry; a response without a matching place id
/// is treated as carrying the item's assessment under a different key, and its
/// first entry is re-keyed.
fn pick_assessment(place_id: &str, assessments: Vec<Assessment>) -> Option<Assessment> {
    let mut fallback = None;
    for assessment in assessments {
        if assessment.place_id == place_id {
            return Some(assessment);
        }
        if fallback.is_none() {
            fallback = Some(assessment);
        }
    }
    fallback.map(|mut a| {
        a.place_id = place_id.to_string();
        a
    })
}

/// Attaches joined datasets (and distance from `origin`, when given) to resources.
#[must_use]
pub fn assemble(
    resources: Vec<Resource>,
    datasets: &JoinedDatasets,
    origin: Option<GeoPoint>,
) -> Vec<FeedItem> {
    resources
        .into_iter()
        .map(|resource| {
            let schedule = resource.schedule_key().and_then(|k| datasets.schedules.get(k)).cloned();
            let assessment =
                resource.place_id().and_then(|k| datasets.assessments.get(k)).cloned();
            let distance_meters = origin
                .zip(resource.location)
                .map(|(origin, location)| origin.distance_to(&location));
            FeedItem {
                resource,
                schedule,
                assessment,
                distance_meters,
            }
        })
        .collect()
}
