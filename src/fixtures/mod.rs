//! JSON fixture backend.
//!
//! [`FixtureBackend`] serves every request capability from one JSON document,
//! which lets the binary and the integration tests drive real screens without
//! a network:
//!
//! ```json
//! {
//!   "resources": [
//!     {
//!       "id": "r-1", "kind": "restaurant", "title": "Trattoria",
//!       "location": { "latitude": 48.86, "longitude": 2.35 },
//!       "schedule_key": "trattoria", "place_id": "p-1",
//!       "tags": ["italian"], "city_id": "paris"
//!     }
//!   ],
//!   "schedules": [
//!     { "restaurant_key": "trattoria", "slots": [{ "starts_at": "2026-10-15T19:00:00Z", "seats": 4 }] }
//!   ],
//!   "assessments": [{ "place_id": "p-1", "rating": 4.5, "count": 120 }]
//! }
//! ```
//!
//! Listing filters by kind, requires every selected tag, matches the city
//! when one is given, and sorts by distance when the request carries a
//! location. Schedules keep only slots on or after the reference date.

use crate::core::{Assessment, FeedError, Resource, ResourceKind, Schedule};
use crate::request::{
    BatchDatasetEndpoint, ListRequest, Page, PageMeta, PerItemDatasetEndpoint, RequestFuture,
    ResourceListEndpoint,
};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// A resource with the listing attributes the backend filters on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureResource {
    /// The resource as returned to clients
    #[serde(flatten)]
    pub resource: Resource,
    /// Tags the resource is listed under
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// City the resource belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_id: Option<String>,
}

impl FixtureResource {
    fn matches(&self, request: &ListRequest) -> bool {
        self.resource.kind == request.kind
            && request.tags.is_subset(&self.tags)
            && request.city_id.as_ref().is_none_or(|city| self.city_id.as_ref() == Some(city))
    }
}

/// Contents of a fixture file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureData {
    /// Listed resources
    #[serde(default)]
    pub resources: Vec<FixtureResource>,
    /// Schedule dataset
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    /// Assessment dataset
    #[serde(default)]
    pub assessments: Vec<Assessment>,
}

/// In-process backend serving [`FixtureData`].
#[derive(Debug, Clone, Default)]
pub struct FixtureBackend {
    data: FixtureData,
}

impl FixtureBackend {
    /// Serves `data`.
    #[must_use]
    pub const fn new(data: FixtureData) -> Self {
        Self {
            data,
        }
    }

    /// Loads a fixture file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid fixture
    /// document.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read fixtures from {}", path.display()))?;
        let data: FixtureData = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse fixtures from {}", path.display()))?;
        debug!(
            path = %path.display(),
            resources = data.resources.len(),
            schedules = data.schedules.len(),
            assessments = data.assessments.len(),
            "Fixtures loaded"
        );
        Ok(Self::new(data))
    }

    /// The served data.
    #[must_use]
    pub const fn data(&self) -> &FixtureData {
        &self.data
    }

    fn list(&self, request: &ListRequest) -> Page<Resource> {
        let mut matching: Vec<&Resource> = self
            .data
            .resources
            .iter()
            .filter(|entry| entry.matches(request))
            .map(|entry| &entry.resource)
            .collect();

        if let Some(origin) = request.location {
            // Resources without a position sort last
            matching.sort_by(|a, b| {
                let da = a.location.map(|l| origin.distance_to(&l));
                let db = b.location.map(|l| origin.distance_to(&l));
                match (da, db) {
                    (Some(da), Some(db)) => da.partial_cmp(&db).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            });
        }

        let per_page = request.per_page.max(1) as usize;
        let start = (request.page.max(1) as usize - 1) * per_page;
        let items: Vec<Resource> = matching.iter().skip(start).take(per_page).map(|r| (*r).clone()).collect();
        let has_next = start + items.len() < matching.len();
        Page::new(items, PageMeta::new(request.page, has_next))
    }
}

impl ResourceListEndpoint for FixtureBackend {
    fn retrieve(&self, request: ListRequest) -> RequestFuture<'_, Page<Resource>> {
        async move { Ok(self.list(&request)) }.boxed()
    }

    fn retrieve_one(&self, kind: ResourceKind, id: String) -> RequestFuture<'_, Option<Resource>> {
        async move {
            Ok(self
                .data
                .resources
                .iter()
                .map(|entry| &entry.resource)
                .find(|resource| resource.kind == kind && resource.id == id)
                .cloned())
        }
        .boxed()
    }
}

impl BatchDatasetEndpoint for FixtureBackend {
    fn batch(&self, keys: Vec<String>, reference_date: NaiveDate) -> RequestFuture<'_, Vec<Schedule>> {
        async move {
            let keys: BTreeSet<String> = keys.into_iter().collect();
            Ok(self
                .data
                .schedules
                .iter()
                .filter(|schedule| keys.contains(&schedule.restaurant_key))
                .map(|schedule| Schedule {
                    restaurant_key: schedule.restaurant_key.clone(),
                    slots: schedule
                        .slots
                        .iter()
                        .filter(|slot| slot.starts_at.date_naive() >= reference_date)
                        .cloned()
                        .collect(),
                })
                .collect())
        }
        .boxed()
    }
}

impl PerItemDatasetEndpoint for FixtureBackend {
    fn retrieve(&self, item_key: String) -> RequestFuture<'_, Vec<Assessment>> {
        async move {
            let found: Vec<Assessment> =
                self.data.assessments.iter().filter(|a| a.place_id == item_key).cloned().collect();
            if found.is_empty() {
                return Err(FeedError::ResourceNotFound {
                    id: item_key,
                });
            }
            Ok(found)
        }
        .boxed()
    }
}
