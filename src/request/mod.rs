//! Request capabilities consumed by the pipeline.
//!
//! The network transport and its serialization are external collaborators.
//! This module only fixes their shape as object-safe traits returning boxed
//! futures, so a screen can be assembled from `Arc<dyn ...>` endpoints backed
//! by HTTP in production and by scripted doubles in tests.
//!
//! # Endpoints
//!
//! - [`ResourceListEndpoint`] - the primary paged list query
//! - [`BatchDatasetEndpoint`] - schedules for many restaurant keys at once
//! - [`PerItemDatasetEndpoint`] - assessments, one request per place id
//! - [`LocationProvider`] - device location and permission
//!
//! # Cancellation
//!
//! Dropping a returned future is how a caller abandons a request. The
//! [`FetchToken`] wraps that: [`FetchToken::run`] races the request against
//! the token and drops it on cancellation.

pub mod token;

pub use token::{FetchToken, TokenState};

use crate::core::{Assessment, FeedError, GeoPoint, Resource, ResourceKind, Schedule};
use crate::session::QuerySession;
use chrono::NaiveDate;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Future returned by every endpoint.
pub type RequestFuture<'a, T> = BoxFuture<'a, Result<T, FeedError>>;

/// Parameters of one primary list request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRequest {
    /// Which resources to list
    pub kind: ResourceKind,
    /// Tag filters
    pub tags: BTreeSet<String>,
    /// City scope
    pub city_id: Option<String>,
    /// Origin for distance sorting, when known
    pub location: Option<GeoPoint>,
    /// 1-based page number
    pub page: u32,
    /// Page size
    pub per_page: u32,
}

impl ListRequest {
    /// Builds a request for `page` of `session`, with `location` as the origin.
    #[must_use]
    pub fn for_session(
        session: &QuerySession,
        location: Option<GeoPoint>,
        page: u32,
        per_page: u32,
    ) -> Self {
        Self {
            kind: session.kind,
            tags: session.tags.clone(),
            city_id: session.city_id.clone(),
            location,
            page,
            per_page,
        }
    }

    /// Short label for logs and error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("retrieve {} page {}", self.kind, self.page)
    }
}

/// Paging metadata returned with a list page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    /// The page this response holds
    pub page: u32,
    /// Whether another page follows
    pub has_next: bool,
}

impl PageMeta {
    /// Creates page metadata.
    #[must_use]
    pub const fn new(page: u32, has_next: bool) -> Self {
        Self {
            page,
            has_next,
        }
    }
}

/// One page of a list response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items in backend order
    pub items: Vec<T>,
    /// Paging metadata
    pub meta: PageMeta,
}

impl<T> Page<T> {
    /// Creates a page.
    pub const fn new(items: Vec<T>, meta: PageMeta) -> Self {
        Self {
            items,
            meta,
        }
    }
}

/// Primary paged list query.
pub trait ResourceListEndpoint: Send + Sync {
    /// Retrieves one page of resources.
    fn retrieve(&self, request: ListRequest) -> RequestFuture<'_, Page<Resource>>;

    /// Retrieves a single resource by id.
    ///
    /// Used to lazily add an item a screen does not hold yet. Endpoints without
    /// a detail route keep the default, which reports the item as unknown.
    fn retrieve_one(&self, kind: ResourceKind, id: String) -> RequestFuture<'_, Option<Resource>> {
        let _ = (kind, id);
        async { Ok(None) }.boxed()
    }
}

/// Batched dependent dataset: one request for many keys.
pub trait BatchDatasetEndpoint: Send + Sync {
    /// Retrieves schedules for `keys` eligible on `reference_date`.
    fn batch(&self, keys: Vec<String>, reference_date: NaiveDate) -> RequestFuture<'_, Vec<Schedule>>;
}

/// Fan-out dependent dataset: one request per key.
pub trait PerItemDatasetEndpoint: Send + Sync {
    /// Retrieves assessments for one place id.
    fn retrieve(&self, item_key: String) -> RequestFuture<'_, Vec<Assessment>>;
}

/// Location authorization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationPermission {
    /// The app may request the device location
    Granted,
    /// The user refused
    Denied,
    /// Not asked yet
    Undetermined,
}

/// Device location capability.
pub trait LocationProvider: Send + Sync {
    /// Current authorization state.
    fn permission(&self) -> LocationPermission;

    /// The last location fix, if any, without waiting.
    fn last_known(&self) -> Option<GeoPoint>;

    /// Requests a fresh location fix.
    fn fetch_location(&self) -> RequestFuture<'_, GeoPoint>;
}

/// A [`LocationProvider`] for contexts without a device location.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn permission(&self) -> LocationPermission {
        LocationPermission::Denied
    }

    fn last_known(&self) -> Option<GeoPoint> {
        None
    }

    fn fetch_location(&self) -> RequestFuture<'_, GeoPoint> {
        async {
            Err(FeedError::LocationUnavailable {
                reason: "no location provider".to_string(),
            })
        }
        .boxed()
    }
}

/// A [`LocationProvider`] that always reports one fixed point.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub GeoPoint);

impl LocationProvider for FixedLocation {
    fn permission(&self) -> LocationPermission {
        LocationPermission::Granted
    }

    fn last_known(&self) -> Option<GeoPoint> {
        Some(self.0)
    }

    fn fetch_location(&self) -> RequestFuture<'_, GeoPoint> {
        let point = self.0;
        async move { Ok(point) }.boxed()
    }
}
