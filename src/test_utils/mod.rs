//! Test utilities for discovery-feed
//!
//! Scripted doubles for every request capability, so tests can control when
//! a request resolves, how it fails, and how often it was called:
//!
//! - [`ScriptedListing`] - primary list endpoint with gates and a failure switch
//! - [`ScriptedSchedules`] - batched schedule endpoint recording each batch
//! - [`ScriptedAssessments`] - per-item endpoint with per-key failures
//! - [`ScriptedLocation`] - location provider with a gated fresh fix
//!
//! A [`Gate`] holds matching requests until it is released or dropped.
//!
//! # Example
//!
//! ```rust,no_run
//! use discovery_feed::core::ResourceKind;
//! use discovery_feed::test_utils::{ScriptedListing, resources};
//!
//! # async fn example() {
//! let listing = ScriptedListing::from_resources(resources(ResourceKind::Restaurant, 5));
//! let gate = listing.gate(|request| request.page == 1);
//! // ... start a pipeline; page 1 is held until:
//! gate.release();
//! # }
//! ```

use crate::core::{Assessment, FeedError, GeoPoint, Resource, ResourceKind, Schedule};
use crate::request::{
    BatchDatasetEndpoint, ListRequest, LocationPermission, LocationProvider, Page, PageMeta,
    PerItemDatasetEndpoint, RequestFuture, ResourceListEndpoint,
};
use chrono::NaiveDate;
use futures::FutureExt;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, Once};
use tokio::sync::oneshot;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG` if set; without either,
/// tests run without a subscriber.
///
/// ```bash
/// RUST_LOG=discovery_feed=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// `count` resources of `kind` with ids `{kind}-{i}`, schedule keys `s-{i}`,
/// place ids `p-{i}`, and positions spaced 1 km apart going north from
/// (48.0, 2.0).
#[must_use]
pub fn resources(kind: ResourceKind, count: usize) -> Vec<Resource> {
    (0..count)
        .map(|i| {
            Resource::new(format!("{kind}-{i}"), kind, format!("{kind} {i}"))
                .with_location(GeoPoint::new(48.0 + i as f64 * 0.009, 2.0))
                .with_schedule_key(format!("s-{i}"))
                .with_place_id(format!("p-{i}"))
        })
        .collect()
}

/// Holds requests matched by [`ScriptedListing::gate`] or
/// [`ScriptedLocation::gate`] until released. Dropping it releases too.
#[derive(Debug)]
pub struct Gate {
    release: oneshot::Sender<()>,
}

impl Gate {
    fn new() -> (Self, oneshot::Receiver<()>) {
        let (release, held) = oneshot::channel();
        (
            Self {
                release,
            },
            held,
        )
    }

    /// Lets the held request resolve.
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

type Matcher = Box<dyn Fn(&ListRequest) -> bool + Send + Sync>;
type Responder = Box<dyn Fn(&ListRequest) -> Result<Page<Resource>, FeedError> + Send + Sync>;

/// Scripted [`ResourceListEndpoint`].
pub struct ScriptedListing {
    responder: Responder,
    gates: Mutex<Vec<(Matcher, oneshot::Receiver<()>)>>,
    failure: Mutex<Option<FeedError>>,
    calls: Mutex<Vec<ListRequest>>,
    details: Mutex<HashMap<String, Resource>>,
}

impl ScriptedListing {
    /// Answers every request with `responder`.
    pub fn new(
        responder: impl Fn(&ListRequest) -> Result<Page<Resource>, FeedError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            gates: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            details: Mutex::new(HashMap::new()),
        }
    }

    /// Pages through `items` of the requested kind, sorted by distance when
    /// the request carries a location.
    #[must_use]
    pub fn from_resources(items: Vec<Resource>) -> Self {
        Self::new(move |request| Ok(page_of(&items, request)))
    }

    /// Fails every request with `error` until [`recover`](Self::recover).
    pub fn fail_with(&self, error: FeedError) {
        *lock(&self.failure) = Some(error);
    }

    /// Stops failing.
    pub fn recover(&self) {
        *lock(&self.failure) = None;
    }

    /// Holds the next request matching `matcher` until the gate is released.
    pub fn gate(&self, matcher: impl Fn(&ListRequest) -> bool + Send + Sync + 'static) -> Gate {
        let (gate, held) = Gate::new();
        lock(&self.gates).push((Box::new(matcher), held));
        gate
    }

    /// Makes `resource` available through `retrieve_one`.
    pub fn add_detail(&self, resource: Resource) {
        lock(&self.details).insert(resource.id.clone(), resource);
    }

    /// Requests received so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<ListRequest> {
        lock(&self.calls).clone()
    }

    /// Number of requests received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    fn take_gate(&self, request: &ListRequest) -> Option<oneshot::Receiver<()>> {
        let mut gates = lock(&self.gates);
        let index = gates.iter().position(|(matcher, _)| matcher(request))?;
        Some(gates.remove(index).1)
    }
}

/// One page of `items` for `request`.
#[must_use]
pub fn page_of(items: &[Resource], request: &ListRequest) -> Page<Resource> {
    let mut matching: Vec<&Resource> = items.iter().filter(|r| r.kind == request.kind).collect();
    if let Some(origin) = request.location {
        matching.sort_by(|a, b| {
            let da = a.location.map_or(f64::MAX, |l| origin.distance_to(&l));
            let db = b.location.map_or(f64::MAX, |l| origin.distance_to(&l));
            da.partial_cmp(&db).unwrap_or(CmpOrdering::Equal)
        });
    }

    let per_page = request.per_page.max(1) as usize;
    let start = (request.page.max(1) as usize - 1) * per_page;
    let page: Vec<Resource> = matching.iter().skip(start).take(per_page).map(|r| (*r).clone()).collect();
    let has_next = start + page.len() < matching.len();
    Page::new(page, PageMeta::new(request.page, has_next))
}

impl ResourceListEndpoint for ScriptedListing {
    fn retrieve(&self, request: ListRequest) -> RequestFuture<'_, Page<Resource>> {
        lock(&self.calls).push(request.clone());
        let gate = self.take_gate(&request);
        async move {
            if let Some(held) = gate {
                let _ = held.await;
            }
            if let Some(error) = lock(&self.failure).clone() {
                return Err(error);
            }
            (self.responder)(&request)
        }
        .boxed()
    }

    fn retrieve_one(&self, kind: ResourceKind, id: String) -> RequestFuture<'_, Option<Resource>> {
        async move { Ok(lock(&self.details).get(&id).filter(|r| r.kind == kind).cloned()) }.boxed()
    }
}

/// Scripted [`BatchDatasetEndpoint`] serving schedules by key.
#[derive(Default)]
pub struct ScriptedSchedules {
    schedules: HashMap<String, Schedule>,
    fail: bool,
    batches: Mutex<Vec<Vec<String>>>,
}

impl ScriptedSchedules {
    /// Serves `schedules`.
    #[must_use]
    pub fn new(schedules: Vec<Schedule>) -> Self {
        Self {
            schedules: schedules.into_iter().map(|s| (s.restaurant_key.clone(), s)).collect(),
            ..Self::default()
        }
    }

    /// A schedule with no slots for every key in `keys`.
    #[must_use]
    pub fn for_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(
            keys.into_iter()
                .map(|key| Schedule {
                    restaurant_key: key.to_string(),
                    slots: Vec::new(),
                })
                .collect(),
        )
    }

    /// Fails every batch.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Key lists of every batch request received.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<String>> {
        lock(&self.batches).clone()
    }
}

impl BatchDatasetEndpoint for ScriptedSchedules {
    fn batch(&self, keys: Vec<String>, _reference_date: NaiveDate) -> RequestFuture<'_, Vec<Schedule>> {
        lock(&self.batches).push(keys.clone());
        async move {
            if self.fail {
                return Err(FeedError::network("schedule batch", "service unavailable"));
            }
            Ok(keys.iter().filter_map(|key| self.schedules.get(key).cloned()).collect())
        }
        .boxed()
    }
}

/// Scripted [`PerItemDatasetEndpoint`] with per-key failures.
#[derive(Default)]
pub struct ScriptedAssessments {
    assessments: HashMap<String, Assessment>,
    failing: HashSet<String>,
    requests: AtomicUsize,
    keys: Mutex<Vec<String>>,
}

impl ScriptedAssessments {
    /// Serves `assessments`.
    #[must_use]
    pub fn new(assessments: Vec<Assessment>) -> Self {
        Self {
            assessments: assessments.into_iter().map(|a| (a.place_id.clone(), a)).collect(),
            ..Self::default()
        }
    }

    /// A rating of 4.0 from 10 reviews for every key in `keys`.
    #[must_use]
    pub fn for_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(
            keys.into_iter()
                .map(|key| Assessment {
                    place_id: key.to_string(),
                    rating: 4.0,
                    count: 10,
                })
                .collect(),
        )
    }

    /// Fails requests for `key`.
    #[must_use]
    pub fn failing_for(mut self, key: impl Into<String>) -> Self {
        self.failing.insert(key.into());
        self
    }

    /// Number of requests received.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Keys requested so far, in call order.
    #[must_use]
    pub fn requested_keys(&self) -> Vec<String> {
        lock(&self.keys).clone()
    }
}

impl PerItemDatasetEndpoint for ScriptedAssessments {
    fn retrieve(&self, item_key: String) -> RequestFuture<'_, Vec<Assessment>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        lock(&self.keys).push(item_key.clone());
        async move {
            if self.failing.contains(&item_key) {
                return Err(FeedError::network(format!("assessment {item_key}"), "timed out"));
            }
            Ok(self.assessments.get(&item_key).cloned().into_iter().collect())
        }
        .boxed()
    }
}

/// Scripted [`LocationProvider`].
pub struct ScriptedLocation {
    permission: LocationPermission,
    last_known: Option<GeoPoint>,
    fresh: Option<GeoPoint>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    fetches: AtomicUsize,
}

impl ScriptedLocation {
    /// Permission granted, nothing known yet, `fresh` returned by a fetch.
    #[must_use]
    pub fn fresh(fresh: GeoPoint) -> Self {
        Self {
            permission: LocationPermission::Granted,
            last_known: None,
            fresh: Some(fresh),
            gate: Mutex::new(None),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Permission granted but every fetch fails.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            fresh: None,
            ..Self::fresh(GeoPoint::new(0.0, 0.0))
        }
    }

    /// Reports `point` as already known.
    #[must_use]
    pub const fn with_last_known(mut self, point: GeoPoint) -> Self {
        self.last_known = Some(point);
        self
    }

    /// Reports `permission`.
    #[must_use]
    pub const fn with_permission(mut self, permission: LocationPermission) -> Self {
        self.permission = permission;
        self
    }

    /// Holds the next fetch until the gate is released.
    pub fn gate(&self) -> Gate {
        let (gate, held) = Gate::new();
        *lock(&self.gate) = Some(held);
        gate
    }

    /// Number of fresh fixes requested.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl LocationProvider for ScriptedLocation {
    fn permission(&self) -> LocationPermission {
        self.permission
    }

    fn last_known(&self) -> Option<GeoPoint> {
        self.last_known
    }

    fn fetch_location(&self) -> RequestFuture<'_, GeoPoint> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.gate).take();
        async move {
            if let Some(held) = gate {
                let _ = held.await;
            }
            self.fresh.ok_or_else(|| FeedError::LocationUnavailable {
                reason: "no fix".to_string(),
            })
        }
        .boxed()
    }
}
