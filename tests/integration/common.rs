//! Shared harness for integration tests.

use chrono::NaiveDate;
use discovery_feed::cache::{Cache, CacheKind};
use discovery_feed::core::{GeoPoint, Resource};
use discovery_feed::join::JoinEngine;
use discovery_feed::pipeline::{PipelineOptions, PipelineServices, RenderBatch, RenderEvent};
use discovery_feed::request::LocationPermission;
use discovery_feed::session::QuerySession;
use discovery_feed::test_utils::{
    ScriptedAssessments, ScriptedListing, ScriptedLocation, ScriptedSchedules, init_test_logging,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// North of every generated resource, so distance order is reversed.
pub const NORTH: GeoPoint = GeoPoint::new(48.05, 2.0);

pub fn reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
}

pub fn options(per_page: u32) -> PipelineOptions {
    PipelineOptions {
        per_page,
        reference_date: Some(reference_date()),
        ..PipelineOptions::default()
    }
}

/// A location provider the pipeline may not use.
pub fn no_location() -> ScriptedLocation {
    ScriptedLocation::unavailable().with_permission(LocationPermission::Denied)
}

/// Scripted backend serving `items` with a schedule and an assessment for
/// every join key.
pub struct Backend {
    pub listing: Arc<ScriptedListing>,
    pub schedules: Arc<ScriptedSchedules>,
    pub assessments: Arc<ScriptedAssessments>,
    pub location: Arc<ScriptedLocation>,
    pub cache: Cache,
}

impl Backend {
    pub fn new(items: Vec<Resource>, location: ScriptedLocation) -> Self {
        init_test_logging(None);

        let schedule_keys: Vec<String> =
            items.iter().filter_map(|r| r.schedule_key().map(str::to_string)).collect();
        let place_ids: Vec<String> = items.iter().filter_map(|r| r.place_id().map(str::to_string)).collect();

        Self {
            listing: Arc::new(ScriptedListing::from_resources(items)),
            schedules: Arc::new(ScriptedSchedules::for_keys(schedule_keys.iter().map(String::as_str))),
            assessments: Arc::new(ScriptedAssessments::for_keys(place_ids.iter().map(String::as_str))),
            location: Arc::new(location),
            cache: Cache::in_memory(),
        }
    }

    pub fn with_listing(mut self, listing: ScriptedListing) -> Self {
        self.listing = Arc::new(listing);
        self
    }

    pub fn services(&self) -> PipelineServices {
        let join = JoinEngine::new()
            .with_schedules(self.schedules.clone())
            .with_assessments(self.assessments.clone());
        PipelineServices::new(self.listing.clone(), join, self.location.clone(), self.cache.clone())
    }

    /// Seeds the resource partition of `query`.
    pub async fn seed_cache(&self, query: &QuerySession, items: &[Resource]) {
        let key = query.cache_key();
        self.cache.put(CacheKind::for_resources(query.kind), Some(&key), items).await;
    }

    pub async fn cached(&self, query: &QuerySession) -> Vec<Resource> {
        let key = query.cache_key();
        self.cache.get(CacheKind::for_resources(query.kind), Some(&key)).await
    }
}

pub async fn next_event(renders: &mut UnboundedReceiver<RenderEvent>) -> RenderEvent {
    tokio::time::timeout(WAIT, renders.recv())
        .await
        .expect("timed out waiting for a render")
        .expect("render channel closed")
}

pub async fn next_batch(renders: &mut UnboundedReceiver<RenderEvent>) -> RenderBatch {
    match next_event(renders).await {
        RenderEvent::Resources(batch) => batch,
        other => panic!("expected resources, got {other:?}"),
    }
}

/// Lets spawned tasks run, then asserts nothing else was rendered.
pub async fn assert_no_more_renders(renders: &mut UnboundedReceiver<RenderEvent>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    match renders.try_recv() {
        Err(TryRecvError::Empty) => {}
        other => panic!("unexpected render: {other:?}"),
    }
}

/// Polls `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
