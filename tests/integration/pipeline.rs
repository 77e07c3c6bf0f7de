//! Pipeline runs end to end: cache and network ordering, generations,
//! geo-upgrade and retry.

use crate::common::{
    Backend, NORTH, WAIT, assert_no_more_renders, eventually, next_batch, next_event, no_location, options,
};
use discovery_feed::core::{FeedError, GeoPoint, ResourceKind};
use discovery_feed::pipeline::{AggregationPipeline, PipelineState, RenderEvent, RenderSource};
use discovery_feed::session::QuerySession;
use discovery_feed::test_utils::{ScriptedListing, ScriptedLocation, page_of, resources};

#[tokio::test]
async fn test_query_change_drops_results_of_previous_query() {
    let backend = Backend::new(resources(ResourceKind::Restaurant, 4), no_location());
    let held = backend.listing.gate(|request| request.tags.contains("vegan"));
    let (pipeline, mut renders) = AggregationPipeline::new(backend.services(), options(20));

    let vegan = QuerySession::new(ResourceKind::Restaurant).with_tag("vegan");
    let all = QuerySession::new(ResourceKind::Restaurant);
    assert_eq!(pipeline.load_resources(vegan.clone()), Some(1));
    eventually(|| backend.listing.call_count() == 1).await;
    assert_eq!(pipeline.load_resources(all.clone()), Some(2));

    let batch = next_batch(&mut renders).await;
    assert_eq!(batch.generation, 2);
    assert_eq!(batch.source, RenderSource::Baseline);

    // The first query's response arrives late and is persisted, never shown
    held.release();
    tokio::time::timeout(WAIT, async {
        while backend.cached(&vegan).await.is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert_no_more_renders(&mut renders).await;
    assert_eq!(pipeline.current_generation(), 2);
    assert_eq!(pipeline.current_query(), Some(all));
    assert_eq!(pipeline.state(), PipelineState::Settled);
}

#[tokio::test]
async fn test_network_render_replaces_cached_list() {
    let backend = Backend::new(resources(ResourceKind::Restaurant, 7), no_location());
    let query = QuerySession::new(ResourceKind::Restaurant).with_city("lyon");
    backend.seed_cache(&query, &resources(ResourceKind::Restaurant, 5)).await;
    let (pipeline, mut renders) = AggregationPipeline::new(backend.services(), options(20));
    let mut state = pipeline.subscribe_state();

    pipeline.load_resources(query.clone());

    let cached = next_batch(&mut renders).await;
    assert!(cached.is_from_cache());
    assert_eq!(cached.items.len(), 5);
    assert!(cached.page.is_none());
    assert!(cached.items.iter().all(|item| item.distance_meters.is_none()));
    assert_eq!(cached.session.as_ref(), Some(&query));

    let network = next_batch(&mut renders).await;
    assert_eq!(network.source, RenderSource::Baseline);
    assert_eq!(network.items.len(), 7);
    assert!(network.items.iter().all(|item| item.schedule.is_some() && item.assessment.is_some()));
    assert_eq!(network.session.as_ref(), Some(&query));

    state.wait_for(|s| *s == PipelineState::Settled).await.unwrap();
    assert_no_more_renders(&mut renders).await;
    assert_eq!(backend.cached(&query).await.len(), 7);
}

#[tokio::test]
async fn test_unchanged_query_does_not_refetch() {
    let backend = Backend::new(resources(ResourceKind::Event, 3), no_location());
    let (pipeline, mut renders) = AggregationPipeline::new(backend.services(), options(20));
    let query = QuerySession::new(ResourceKind::Event).with_tag("jazz").with_city("paris");

    assert!(pipeline.load_resources(query.clone()).is_some());
    next_batch(&mut renders).await;

    let same = QuerySession::new(ResourceKind::Event).with_city("paris").with_tag("jazz");
    assert_eq!(pipeline.load_resources(same), None);
    assert_no_more_renders(&mut renders).await;
    assert_eq!(backend.listing.call_count(), 1);
}

#[tokio::test]
async fn test_known_location_makes_single_round_trip() {
    let known = GeoPoint::new(48.0, 2.0);
    let location = ScriptedLocation::fresh(NORTH).with_last_known(known);
    let backend = Backend::new(resources(ResourceKind::Restaurant, 3), location);
    let (pipeline, mut renders) = AggregationPipeline::new(backend.services(), options(20));
    let mut state = pipeline.subscribe_state();

    pipeline.load_resources(QuerySession::new(ResourceKind::Restaurant));
    let batch = next_batch(&mut renders).await;
    assert_eq!(batch.source, RenderSource::Baseline);
    assert_eq!(batch.origin, Some(known));
    assert_eq!(batch.items[0].distance_text().as_deref(), Some("0 m"));

    state.wait_for(|s| *s == PipelineState::Settled).await.unwrap();
    assert_no_more_renders(&mut renders).await;
    assert_eq!(backend.listing.call_count(), 1);
    assert_eq!(backend.listing.calls()[0].location, Some(known));
    assert_eq!(backend.location.fetch_count(), 0);
}

#[tokio::test]
async fn test_geo_upgrade_renders_after_baseline() {
    let backend = Backend::new(resources(ResourceKind::Restaurant, 5), ScriptedLocation::fresh(NORTH));
    let fix = backend.location.gate();
    let (pipeline, mut renders) = AggregationPipeline::new(backend.services(), options(20));
    let mut state = pipeline.subscribe_state();

    pipeline.load_resources(QuerySession::new(ResourceKind::Restaurant));

    let baseline = next_batch(&mut renders).await;
    assert_eq!(baseline.source, RenderSource::Baseline);
    assert_eq!(baseline.origin, None);
    assert_eq!(baseline.items[0].id(), "restaurant-0");
    assert!(baseline.items.iter().all(|item| item.distance_meters.is_none()));

    fix.release();
    let upgraded = next_batch(&mut renders).await;
    assert_eq!(upgraded.source, RenderSource::Upgrade);
    assert_eq!(upgraded.origin, Some(NORTH));
    assert_eq!(upgraded.items[0].id(), "restaurant-4");
    let distances: Vec<f64> = upgraded.items.iter().filter_map(|item| item.distance_meters).collect();
    assert_eq!(distances.len(), 5);
    assert!(distances.windows(2).all(|pair| pair[0] <= pair[1]));

    state.wait_for(|s| *s == PipelineState::Settled).await.unwrap();
    assert_eq!(backend.listing.call_count(), 2);
    assert_eq!(backend.listing.calls()[1].location, Some(NORTH));
    // The upgraded page reuses every dataset the baseline joined
    assert_eq!(backend.assessments.request_count(), 5);
    assert_eq!(backend.schedules.batches().len(), 1);
}

#[tokio::test]
async fn test_rejoin_on_upgrade_fetches_datasets_again() {
    let backend = Backend::new(resources(ResourceKind::Restaurant, 3), ScriptedLocation::fresh(NORTH));
    let fix = backend.location.gate();
    let mut options = options(20);
    options.rejoin_on_upgrade = true;
    let (pipeline, mut renders) = AggregationPipeline::new(backend.services(), options);
    let mut state = pipeline.subscribe_state();

    pipeline.load_resources(QuerySession::new(ResourceKind::Restaurant));
    assert_eq!(next_batch(&mut renders).await.source, RenderSource::Baseline);
    fix.release();
    assert_eq!(next_batch(&mut renders).await.source, RenderSource::Upgrade);

    state.wait_for(|s| *s == PipelineState::Settled).await.unwrap();
    assert_eq!(backend.assessments.request_count(), 6);
    assert_eq!(backend.schedules.batches().len(), 2);
}

#[tokio::test]
async fn test_geo_upgrade_cancels_pending_baseline() {
    let backend = Backend::new(resources(ResourceKind::Event, 4), ScriptedLocation::fresh(NORTH));
    let _baseline = backend.listing.gate(|request| request.location.is_none());
    let (pipeline, mut renders) = AggregationPipeline::new(backend.services(), options(20));
    let mut state = pipeline.subscribe_state();

    pipeline.load_resources(QuerySession::new(ResourceKind::Event));

    let batch = next_batch(&mut renders).await;
    assert_eq!(batch.source, RenderSource::Upgrade);
    assert_eq!(batch.origin, Some(NORTH));
    assert!(batch.items.iter().all(|item| item.assessment.is_some()));

    state.wait_for(|s| *s == PipelineState::Settled).await.unwrap();
    assert_no_more_renders(&mut renders).await;
    assert_eq!(backend.listing.call_count(), 2);
}

#[tokio::test]
async fn test_unavailable_location_keeps_baseline() {
    let backend = Backend::new(resources(ResourceKind::Restaurant, 2), ScriptedLocation::unavailable());
    let (pipeline, mut renders) = AggregationPipeline::new(backend.services(), options(20));
    let mut state = pipeline.subscribe_state();

    pipeline.load_resources(QuerySession::new(ResourceKind::Restaurant));
    assert_eq!(next_batch(&mut renders).await.source, RenderSource::Baseline);

    state.wait_for(|s| *s == PipelineState::Settled).await.unwrap();
    assert_no_more_renders(&mut renders).await;
    assert_eq!(backend.location.fetch_count(), 1);
    assert_eq!(backend.listing.call_count(), 1);
}

#[tokio::test]
async fn test_failed_fetch_keeps_cache_and_offers_retry() {
    let backend = Backend::new(resources(ResourceKind::Restaurant, 3), no_location());
    let query = QuerySession::new(ResourceKind::Restaurant);
    backend.seed_cache(&query, &resources(ResourceKind::Restaurant, 2)).await;
    backend.listing.fail_with(FeedError::network("list restaurants", "connection reset"));
    let (pipeline, mut renders) = AggregationPipeline::new(backend.services(), options(20));

    pipeline.load_resources(query);
    assert!(next_batch(&mut renders).await.is_from_cache());
    match next_event(&mut renders).await {
        RenderEvent::Failed {
            generation,
            error,
        } => {
            assert_eq!(generation, 1);
            assert!(error.is_retriable());
        }
        other => panic!("expected a failure, got {other:?}"),
    }
    assert_eq!(
        pipeline.state(),
        PipelineState::Idle {
            retry_available: true
        }
    );

    backend.listing.recover();
    let mut state = pipeline.subscribe_state();
    let generation = pipeline.retry().expect("retry should be available");

    // A retry starts at the network fetch, without a second cache render
    let batch = next_batch(&mut renders).await;
    assert_eq!(batch.generation, generation);
    assert_eq!(batch.source, RenderSource::Baseline);
    assert_eq!(batch.items.len(), 3);

    state.wait_for(|s| *s == PipelineState::Settled).await.unwrap();
    assert_eq!(pipeline.retry(), None);
}

#[tokio::test]
async fn test_upgrade_failure_after_baseline_is_reported() {
    let items = resources(ResourceKind::Restaurant, 3);
    let listing = ScriptedListing::new(move |request| {
        if request.location.is_some() {
            return Err(FeedError::network(request.describe(), "gateway timeout"));
        }
        Ok(page_of(&items, request))
    });
    let backend = Backend::new(resources(ResourceKind::Restaurant, 3), ScriptedLocation::fresh(NORTH))
        .with_listing(listing);
    let fix = backend.location.gate();
    let (pipeline, mut renders) = AggregationPipeline::new(backend.services(), options(20));

    pipeline.load_resources(QuerySession::new(ResourceKind::Restaurant));
    assert_eq!(next_batch(&mut renders).await.source, RenderSource::Baseline);

    fix.release();
    assert!(matches!(next_event(&mut renders).await, RenderEvent::Failed { generation: 1, .. }));
    assert!(pipeline.state().retry_available());
}
