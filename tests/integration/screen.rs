//! Screens: "load more", favorites broadcast and view updates.

use crate::common::{Backend, NORTH, WAIT, eventually, no_location, options};
use discovery_feed::broadcast::{Mutation, MutationBus, MutationEvent};
use discovery_feed::core::{FeedError, Resource, ResourceKind};
use discovery_feed::pagination::{LoadNextOutcome, SkipReason};
use discovery_feed::pipeline::{PipelineState, RenderSource};
use discovery_feed::screen::{ScreenController, ScreenHandle, ScreenOptions, ViewChange};
use discovery_feed::session::{Generation, QuerySession};
use discovery_feed::test_utils::{ScriptedLocation, resources};
use std::time::Duration;

fn screen_options(per_page: u32) -> ScreenOptions {
    ScreenOptions {
        pipeline: options(per_page),
        ..ScreenOptions::default()
    }
}

/// Waits until the screen shows the network result of `generation`.
async fn loaded(screen: &ScreenHandle, generation: Generation) {
    let mut views = screen.subscribe();
    tokio::time::timeout(
        WAIT,
        views.wait_for(|view| {
            view.generation == generation && view.source.is_some_and(|s| s != RenderSource::Cache)
        }),
    )
    .await
    .expect("screen did not load in time")
    .unwrap();
}

async fn settled(screen: &ScreenHandle) {
    let mut state = screen.subscribe_pipeline_state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == PipelineState::Settled))
        .await
        .expect("pipeline did not settle in time")
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_load_next_issues_one_request() {
    let backend = Backend::new(resources(ResourceKind::Restaurant, 25), no_location());
    let screen = ScreenController::spawn(backend.services(), MutationBus::default(), screen_options(10));

    let generation = screen.load_resources(QuerySession::new(ResourceKind::Restaurant)).unwrap();
    loaded(&screen, generation).await;
    assert_eq!(screen.view().items.len(), 10);

    let held = backend.listing.gate(|request| request.page == 2);
    let first = {
        let screen = screen.clone();
        tokio::spawn(async move { screen.load_next().await })
    };
    eventually(|| backend.listing.call_count() == 2).await;

    assert!(matches!(screen.load_next().await, LoadNextOutcome::Skipped(SkipReason::AlreadyLoading)));
    assert!(screen.pagination().is_loading());

    held.release();
    match first.await.unwrap() {
        LoadNextOutcome::Appended {
            items,
            meta,
            ..
        } => {
            assert_eq!(items.len(), 10);
            assert_eq!(meta.page, 2);
        }
        other => panic!("expected a page, got {other:?}"),
    }
    assert_eq!(backend.listing.call_count(), 2);

    assert!(matches!(screen.load_next().await, LoadNextOutcome::Appended { .. }));
    assert!(matches!(screen.load_next().await, LoadNextOutcome::Skipped(SkipReason::NoMorePages)));
    assert_eq!(backend.listing.call_count(), 3);

    let mut views = screen.subscribe();
    let view = views.wait_for(|view| view.items.len() == 25).await.unwrap().clone();
    assert_eq!(view.change, ViewChange::Appended {
        from: 20
    });
    let pages: Vec<u32> = backend.listing.calls().iter().map(|request| request.page).collect();
    assert_eq!(pages, [1, 2, 3]);
}

#[tokio::test]
async fn test_page_for_previous_query_is_not_appended() {
    let backend = Backend::new(resources(ResourceKind::Restaurant, 8), no_location());
    let screen = ScreenController::spawn(backend.services(), MutationBus::default(), screen_options(5));

    let first = screen.load_resources(QuerySession::new(ResourceKind::Restaurant)).unwrap();
    loaded(&screen, first).await;

    let held = backend.listing.gate(|request| request.page == 2);
    let pending = {
        let screen = screen.clone();
        tokio::spawn(async move { screen.load_next().await })
    };
    eventually(|| backend.listing.call_count() == 2).await;

    let second = screen.load_resources(QuerySession::new(ResourceKind::Restaurant).with_city("nice")).unwrap();
    loaded(&screen, second).await;
    held.release();

    assert!(matches!(pending.await.unwrap(), LoadNextOutcome::Stale));
    tokio::time::sleep(Duration::from_millis(20)).await;
    let view = screen.view();
    assert_eq!(view.generation, second);
    assert_eq!(view.items.len(), 5);
}

/// Waits until the screen shows the render of `source`.
async fn rendered(screen: &ScreenHandle, source: RenderSource) {
    let mut views = screen.subscribe();
    tokio::time::timeout(WAIT, views.wait_for(|view| view.source == Some(source)))
        .await
        .expect("render did not arrive in time")
        .unwrap();
}

#[tokio::test]
async fn test_page_for_baseline_list_is_not_appended_after_upgrade() {
    let backend = Backend::new(resources(ResourceKind::Restaurant, 6), ScriptedLocation::fresh(NORTH));
    let fix = backend.location.gate();
    let screen = ScreenController::spawn(backend.services(), MutationBus::default(), screen_options(3));

    let generation = screen.load_resources(QuerySession::new(ResourceKind::Restaurant)).unwrap();
    rendered(&screen, RenderSource::Baseline).await;

    let held = backend.listing.gate(|request| request.page == 2 && request.location.is_none());
    let pending = {
        let screen = screen.clone();
        tokio::spawn(async move { screen.load_next().await })
    };
    eventually(|| backend.listing.call_count() == 2).await;

    fix.release();
    rendered(&screen, RenderSource::Upgrade).await;
    assert!(!screen.pagination().is_loading());
    held.release();

    assert!(matches!(pending.await.unwrap(), LoadNextOutcome::Stale));
    tokio::time::sleep(Duration::from_millis(20)).await;
    let view = screen.view();
    assert_eq!(view.generation, generation);
    let ids: Vec<&str> = view.items.iter().map(|item| item.id()).collect();
    assert_eq!(ids, ["restaurant-5", "restaurant-4", "restaurant-3"]);
    assert_eq!(screen.pagination().cursor().next_page(), 2);

    // The next page continues the location-ordered list
    match screen.load_next().await {
        LoadNextOutcome::Appended {
            items,
            ..
        } => assert_eq!(items.len(), 3),
        other => panic!("expected a page, got {other:?}"),
    }
    let mut views = screen.subscribe();
    let view = tokio::time::timeout(WAIT, views.wait_for(|view| view.items.len() == 6))
        .await
        .expect("page was not appended")
        .unwrap()
        .clone();
    let ids: Vec<&str> = view.items.iter().map(|item| item.id()).collect();
    assert_eq!(ids, ["restaurant-5", "restaurant-4", "restaurant-3", "restaurant-2", "restaurant-1", "restaurant-0"]);
    let distances: Vec<f64> = view.items.iter().filter_map(|item| item.distance_meters).collect();
    assert_eq!(distances.len(), 6);
    assert!(distances.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(backend.listing.calls().last().map(|request| request.location), Some(Some(NORTH)));
}

#[tokio::test]
async fn test_abandoned_load_next_does_not_block_later_loads() {
    let backend = Backend::new(resources(ResourceKind::Restaurant, 6), no_location());
    let screen = ScreenController::spawn(backend.services(), MutationBus::default(), screen_options(3));

    let generation = screen.load_resources(QuerySession::new(ResourceKind::Restaurant)).unwrap();
    loaded(&screen, generation).await;

    let _held = backend.listing.gate(|request| request.page == 2);
    assert!(tokio::time::timeout(Duration::from_millis(30), screen.load_next()).await.is_err());
    assert!(!screen.pagination().is_loading());
    assert_eq!(screen.pagination().cursor().next_page(), 2);

    match screen.load_next().await {
        LoadNextOutcome::Appended {
            items,
            meta,
            ..
        } => {
            assert_eq!(items.len(), 3);
            assert_eq!(meta.page, 2);
        }
        other => panic!("expected a page, got {other:?}"),
    }
    let mut views = screen.subscribe();
    let view = tokio::time::timeout(WAIT, views.wait_for(|view| view.items.len() == 6))
        .await
        .expect("page was not appended")
        .unwrap()
        .clone();
    assert_eq!(view.change, ViewChange::Appended {
        from: 3
    });
}

#[tokio::test]
async fn test_failed_page_can_be_retried() {
    let backend = Backend::new(resources(ResourceKind::Event, 6), no_location());
    let screen = ScreenController::spawn(backend.services(), MutationBus::default(), screen_options(4));

    let generation = screen.load_resources(QuerySession::new(ResourceKind::Event)).unwrap();
    loaded(&screen, generation).await;

    backend.listing.fail_with(FeedError::network("page 2", "timed out"));
    assert!(matches!(screen.load_next().await, LoadNextOutcome::Failed(_)));
    assert_eq!(screen.pagination().cursor().next_page(), 2);

    backend.listing.recover();
    match screen.load_next().await {
        LoadNextOutcome::Appended {
            items,
            ..
        } => assert_eq!(items.len(), 2),
        other => panic!("expected a page, got {other:?}"),
    }
}

#[tokio::test]
async fn test_favorite_propagates_to_every_screen_without_refetch() {
    let backend = Backend::new(resources(ResourceKind::Restaurant, 4), no_location());
    let bus = MutationBus::default();
    let list = ScreenController::spawn(backend.services(), bus.clone(), screen_options(20));
    let map = ScreenController::spawn(backend.services(), bus.clone(), screen_options(20));

    let a = list.load_resources(QuerySession::new(ResourceKind::Restaurant)).unwrap();
    let b = map.load_resources(QuerySession::new(ResourceKind::Restaurant).with_city("paris")).unwrap();
    loaded(&list, a).await;
    loaded(&map, b).await;
    settled(&list).await;
    settled(&map).await;
    let calls = backend.listing.call_count();

    assert_eq!(list.set_favorite("restaurant-2", true), 2);

    for screen in [&list, &map] {
        let mut views = screen.subscribe();
        let view = tokio::time::timeout(
            WAIT,
            views.wait_for(|view| view.items.iter().any(|i| i.id() == "restaurant-2" && i.resource.favorite)),
        )
        .await
        .expect("favorite did not propagate")
        .unwrap()
        .clone();
        assert_eq!(view.change, ViewChange::ItemUpdated {
            index: 2
        });
        assert_eq!(view.items.iter().filter(|i| i.resource.favorite).count(), 1);
    }
    assert_eq!(backend.listing.call_count(), calls);
}

#[tokio::test]
async fn test_mutation_for_other_kind_is_ignored() {
    let backend = Backend::new(resources(ResourceKind::Restaurant, 2), no_location());
    let bus = MutationBus::default();
    let screen = ScreenController::spawn(backend.services(), bus.clone(), screen_options(20));
    let generation = screen.load_resources(QuerySession::new(ResourceKind::Restaurant)).unwrap();
    loaded(&screen, generation).await;

    bus.publish(ResourceKind::Event, MutationEvent::FavoriteChanged, Mutation::favorite("restaurant-0", true));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(screen.view().items.iter().all(|item| !item.resource.favorite));
}

#[tokio::test]
async fn test_favorites_screen_appends_item_favorited_elsewhere() {
    let backend = Backend::new(resources(ResourceKind::Restaurant, 2), no_location());
    let extra = Resource::new("restaurant-9", ResourceKind::Restaurant, "Bistro").with_place_id("p-0");
    backend.listing.add_detail(extra);

    let bus = MutationBus::default();
    let browse = ScreenController::spawn(backend.services(), bus.clone(), screen_options(20));
    let favorites = ScreenController::spawn(backend.services(), bus.clone(), ScreenOptions {
        fetch_missing_favorites: true,
        ..screen_options(20)
    });

    let a = browse.load_resources(QuerySession::new(ResourceKind::Restaurant).with_tag("bistro")).unwrap();
    let b = favorites.load_resources(QuerySession::new(ResourceKind::Restaurant)).unwrap();
    loaded(&browse, a).await;
    loaded(&favorites, b).await;

    // Unfavoriting something the screen does not hold changes nothing
    browse.set_favorite("restaurant-9", false);
    browse.set_favorite("restaurant-9", true);

    let mut views = favorites.subscribe();
    let view = tokio::time::timeout(WAIT, views.wait_for(|view| view.items.len() == 3))
        .await
        .expect("favorite was not appended")
        .unwrap()
        .clone();
    let appended = &view.items[2];
    assert_eq!(appended.id(), "restaurant-9");
    assert!(appended.resource.favorite);
    assert!(appended.assessment.is_some());
    assert_eq!(view.change, ViewChange::Appended {
        from: 2
    });

    // The browse screen does not fetch missing favorites
    assert_eq!(browse.view().items.len(), 2);
}

#[tokio::test]
async fn test_failure_keeps_list_and_retry_replaces_it() {
    let backend = Backend::new(resources(ResourceKind::Event, 3), no_location());
    let screen = ScreenController::spawn(backend.services(), MutationBus::default(), screen_options(20));
    let query = QuerySession::new(ResourceKind::Event);
    backend.seed_cache(&query, &resources(ResourceKind::Event, 1)).await;
    backend.listing.fail_with(FeedError::network("events", "offline"));

    let generation = screen.load_resources(query).unwrap();
    let mut views = screen.subscribe();
    let view = tokio::time::timeout(WAIT, views.wait_for(|view| view.error.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(view.generation, generation);
    assert!(view.is_from_cache());
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.change, ViewChange::Failed);

    backend.listing.recover();
    let retried = screen.retry().unwrap();
    loaded(&screen, retried).await;
    let view = screen.view();
    assert!(view.error.is_none());
    assert_eq!(view.items.len(), 3);
    assert_eq!(view.change, ViewChange::Replaced);
}
