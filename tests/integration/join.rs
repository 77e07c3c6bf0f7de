//! Dependent dataset joins under partial failure.

use crate::common::{Backend, next_batch, no_location, options, reference_date};
use discovery_feed::core::{Resource, ResourceKind};
use discovery_feed::join::{JoinEngine, assemble};
use discovery_feed::pipeline::{AggregationPipeline, RenderSource};
use discovery_feed::session::QuerySession;
use discovery_feed::test_utils::{ScriptedAssessments, ScriptedSchedules, resources};
use std::sync::Arc;

fn keys(items: &[Resource], key_of: fn(&Resource) -> Option<&str>) -> Vec<String> {
    items.iter().filter_map(|r| key_of(r).map(str::to_string)).collect()
}

#[tokio::test]
async fn test_failed_assessments_only_affect_their_items() {
    let items = resources(ResourceKind::Restaurant, 5);
    let place_ids = keys(&items, Resource::place_id);
    let assessments = Arc::new(
        ScriptedAssessments::for_keys(place_ids.iter().map(String::as_str))
            .failing_for("p-1")
            .failing_for("p-3"),
    );
    let engine = JoinEngine::new().with_assessments(assessments.clone()).with_fan_out_limit(2);

    let datasets = engine.join(&items, reference_date()).await;
    assert_eq!(assessments.request_count(), 5);
    assert_eq!(datasets.assessments.len(), 3);

    let joined = assemble(items, &datasets, None);
    let rated: Vec<&str> =
        joined.iter().filter(|item| item.assessment.is_some()).map(|item| item.id()).collect();
    assert_eq!(rated, ["restaurant-0", "restaurant-2", "restaurant-4"]);
    assert!(joined.iter().all(|item| item.schedule.is_none()));
}

#[tokio::test]
async fn test_failed_schedule_batch_degrades_to_empty() {
    let items = resources(ResourceKind::Restaurant, 4);
    let place_ids = keys(&items, Resource::place_id);
    let schedules = Arc::new(ScriptedSchedules::failing());
    let engine = JoinEngine::new()
        .with_schedules(schedules.clone())
        .with_assessments(Arc::new(ScriptedAssessments::for_keys(place_ids.iter().map(String::as_str))));

    let datasets = engine.join(&items, reference_date()).await;
    assert!(datasets.schedules.is_empty());
    assert_eq!(datasets.assessments.len(), 4);
    assert_eq!(schedules.batches(), vec![vec!["s-0", "s-1", "s-2", "s-3"]]);
}

#[tokio::test]
async fn test_duplicate_and_blank_keys_are_requested_once() {
    let items = vec![
        Resource::new("a", ResourceKind::Restaurant, "A").with_place_id("p-1").with_schedule_key("s-1"),
        Resource::new("b", ResourceKind::Restaurant, "B").with_place_id("p-1").with_schedule_key("s-1"),
        Resource::new("c", ResourceKind::Restaurant, "C").with_place_id("  ").with_schedule_key(""),
        Resource::new("d", ResourceKind::Restaurant, "D"),
    ];
    let schedules = Arc::new(ScriptedSchedules::for_keys(["s-1"]));
    let assessments = Arc::new(ScriptedAssessments::for_keys(["p-1"]));
    let engine = JoinEngine::new().with_schedules(schedules.clone()).with_assessments(assessments.clone());

    let datasets = engine.join(&items, reference_date()).await;
    assert_eq!(schedules.batches(), vec![vec!["s-1"]]);
    assert_eq!(assessments.requested_keys(), ["p-1"]);

    let joined = assemble(items, &datasets, None);
    assert!(joined[0].assessment.is_some() && joined[1].assessment.is_some());
    assert!(joined[2].assessment.is_none() && joined[2].schedule.is_none());
    assert!(joined[3].assessment.is_none());
}

#[tokio::test]
async fn test_list_renders_when_every_dataset_fails() {
    let mut backend = Backend::new(resources(ResourceKind::Restaurant, 3), no_location());
    backend.schedules = Arc::new(ScriptedSchedules::failing());
    backend.assessments = Arc::new(
        ScriptedAssessments::default().failing_for("p-0").failing_for("p-1").failing_for("p-2"),
    );
    let (pipeline, mut renders) = AggregationPipeline::new(backend.services(), options(20));

    pipeline.load_resources(QuerySession::new(ResourceKind::Restaurant));
    let batch = next_batch(&mut renders).await;
    assert_eq!(batch.source, RenderSource::Baseline);
    assert_eq!(batch.items.len(), 3);
    assert!(batch.items.iter().all(|item| item.schedule.is_none() && item.assessment.is_none()));
}
