//! Named pipeline stages.
//!
//! Each stage of a run is a function over a shared [`RunContext`] that returns
//! a named result instead of continuing into the next stage itself. The run
//! loop in [`super`] composes them:
//!
//! ```text
//! read_cache ──► CacheSnapshot
//! baseline ────► BaselineSettlement ──barrier──┐
//! geo_upgrade ─────────────────────────────────┴──► UpgradeOutcome
//! ```

use super::render::{RenderBatch, RenderGate, RenderSource};
use super::{PipelineOptions, PipelineServices};
use crate::cache::CacheKind;
use crate::constants::FIRST_PAGE;
use crate::core::{Assessment, FeedError, FeedItem, GeoPoint, Resource, Schedule};
use crate::join::{JoinedDatasets, assemble};
use crate::request::{FetchToken, ListRequest};
use crate::session::{Generation, QuerySession};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Everything one run needs, fixed when the run starts.
#[derive(Clone)]
pub(crate) struct RunContext {
    pub services: PipelineServices,
    pub options: PipelineOptions,
    pub gate: Arc<RenderGate>,
    pub session: QuerySession,
    pub generation: Generation,
    pub reference_date: NaiveDate,
}

impl RunContext {
    fn cache_key(&self) -> String {
        self.session.cache_key()
    }

    fn list_request(&self, location: Option<GeoPoint>) -> ListRequest {
        ListRequest::for_session(&self.session, location, FIRST_PAGE, self.options.per_page)
    }
}

/// Locally assembled list read from the cache.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    /// Cached resources with cached datasets attached, no distances
    pub items: Vec<FeedItem>,
}

impl CacheSnapshot {
    /// Whether the cache held nothing for the scope.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// How the baseline fetch ended. Sent through the completion barrier to a
/// waiting geo-upgrade.
#[derive(Debug, Clone)]
pub enum BaselineSettlement {
    /// The list resolved and was joined (whether or not the render was shown)
    Joined(JoinedDatasets),
    /// The geo-upgrade cancelled the request before it resolved
    Cancelled,
    /// The request failed
    Failed(FeedError),
}

/// How the geo-upgrade ended.
#[derive(Debug, Clone)]
pub enum UpgradeOutcome {
    /// A location was already known, permission is missing, or the upgrade is
    /// disabled
    NotAttempted,
    /// The fresh location could not be obtained; the baseline stands
    LocationUnavailable,
    /// The upgraded list was rendered
    Rendered,
    /// The upgraded list was superseded by a newer run
    Discarded,
    /// The upgrade fetch failed
    Failed(FeedError),
}

/// Reads the cached list for the run's scope.
pub(crate) async fn read_cache(ctx: &RunContext) -> CacheSnapshot {
    let key = ctx.cache_key();
    let cache = &ctx.services.cache;
    let (resources, schedules, assessments) = tokio::join!(
        cache.get::<Resource>(CacheKind::for_resources(ctx.session.kind), Some(&key)),
        cache.get::<Schedule>(CacheKind::Schedules, Some(&key)),
        cache.get::<Assessment>(CacheKind::Assessments, Some(&key)),
    );

    let datasets = JoinedDatasets::from_cached(schedules, assessments);
    debug!(generation = ctx.generation, key = %key, count = resources.len(), "Cache read");
    CacheSnapshot {
        items: assemble(resources, &datasets, None),
    }
}

/// Persists a joined list and its dataset containers for the run's scope.
pub(crate) async fn persist(ctx: &RunContext, resources: &[Resource], datasets: &JoinedDatasets) {
    let key = ctx.cache_key();
    let cache = &ctx.services.cache;
    let schedules: Vec<Schedule> = datasets.schedules.values().cloned().collect();
    let assessments: Vec<Assessment> = datasets.assessments.values().cloned().collect();

    tokio::join!(
        cache.put(CacheKind::for_resources(ctx.session.kind), Some(&key), resources),
        cache.put(CacheKind::Schedules, Some(&key), &schedules),
        cache.put(CacheKind::Assessments, Some(&key), &assessments),
    );
}

/// Fetches, joins, persists and renders page 1 with `location`.
///
/// When `barrier` is given, the settlement is sent through it before
/// returning, releasing a waiting geo-upgrade.
pub(crate) async fn baseline(
    ctx: &RunContext,
    location: Option<GeoPoint>,
    token: &FetchToken,
    barrier: Option<oneshot::Sender<BaselineSettlement>>,
) -> BaselineSettlement {
    let generation = ctx.generation;
    let request = ctx.list_request(location);
    let operation = request.describe();

    let settlement = match token.run(&operation, ctx.services.listing.retrieve(request)).await {
        Ok(page) => {
            let datasets = ctx.services.join.join(&page.items, ctx.reference_date).await;
            persist(ctx, &page.items, &datasets).await;

            let items = assemble(page.items, &datasets, location);
            ctx.gate.render(
                RenderBatch::new(generation, RenderSource::Baseline, items)
                    .with_page(page.meta)
                    .with_origin(location)
                    .with_session(ctx.session.clone()),
            );
            BaselineSettlement::Joined(datasets)
        }
        Err(e) if e.is_cancelled() => {
            debug!(generation, "Baseline cancelled by geo-upgrade");
            BaselineSettlement::Cancelled
        }
        Err(e) => {
            warn!(generation, error = %e, "Baseline fetch failed");
            BaselineSettlement::Failed(e)
        }
    };

    if let Some(barrier) = barrier {
        // The upgrade may have given up already (no location); nobody waits then
        let _ = barrier.send(settlement.clone());
    }
    settlement
}

/// Refines the list with a fresh device location.
///
/// The upgraded page is fetched concurrently with the baseline. Once it
/// resolves, a still-pending baseline is cancelled, and the upgrade waits on
/// `barrier` for the baseline to settle before joining and rendering, so its
/// render always lands after any baseline render.
pub(crate) async fn geo_upgrade(
    ctx: &RunContext,
    token: &FetchToken,
    barrier: oneshot::Receiver<BaselineSettlement>,
) -> UpgradeOutcome {
    let generation = ctx.generation;

    let origin = match ctx.services.location.fetch_location().await {
        Ok(origin) => origin,
        Err(e) => {
            debug!(generation, error = %e, "Location unavailable, skipping geo-upgrade");
            return UpgradeOutcome::LocationUnavailable;
        }
    };

    ctx.gate.transition(generation, super::PipelineState::GeoUpgrading);
    let request = ctx.list_request(Some(origin));
    let page = match ctx.services.listing.retrieve(request).await {
        Ok(page) => page,
        Err(e) => {
            warn!(generation, error = %e, "Geo-upgrade fetch failed");
            return UpgradeOutcome::Failed(e);
        }
    };

    if token.cancel_if_pending() {
        debug!(generation, "Geo-upgrade resolved first, cancelled pending baseline");
    }

    let settlement = barrier.await.unwrap_or(BaselineSettlement::Cancelled);
    let datasets = match settlement {
        BaselineSettlement::Joined(existing) if !ctx.options.rejoin_on_upgrade => {
            ctx.services.join.join_missing(&page.items, existing, ctx.reference_date).await
        }
        _ => ctx.services.join.join(&page.items, ctx.reference_date).await,
    };
    persist(ctx, &page.items, &datasets).await;

    let items = assemble(page.items, &datasets, Some(origin));
    let rendered = ctx.gate.render(
        RenderBatch::new(generation, RenderSource::Upgrade, items)
            .with_page(page.meta)
            .with_origin(Some(origin))
            .with_session(ctx.session.clone()),
    );

    if rendered {
        UpgradeOutcome::Rendered
    } else {
        UpgradeOutcome::Discarded
    }
}
