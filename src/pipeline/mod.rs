//! Cache-first aggregation pipeline for one list screen.
//!
//! A run of the pipeline merges four sources into renders on a single
//! channel:
//!
//! 1. the local cache for the query's scope, rendered immediately;
//! 2. a baseline page-1 fetch with whatever location is known, joined with
//!    its dependent datasets, persisted, then rendered;
//! 3. optionally, a geo-upgrade fetch with a fresh device location, rendered
//!    after the baseline settled;
//! 4. a `Failed` event when the primary fetch fails, keeping what is shown.
//!
//! # Generations
//!
//! Each run gets a new [`Generation`]. Runs are never aborted; a newer run
//! makes every render of an older one stale, and the [`RenderGate`] drops
//! stale renders under the same lock that starts a generation. Changing
//! the query while a run is in flight is therefore always safe.
//!
//! # State
//!
//! ```text
//! Idle ──► CacheRendering ──► BaselineFetching ──► (GeoUpgrading) ──► Settled
//!  ▲                                 │                    │
//!  └──────── failure (retry) ────────┴────────────────────┘
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use discovery_feed::cache::Cache;
//! use discovery_feed::core::ResourceKind;
//! use discovery_feed::join::JoinEngine;
//! use discovery_feed::pipeline::{AggregationPipeline, PipelineOptions, PipelineServices, RenderEvent};
//! use discovery_feed::request::{NoLocation, ResourceListEndpoint};
//! use discovery_feed::session::QuerySession;
//! use std::sync::Arc;
//!
//! # async fn example(listing: Arc<dyn ResourceListEndpoint>) {
//! let services = PipelineServices::new(listing, JoinEngine::new(), Arc::new(NoLocation), Cache::in_memory());
//! let (pipeline, mut renders) = AggregationPipeline::new(services, PipelineOptions::default());
//!
//! pipeline.load_resources(QuerySession::new(ResourceKind::Restaurant));
//! while let Some(event) = renders.recv().await {
//!     if let RenderEvent::Resources(batch) = event {
//!         println!("{} items (from cache: {})", batch.items.len(), batch.is_from_cache());
//!     }
//! }
//! # }
//! ```

pub mod render;
pub mod stages;

pub use render::{RenderBatch, RenderEvent, RenderGate, RenderSource};
pub use stages::{BaselineSettlement, CacheSnapshot, UpgradeOutcome};

use crate::cache::Cache;
use crate::constants::DEFAULT_PER_PAGE;
use crate::join::JoinEngine;
use crate::request::{FetchToken, LocationPermission, LocationProvider, ResourceListEndpoint};
use crate::session::{Generation, QuerySession};
use chrono::{NaiveDate, Utc};
use stages::RunContext;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

/// Observable pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No run in flight
    Idle {
        /// The last run failed and [`AggregationPipeline::retry`] will re-run it
        retry_available: bool,
    },
    /// Reading the cache
    CacheRendering,
    /// Waiting for the baseline fetch and join
    BaselineFetching,
    /// A fresh location is known and the upgraded list is being fetched
    GeoUpgrading,
    /// The last run finished and its results were rendered
    Settled,
}

impl Default for PipelineState {
    fn default() -> Self {
        PipelineState::Idle {
            retry_available: false,
        }
    }
}

impl PipelineState {
    /// Whether a run is in flight.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(
            self,
            PipelineState::CacheRendering
                | PipelineState::BaselineFetching
                | PipelineState::GeoUpgrading
        )
    }

    /// Whether a retry is available.
    #[must_use]
    pub const fn retry_available(&self) -> bool {
        matches!(
            self,
            PipelineState::Idle {
                retry_available: true
            }
        )
    }
}

/// Collaborators a pipeline reads from and writes to.
#[derive(Clone)]
pub struct PipelineServices {
    /// Primary list query
    pub listing: Arc<dyn ResourceListEndpoint>,
    /// Dependent dataset joins
    pub join: JoinEngine,
    /// Device location
    pub location: Arc<dyn LocationProvider>,
    /// Local cache
    pub cache: Cache,
}

impl PipelineServices {
    /// Bundles the collaborators.
    #[must_use]
    pub fn new(
        listing: Arc<dyn ResourceListEndpoint>,
        join: JoinEngine,
        location: Arc<dyn LocationProvider>,
        cache: Cache,
    ) -> Self {
        Self {
            listing,
            join,
            location,
            cache,
        }
    }
}

/// Tunables for pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Items per page
    pub per_page: u32,
    /// Refine the list with a fresh location when none is known at start
    pub geo_upgrade: bool,
    /// Join every dataset again for the upgraded list instead of reusing the
    /// baseline's
    pub rejoin_on_upgrade: bool,
    /// Date sent with schedule requests; today (UTC) when absent
    pub reference_date: Option<NaiveDate>,
}

impl PipelineOptions {
    /// The date sent with schedule requests.
    #[must_use]
    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date.unwrap_or_else(|| Utc::now().date_naive())
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            geo_upgrade: true,
            rejoin_on_upgrade: false,
            reference_date: None,
        }
    }
}

struct Control {
    session: Option<QuerySession>,
}

struct PipelineInner {
    services: PipelineServices,
    options: PipelineOptions,
    gate: Arc<RenderGate>,
    control: Mutex<Control>,
}

/// Runs the aggregation for one screen.
///
/// Cloning shares the same pipeline. Every operation that starts a run spawns
/// it on the current tokio runtime.
#[derive(Clone)]
pub struct AggregationPipeline {
    inner: Arc<PipelineInner>,
}

impl AggregationPipeline {
    /// Creates an idle pipeline and the receiver its renders are delivered to.
    #[must_use]
    pub fn new(
        services: PipelineServices,
        options: PipelineOptions,
    ) -> (Self, mpsc::UnboundedReceiver<RenderEvent>) {
        let (sink, renders) = mpsc::unbounded_channel();
        let pipeline = Self {
            inner: Arc::new(PipelineInner {
                services,
                options,
                gate: Arc::new(RenderGate::new(sink)),
                control: Mutex::new(Control {
                    session: None,
                }),
            }),
        };
        (pipeline, renders)
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.inner.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shows `query`.
    ///
    /// Returns `None` without doing anything if `query` equals the current
    /// query. Otherwise starts a run for it and returns its generation; any
    /// earlier run's pending renders become stale.
    pub fn load_resources(&self, query: QuerySession) -> Option<Generation> {
        let mut control = self.control();
        if control.session.as_ref() == Some(&query) {
            debug!(kind = %query.kind, "Query unchanged, skipping fetch");
            return None;
        }

        control.session = Some(query.clone());
        Some(self.start(query, true))
    }

    /// Re-runs the current query from the baseline fetch after a failure.
    ///
    /// Returns `None` when there is no query, a run is in flight, or the last
    /// run did not fail.
    pub fn retry(&self) -> Option<Generation> {
        let control = self.control();
        let query = control.session.clone()?;
        let state = self.inner.gate.state();
        if !state.retry_available() {
            debug!(?state, "Retry not available");
            return None;
        }

        info!(kind = %query.kind, "Retrying");
        Some(self.start(query, false))
    }

    /// Re-runs the current query, cache render included.
    ///
    /// Returns `None` when there is no query or a run is in flight.
    pub fn refresh(&self) -> Option<Generation> {
        let control = self.control();
        let query = control.session.clone()?;
        if self.inner.gate.state().is_running() {
            debug!("Run in flight, skipping refresh");
            return None;
        }

        Some(self.start(query, true))
    }

    /// The query being shown.
    #[must_use]
    pub fn current_query(&self) -> Option<QuerySession> {
        self.control().session.clone()
    }

    /// The newest generation; 0 before the first run.
    #[must_use]
    pub fn current_generation(&self) -> Generation {
        self.inner.gate.current()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.inner.gate.state()
    }

    /// Watches state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.inner.gate.subscribe_state()
    }

    /// Options the pipeline was built with.
    #[must_use]
    pub fn options(&self) -> &PipelineOptions {
        &self.inner.options
    }

    /// Collaborators the pipeline was built with.
    #[must_use]
    pub fn services(&self) -> &PipelineServices {
        &self.inner.services
    }

    // Called with the control lock held so generations start in call order
    fn start(&self, session: QuerySession, render_cache: bool) -> Generation {
        let initial = if render_cache {
            PipelineState::CacheRendering
        } else {
            PipelineState::BaselineFetching
        };
        let generation = self.inner.gate.begin(initial);

        let ctx = RunContext {
            services: self.inner.services.clone(),
            options: self.inner.options.clone(),
            gate: Arc::clone(&self.inner.gate),
            session,
            generation,
            reference_date: self.inner.options.reference_date(),
        };
        tokio::spawn(run(ctx, render_cache));
        generation
    }
}

async fn run(ctx: RunContext, render_cache: bool) {
    let generation = ctx.generation;
    info!(generation, kind = %ctx.session.kind, key = %ctx.session.cache_key(), "Pipeline run started");

    if render_cache {
        let snapshot = stages::read_cache(&ctx).await;
        if !snapshot.is_empty() {
            ctx.gate.render(
                RenderBatch::new(generation, RenderSource::Cache, snapshot.items).with_session(ctx.session.clone()),
            );
        }
        ctx.gate.transition(generation, PipelineState::BaselineFetching);
    }

    let location = ctx.session.location.or_else(|| ctx.services.location.last_known());
    let upgrade = location.is_none()
        && ctx.options.geo_upgrade
        && ctx.services.location.permission() == LocationPermission::Granted;
    let token = FetchToken::new(generation);

    let (baseline, upgrade) = if upgrade {
        let (barrier_tx, barrier_rx) = oneshot::channel();
        tokio::join!(
            stages::baseline(&ctx, None, &token, Some(barrier_tx)),
            stages::geo_upgrade(&ctx, &token, barrier_rx),
        )
    } else {
        (stages::baseline(&ctx, location, &token, None).await, UpgradeOutcome::NotAttempted)
    };

    settle(&ctx, baseline, upgrade);
}

fn settle(ctx: &RunContext, baseline: BaselineSettlement, upgrade: UpgradeOutcome) {
    let generation = ctx.generation;
    let failure = match (baseline, upgrade) {
        (_, UpgradeOutcome::Rendered) => None,
        (BaselineSettlement::Failed(e), _) | (_, UpgradeOutcome::Failed(e)) => Some(e),
        _ => None,
    };

    match failure {
        Some(error) => {
            ctx.gate.fail(generation, error);
        }
        None => {
            if ctx.gate.transition(generation, PipelineState::Settled) {
                info!(generation, "Pipeline run settled");
            } else {
                debug!(generation, "Superseded run finished");
            }
        }
    }
}
