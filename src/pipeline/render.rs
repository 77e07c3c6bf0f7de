//! Render events and the generation gate.
//!
//! Every render a pipeline produces passes through one [`RenderGate`], which
//! decides under a single lock whether the result may still be shown and, if
//! so, enqueues it on the rendering channel. Deciding and enqueueing under the
//! same lock that bumps the generation means that once
//! [`RenderGate::begin`] returns, nothing from an earlier generation can reach
//! the channel.
//!
//! Within one generation the gate also enforces:
//!
//! - a cache render is dropped once any network result was rendered;
//! - a baseline render is dropped once the geo-upgrade rendered.

use super::PipelineState;
use crate::core::{FeedError, FeedItem, GeoPoint};
use crate::request::PageMeta;
use crate::session::{Generation, QuerySession};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Where a rendered list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderSource {
    /// Local cache, before any network round trip
    Cache,
    /// Baseline fetch with the last-known location (possibly none)
    Baseline,
    /// Second fetch with a fresh device location
    Upgrade,
}

/// A list ready to be shown.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderBatch {
    /// Run that produced the list
    pub generation: Generation,
    /// Origin of the data
    pub source: RenderSource,
    /// Items in display order
    pub items: Vec<FeedItem>,
    /// First-page metadata; absent for cache renders
    pub page: Option<PageMeta>,
    /// Location distances were computed from
    pub origin: Option<GeoPoint>,
    /// Query of the run that produced the list
    pub session: Option<QuerySession>,
}

impl RenderBatch {
    /// A batch with no page metadata or origin.
    #[must_use]
    pub const fn new(generation: Generation, source: RenderSource, items: Vec<FeedItem>) -> Self {
        Self {
            generation,
            source,
            items,
            page: None,
            origin: None,
            session: None,
        }
    }

    /// Attaches page metadata.
    #[must_use]
    pub const fn with_page(mut self, page: PageMeta) -> Self {
        self.page = Some(page);
        self
    }

    /// Attaches the distance origin.
    #[must_use]
    pub const fn with_origin(mut self, origin: Option<GeoPoint>) -> Self {
        self.origin = origin;
        self
    }

    /// Attaches the query the list was fetched for.
    #[must_use]
    pub fn with_session(mut self, session: QuerySession) -> Self {
        self.session = Some(session);
        self
    }

    /// Whether this list came from the local cache.
    #[must_use]
    pub fn is_from_cache(&self) -> bool {
        self.source == RenderSource::Cache
    }
}

/// Message delivered to the rendering context.
#[derive(Debug, Clone)]
pub enum RenderEvent {
    /// Replace the displayed list
    Resources(RenderBatch),
    /// The primary fetch failed; keep what is displayed and offer a retry
    Failed {
        /// Run that failed
        generation: Generation,
        /// The failure
        error: Arc<FeedError>,
    },
}

impl RenderEvent {
    /// Generation the event belongs to.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        match self {
            RenderEvent::Resources(batch) => batch.generation,
            RenderEvent::Failed { generation, .. } => *generation,
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    generation: Generation,
    network_rendered: bool,
    upgrade_rendered: bool,
}

/// Serializes renders and drops stale ones.
#[derive(Debug)]
pub struct RenderGate {
    state: Mutex<GateState>,
    sink: mpsc::UnboundedSender<RenderEvent>,
    status: watch::Sender<PipelineState>,
}

impl RenderGate {
    /// Creates a gate delivering to `sink`, starting at generation 0.
    #[must_use]
    pub fn new(sink: mpsc::UnboundedSender<RenderEvent>) -> Self {
        let (status, _) = watch::channel(PipelineState::default());
        Self {
            state: Mutex::new(GateState::default()),
            sink,
            status,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new generation in `initial` state and returns its id.
    pub fn begin(&self, initial: PipelineState) -> Generation {
        let mut state = self.lock();
        state.generation += 1;
        state.network_rendered = false;
        state.upgrade_rendered = false;
        self.status.send_replace(initial);
        state.generation
    }

    /// The newest generation.
    #[must_use]
    pub fn current(&self) -> Generation {
        self.lock().generation
    }

    /// Whether `generation` is the newest.
    #[must_use]
    pub fn is_current(&self, generation: Generation) -> bool {
        self.current() == generation
    }

    /// Current pipeline state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.status.borrow()
    }

    /// Watches pipeline state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.status.subscribe()
    }

    /// Moves the pipeline to `next` if `generation` is current.
    pub fn transition(&self, generation: Generation, next: PipelineState) -> bool {
        let state = self.lock();
        if state.generation != generation {
            return false;
        }
        self.status.send_replace(next);
        true
    }

    /// Enqueues `batch` if it may still be shown. Returns whether it was.
    pub fn render(&self, batch: RenderBatch) -> bool {
        let mut state = self.lock();
        let generation = batch.generation;

        if state.generation != generation {
            debug!(generation, current = state.generation, source = ?batch.source, "Dropping stale render");
            return false;
        }

        match batch.source {
            RenderSource::Cache if state.network_rendered => {
                debug!(generation, "Dropping cache render after network render");
                return false;
            }
            RenderSource::Baseline if state.upgrade_rendered => {
                debug!(generation, "Dropping baseline render after geo-upgrade render");
                return false;
            }
            RenderSource::Cache => {}
            RenderSource::Baseline => state.network_rendered = true,
            RenderSource::Upgrade => {
                state.network_rendered = true;
                state.upgrade_rendered = true;
            }
        }

        debug!(generation, source = ?batch.source, count = batch.items.len(), "Rendering");
        self.deliver(RenderEvent::Resources(batch))
    }

    /// Reports a retriable failure for `generation` and returns the pipeline to
    /// idle. Dropped if the generation is stale.
    pub fn fail(&self, generation: Generation, error: FeedError) -> bool {
        let state = self.lock();
        if state.generation != generation {
            debug!(generation, current = state.generation, "Dropping stale failure");
            return false;
        }

        self.status.send_replace(PipelineState::Idle {
            retry_available: true,
        });
        self.deliver(RenderEvent::Failed {
            generation,
            error: Arc::new(error),
        })
    }

    fn deliver(&self, event: RenderEvent) -> bool {
        if self.sink.send(event).is_err() {
            debug!("Render receiver closed, dropping event");
            return false;
        }
        true
    }
}
