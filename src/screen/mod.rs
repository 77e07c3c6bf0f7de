//! Screen controller: the in-memory list behind one discovery screen.
//!
//! [`ScreenController::spawn`] starts a single rendering task that owns the
//! screen's [`ScreenView`]. Everything that changes the list reaches that task
//! as a message and is applied in arrival order:
//!
//! - pipeline render events (replace the list, or record a failure);
//! - pages loaded through [`ScreenHandle::load_next`] (append);
//! - favorite mutations from the [`MutationBus`] (update one item in place,
//!   or append a newly favorited item the screen did not hold).
//!
//! Snapshots are published on a `watch` channel after every change, together
//! with a [`ViewChange`] describing what moved.
//!
//! # Examples
//!
//! ```rust,no_run
//! use discovery_feed::broadcast::MutationBus;
//! use discovery_feed::core::ResourceKind;
//! use discovery_feed::pipeline::PipelineServices;
//! use discovery_feed::screen::{ScreenController, ScreenOptions};
//! use discovery_feed::session::QuerySession;
//!
//! # async fn example(services: PipelineServices) {
//! let screen = ScreenController::spawn(services, MutationBus::default(), ScreenOptions::default());
//! screen.load_resources(QuerySession::new(ResourceKind::Event).with_tag("jazz"));
//!
//! let mut views = screen.subscribe();
//! while views.changed().await.is_ok() {
//!     println!("{} items", views.borrow().items.len());
//! }
//! # }
//! ```

use crate::broadcast::{Mutation, MutationBus, MutationEvent, Subscription};
use crate::core::{FeedError, FeedItem, GeoPoint, ResourceKind};
use crate::join::assemble;
use crate::pagination::{LoadNextOutcome, PaginationGuard};
use crate::pipeline::{
    AggregationPipeline, PipelineOptions, PipelineServices, PipelineState, RenderBatch, RenderEvent,
    RenderSource,
};
use crate::request::{ListRequest, Page};
use crate::session::{Generation, QuerySession};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Tunables for a screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenOptions {
    /// Options for the screen's pipeline
    pub pipeline: PipelineOptions,
    /// Fetch and append items favorited elsewhere that this screen does not
    /// hold (favorites screens)
    pub fetch_missing_favorites: bool,
}

/// What the last view update changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewChange {
    /// Nothing rendered yet
    #[default]
    Initial,
    /// The whole list was replaced
    Replaced,
    /// Items were appended starting at `from`
    Appended {
        /// Index of the first new item
        from: usize,
    },
    /// One item changed in place
    ItemUpdated {
        /// Index of the changed item
        index: usize,
    },
    /// The last run failed; the list is unchanged
    Failed,
}

/// Snapshot of a screen's list.
#[derive(Debug, Clone, Default)]
pub struct ScreenView {
    /// Generation of the displayed list
    pub generation: Generation,
    /// Items in display order
    pub items: Vec<FeedItem>,
    /// Where the displayed list came from
    pub source: Option<RenderSource>,
    /// Location distances were computed from
    pub origin: Option<GeoPoint>,
    /// Query the list belongs to
    pub query: Option<QuerySession>,
    /// Failure of the last run, cleared by the next render
    pub error: Option<Arc<FeedError>>,
    /// What the last update changed
    pub change: ViewChange,
}

impl ScreenView {
    /// Whether the displayed list came from the cache.
    #[must_use]
    pub fn is_from_cache(&self) -> bool {
        self.source == Some(RenderSource::Cache)
    }

    /// Position of the item with `id`.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }
}

enum ScreenMessage {
    Append {
        generation: Generation,
        epoch: u64,
        items: Vec<FeedItem>,
    },
    Insert {
        generation: Generation,
        item: FeedItem,
    },
}

/// Builds screens.
pub struct ScreenController;

impl ScreenController {
    /// Starts a screen's rendering task on the current tokio runtime.
    ///
    /// The task stops once every [`ScreenHandle`] clone is dropped.
    #[must_use]
    pub fn spawn(services: PipelineServices, bus: MutationBus, options: ScreenOptions) -> ScreenHandle {
        let (pipeline, renders) = AggregationPipeline::new(services, options.pipeline.clone());
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(ScreenView::default());
        let guard = Arc::new(PaginationGuard::new());

        let subscriptions: Vec<(ResourceKind, Subscription)> = ResourceKind::ALL
            .into_iter()
            .map(|kind| (kind, bus.subscribe(kind, MutationEvent::FavoriteChanged)))
            .collect();

        let task = RenderTask {
            pipeline: pipeline.clone(),
            guard: Arc::clone(&guard),
            view: view_tx,
            fetch_missing_favorites: options.fetch_missing_favorites,
        };
        tokio::spawn(task.run(renders, messages_rx, subscriptions));

        ScreenHandle {
            pipeline,
            guard,
            bus,
            messages: messages_tx,
            view: view_rx,
        }
    }
}

/// Operations a screen exposes.
#[derive(Clone)]
pub struct ScreenHandle {
    pipeline: AggregationPipeline,
    guard: Arc<PaginationGuard>,
    bus: MutationBus,
    messages: mpsc::UnboundedSender<ScreenMessage>,
    view: watch::Receiver<ScreenView>,
}

impl ScreenHandle {
    /// Shows `query`. Returns the new generation, or `None` if `query` equals
    /// the current one.
    pub fn load_resources(&self, query: QuerySession) -> Option<Generation> {
        let generation = self.pipeline.load_resources(query)?;
        self.guard.reset(generation);
        Some(generation)
    }

    /// Re-runs the current query after a failure.
    pub fn retry(&self) -> Option<Generation> {
        let generation = self.pipeline.retry()?;
        self.guard.reset(generation);
        Some(generation)
    }

    /// Re-runs the current query, cache render included.
    pub fn refresh(&self) -> Option<Generation> {
        let generation = self.pipeline.refresh()?;
        self.guard.reset(generation);
        Some(generation)
    }

    /// Loads and appends the next page of the current query.
    ///
    /// Returns the guard's outcome; on [`LoadNextOutcome::Appended`] the items
    /// are also appended to the view.
    pub async fn load_next(&self) -> LoadNextOutcome<FeedItem> {
        let Some(query) = self.pipeline.current_query() else {
            return LoadNextOutcome::Skipped(crate::pagination::SkipReason::NoMorePages);
        };
        let origin = query.location.or(self.view.borrow().origin);
        let services = self.pipeline.services();
        let options = self.pipeline.options();

        let outcome = self
            .guard
            .load_next(|page| async move {
                let request = ListRequest::for_session(&query, origin, page, options.per_page);
                let response = services.listing.retrieve(request).await?;
                let datasets = services.join.join(&response.items, options.reference_date()).await;
                Ok::<_, FeedError>(Page::new(assemble(response.items, &datasets, origin), response.meta))
            })
            .await;

        if let LoadNextOutcome::Appended {
            generation,
            epoch,
            items,
            ..
        } = &outcome
        {
            let message = ScreenMessage::Append {
                generation: *generation,
                epoch: *epoch,
                items: items.clone(),
            };
            if self.messages.send(message).is_err() {
                debug!("Screen task stopped, page not appended");
            }
        }
        outcome
    }

    /// Publishes a favorite toggle for a resource of the current query's kind.
    ///
    /// Every live screen, this one included, applies it through its bus
    /// subscription. Returns how many screens received it.
    pub fn set_favorite(&self, id: impl Into<String>, favorite: bool) -> usize {
        let Some(kind) = self.pipeline.current_query().map(|q| q.kind) else {
            return 0;
        };
        self.bus.publish(kind, MutationEvent::FavoriteChanged, Mutation::favorite(id, favorite))
    }

    /// Current snapshot.
    #[must_use]
    pub fn view(&self) -> ScreenView {
        self.view.borrow().clone()
    }

    /// Watches snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ScreenView> {
        self.view.clone()
    }

    /// Current pipeline state.
    #[must_use]
    pub fn pipeline_state(&self) -> PipelineState {
        self.pipeline.state()
    }

    /// Watches pipeline state changes.
    #[must_use]
    pub fn subscribe_pipeline_state(&self) -> watch::Receiver<PipelineState> {
        self.pipeline.subscribe_state()
    }

    /// The screen's pagination guard.
    #[must_use]
    pub fn pagination(&self) -> &PaginationGuard {
        &self.guard
    }
}

struct RenderTask {
    pipeline: AggregationPipeline,
    guard: Arc<PaginationGuard>,
    view: watch::Sender<ScreenView>,
    fetch_missing_favorites: bool,
}

impl RenderTask {
    async fn run(
        self,
        mut renders: mpsc::UnboundedReceiver<RenderEvent>,
        mut messages: mpsc::UnboundedReceiver<ScreenMessage>,
        subscriptions: Vec<(ResourceKind, Subscription)>,
    ) {
        let (inserts_tx, mut inserts) = mpsc::unbounded_channel();
        let (mutations_tx, mut mutations) = mpsc::unbounded_channel();

        // One forwarder per topic so the loop below selects over a fixed set
        let forwarders: Vec<_> = subscriptions
            .into_iter()
            .map(|(kind, mut subscription)| {
                let mutations_tx = mutations_tx.clone();
                tokio::spawn(async move {
                    while let Some(mutation) = subscription.recv().await {
                        if mutations_tx.send((kind, mutation)).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(mutations_tx);

        loop {
            tokio::select! {
                Some(event) = renders.recv() => self.apply_render(event),
                message = messages.recv() => match message {
                    Some(message) => self.apply_message(message),
                    None => break,
                },
                Some(message) = inserts.recv() => self.apply_message(message),
                Some((kind, mutation)) = mutations.recv() => self.apply_mutation(kind, mutation, &inserts_tx),
            }
        }

        for forwarder in forwarders {
            forwarder.abort();
        }
        debug!("Screen task stopped");
    }

    fn apply_render(&self, event: RenderEvent) {
        match event {
            RenderEvent::Resources(batch) => self.replace(batch),
            RenderEvent::Failed {
                generation,
                error,
            } => {
                self.view.send_if_modified(|view| {
                    if generation < view.generation {
                        return false;
                    }
                    view.generation = generation;
                    view.error = Some(error);
                    view.change = ViewChange::Failed;
                    true
                });
            }
        }
    }

    fn replace(&self, batch: RenderBatch) {
        let guard = &self.guard;
        self.view.send_if_modified(|view| {
            if batch.generation < view.generation {
                debug!(generation = batch.generation, "Ignoring stale render");
                return false;
            }
            guard.reset(batch.generation);
            if let Some(meta) = batch.page {
                guard.seed(batch.generation, meta);
            }

            view.generation = batch.generation;
            view.items = batch.items;
            view.source = Some(batch.source);
            view.origin = batch.origin;
            view.query = batch.session;
            view.error = None;
            view.change = ViewChange::Replaced;
            true
        });
    }

    fn apply_message(&self, message: ScreenMessage) {
        let current_epoch = self.guard.epoch();
        self.view.send_if_modified(|view| match message {
            ScreenMessage::Append {
                generation,
                epoch,
                items,
            } => {
                if generation != view.generation || epoch != current_epoch {
                    debug!(generation, current = view.generation, "Ignoring page for another list");
                    return false;
                }
                let from = view.items.len();
                view.items.extend(items);
                view.change = ViewChange::Appended {
                    from,
                };
                true
            }
            ScreenMessage::Insert {
                generation,
                item,
            } => {
                if generation != view.generation || view.position(item.id()).is_some() {
                    return false;
                }
                let from = view.items.len();
                view.items.push(item);
                view.change = ViewChange::Appended {
                    from,
                };
                true
            }
        });
    }

    fn apply_mutation(
        &self,
        kind: ResourceKind,
        mutation: Mutation,
        inserts: &mpsc::UnboundedSender<ScreenMessage>,
    ) {
        let mut missing = None;
        self.view.send_if_modified(|view| {
            if view.query.as_ref().map(|q| q.kind) != Some(kind) {
                return false;
            }
            match view.position(&mutation.id) {
                Some(index) => {
                    let item = &mut view.items[index];
                    if item.resource.favorite == mutation.favorite {
                        return false;
                    }
                    item.resource.favorite = mutation.favorite;
                    view.change = ViewChange::ItemUpdated {
                        index,
                    };
                    true
                }
                None => {
                    if mutation.favorite && self.fetch_missing_favorites {
                        missing = Some((view.generation, view.origin));
                    }
                    false
                }
            }
        });

        if let Some((generation, origin)) = missing {
            self.fetch_missing(kind, mutation.id, generation, origin, inserts.clone());
        }
    }

    fn fetch_missing(
        &self,
        kind: ResourceKind,
        id: String,
        generation: Generation,
        origin: Option<GeoPoint>,
        inserts: mpsc::UnboundedSender<ScreenMessage>,
    ) {
        let services = self.pipeline.services().clone();
        let reference_date = self.pipeline.options().reference_date();

        tokio::spawn(async move {
            let resource = match services.listing.retrieve_one(kind, id.clone()).await {
                Ok(Some(resource)) => resource.with_favorite(true),
                Ok(None) => {
                    debug!(kind = %kind, id = %id, "Favorited item unknown to the backend");
                    return;
                }
                Err(e) => {
                    warn!(kind = %kind, id = %id, error = %e, "Failed to fetch favorited item");
                    return;
                }
            };

            let datasets = services.join.join(std::slice::from_ref(&resource), reference_date).await;
            let mut items = assemble(vec![resource], &datasets, origin);
            if let Some(item) = items.pop() {
                let _ = inserts.send(ScreenMessage::Insert {
                    generation,
                    item,
                });
            }
        });
    }
}
