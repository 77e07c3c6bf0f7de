//! Typed mutation broadcast between screens.
//!
//! When a user toggles a favorite on one screen, every other live screen that
//! shows the same resource should reflect it without refetching. The
//! [`MutationBus`] carries those item-level changes.
//!
//! # Topics
//!
//! A topic is a `(ResourceKind, MutationEvent)` pair; each topic has its own
//! `tokio::sync::broadcast` channel created on first use. A payload is a
//! [`Mutation`]: the resource id and its new state.
//!
//! # Subscriber Lifetime
//!
//! - [`MutationBus::subscribe`] returns a [`Subscription`]; dropping it
//!   unsubscribes.
//! - [`MutationBus::subscribe_with`] runs a handler on its own task and returns
//!   a [`SubscriptionHandle`] that aborts the task when dropped.
//!
//! # Consistency
//!
//! Delivery is eventually consistent. A subscriber that falls more than the
//! channel capacity behind skips the oldest mutations with a warning; the
//! backend stays authoritative and the next pipeline run corrects the list.

use crate::constants::DEFAULT_BROADCAST_CAPACITY;
use crate::core::ResourceKind;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Kind of item-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationEvent {
    /// The favorite flag changed
    FavoriteChanged,
}

/// Broadcast topic.
pub type Topic = (ResourceKind, MutationEvent);

/// An item-level state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Resource id
    pub id: String,
    /// New favorite state
    pub favorite: bool,
}

impl Mutation {
    /// A favorite toggle for `id`.
    pub fn favorite(id: impl Into<String>, favorite: bool) -> Self {
        Self {
            id: id.into(),
            favorite,
        }
    }
}

/// Publish/subscribe bus keyed by [`Topic`].
///
/// Cloning the bus shares the same topics.
#[derive(Debug, Clone)]
pub struct MutationBus {
    topics: Arc<DashMap<Topic, broadcast::Sender<Mutation>>>,
    capacity: usize,
}

impl Default for MutationBus {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl MutationBus {
    /// Creates a bus buffering up to `capacity` mutations per topic.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: Topic) -> broadcast::Sender<Mutation> {
        self.topics.entry(topic).or_insert_with(|| broadcast::channel(self.capacity).0).clone()
    }

    /// Publishes a mutation. Returns how many subscribers received it.
    pub fn publish(&self, kind: ResourceKind, event: MutationEvent, mutation: Mutation) -> usize {
        let sender = self.sender((kind, event));
        match sender.send(mutation) {
            Ok(receivers) => {
                debug!(kind = %kind, event = ?event, receivers, "Mutation published");
                receivers
            }
            Err(_) => {
                debug!(kind = %kind, event = ?event, "Mutation published with no subscribers");
                0
            }
        }
    }

    /// Subscribes to one topic. Only mutations published after this call are
    /// delivered.
    #[must_use]
    pub fn subscribe(&self, kind: ResourceKind, event: MutationEvent) -> Subscription {
        Subscription {
            topic: (kind, event),
            receiver: self.sender((kind, event)).subscribe(),
        }
    }

    /// Runs `handler` for every mutation on a topic until the returned handle
    /// is dropped or the bus is gone.
    #[must_use]
    pub fn subscribe_with<F>(
        &self,
        kind: ResourceKind,
        event: MutationEvent,
        mut handler: F,
    ) -> SubscriptionHandle
    where
        F: FnMut(Mutation) + Send + 'static,
    {
        let mut subscription = self.subscribe(kind, event);
        let task = tokio::spawn(async move {
            while let Some(mutation) = subscription.recv().await {
                handler(mutation);
            }
        });
        SubscriptionHandle {
            task,
        }
    }

    /// Number of live subscribers on a topic.
    #[must_use]
    pub fn subscriber_count(&self, kind: ResourceKind, event: MutationEvent) -> usize {
        self.topics.get(&(kind, event)).map_or(0, |sender| sender.receiver_count())
    }
}

/// Receiver side of one topic.
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<Mutation>,
}

impl Subscription {
    /// The subscribed topic.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        self.topic
    }

    /// Waits for the next mutation. Returns `None` once every publisher is gone.
    ///
    /// Mutations dropped because this subscriber lagged are skipped with a
    /// warning.
    pub async fn recv(&mut self) -> Option<Mutation> {
        loop {
            match self.receiver.recv().await {
                Ok(mutation) => return Some(mutation),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = ?self.topic, skipped, "Mutation subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Owns a handler task started by [`MutationBus::subscribe_with`].
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stops the handler.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
