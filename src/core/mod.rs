//! Core types for discovery-feed
//!
//! This module holds the types every other component shares:
//!
//! - [`error`] - [`FeedError`], [`ErrorContext`] and [`user_friendly_error`]
//! - [`resource`] - [`Resource`], the dependent datasets ([`Schedule`],
//!   [`Assessment`]) and the render-ready [`FeedItem`]
//!
//! Everything here is plain data. Behavior lives in the components that
//! consume these types: the join engine attaches datasets, the pipeline
//! decides what to render, and screens mutate favorite flags.

pub mod error;
pub mod resource;

pub use error::{ErrorContext, FeedError, user_friendly_error};
pub use resource::{Assessment, FeedItem, GeoPoint, Resource, ResourceKind, Schedule, TimeSlot};
