//! discovery-feed - cache-first data aggregation for discovery list screens
//!
//! Every list screen of a discovery app (restaurant map and list, events feed,
//! favorites) shows the same kind of data: a primary list from the backend,
//! enriched with dependent datasets joined per item, ordered and labelled by
//! distance when a location is known, and shown from a local cache before the
//! network answers. This crate is the asynchronous engine behind those
//! screens.
//!
//! # Architecture Overview
//!
//! A screen passes an explicit [`QuerySession`](session::QuerySession) into an
//! [`AggregationPipeline`](pipeline::AggregationPipeline). Each run:
//!
//! 1. renders the cached list for the query's scope;
//! 2. fetches page 1 with the known location (if any), joins schedules and
//!    assessments, persists, and renders;
//! 3. when no location was known but one can be obtained, fetches page 1
//!    again with a fresh location and renders that after the first pass
//!    settled;
//! 4. reports a retriable failure if the primary fetch failed.
//!
//! Runs are identified by generations. A newer run makes every render of
//! an older one stale, so changing filters mid-flight never shows outdated
//! results.
//!
//! ## Key Properties
//!
//! - **Single-flight**: an unchanged query never refetches; "load more" never
//!   issues two page requests at once
//! - **Partial failure tolerance**: a failed dependent dataset degrades to
//!   "no data" for the affected items; the list still renders
//! - **Strict render order**: cache never overwrites network; the first pass
//!   never overwrites the location-refined pass
//! - **Cross-screen consistency**: favorite toggles propagate to every live
//!   screen through a typed broadcast bus, without refetching
//!
//! # Core Modules
//!
//! ## Pipeline
//! - [`pipeline`] - Aggregation pipeline, render gate and named stages
//! - [`join`] - Resource join engine for batched and fan-out datasets
//! - [`session`] - Query sessions, page cursors and generations
//! - [`pagination`] - Single-flight "load more" guard
//!
//! ## Screens
//! - [`screen`] - Screen controller owning the displayed list
//! - [`broadcast`] - Typed mutation bus between screens
//!
//! ## Collaborators
//! - [`request`] - Endpoint and location capability traits, fetch tokens
//! - [`cache`] - Cache store trait, in-memory and JSON file stores
//! - [`fixtures`] - JSON fixture backend implementing every endpoint
//!
//! ## Supporting Modules
//! - [`core`] - Data model and error handling
//! - [`config`] - User configuration (`~/.discovery-feed/config.toml`)
//! - [`cli`] - Command-line interface
//! - [`constants`] - Shared defaults
//! - [`utils`] - Async file helpers
//!
//! # Command-Line Usage
//!
//! ```bash
//! # Load restaurants tagged vegan, distances from a device location
//! discovery-feed feed --fixtures fixtures.json --tag vegan --lat 48.85 --lon 2.35
//!
//! # Two pages of events as JSON
//! discovery-feed feed --fixtures fixtures.json --kind event --pages 2 --json
//! ```

// Pipeline
pub mod join;
pub mod pagination;
pub mod pipeline;
pub mod session;

// Screens
pub mod broadcast;
pub mod screen;

// Collaborators
pub mod cache;
pub mod fixtures;
pub mod request;

// Supporting modules
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod utils;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
