//! Integration test suite for discovery-feed
//!
//! End-to-end tests that drive pipelines and screens through scripted
//! endpoints from `discovery_feed::test_utils`, plus CLI tests against a
//! fixture file.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! RUST_LOG=discovery_feed=debug cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **pipeline**: Render ordering, generations, geo-upgrade and retry
//! - **join**: Partial failure isolation of dependent datasets
//! - **screen**: Pagination, favorites broadcast and view updates
//! - **cli**: `feed` and `config` commands

mod common;

mod cli;
mod join;
mod pipeline;
mod screen;
