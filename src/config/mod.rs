//! Configuration management for discovery-feed
//!
//! - `global` - the user-wide [`FeedConfig`] at `~/.discovery-feed/config.toml`
//!
//! Configuration only tunes behavior; every field has a default, so the crate
//! works without a config file. The CLI resolves the file with
//! [`FeedConfig::load_with_optional`], honoring `--config`.

pub mod global;

pub use global::FeedConfig;
