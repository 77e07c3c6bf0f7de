//! Command-line interface for discovery-feed.
//!
//! The binary drives a real screen controller against a JSON fixture backend,
//! which makes the aggregation pipeline observable from a terminal:
//!
//! - `feed` - load a list (cache first, then the network pass) and print it
//! - `config` - create, show or locate the user configuration
//!
//! # Examples
//!
//! ```bash
//! # First page of vegan restaurants in Paris, distances from a device location
//! discovery-feed feed --fixtures fixtures.json --kind restaurant --tag vegan \
//!     --city paris --lat 48.85 --lon 2.35
//!
//! # Three pages of events as JSON
//! discovery-feed feed --fixtures fixtures.json --kind event --pages 3 --json
//!
//! # Write a default config file
//! discovery-feed config init
//! ```
//!
//! # Logging
//!
//! Logs go to stderr through `tracing-subscriber`. `--verbose` enables
//! `debug`, `--quiet` disables logging, and `RUST_LOG` overrides both.

mod config;
mod feed;

pub use config::ConfigCommand;
pub use feed::FeedCommand;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Runtime settings derived from global flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliConfig {
    /// Log filter; `None` disables logging
    pub log_level: Option<String>,
    /// Explicit config file
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    /// Installs the global tracing subscriber. Does nothing when logging is
    /// disabled or a subscriber is already installed.
    pub fn init_logging(&self) {
        let Some(level) = &self.log_level else {
            return;
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

/// Drive discovery list screens from the terminal.
#[derive(Parser)]
#[command(
    name = "discovery-feed",
    about = "Cache-first discovery feeds with joined datasets",
    version,
    long_about = "Loads restaurant and event lists through the discovery-feed pipeline: cached list first, then the network pass with schedules, ratings and distances joined in."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show debug logs (pipeline stages, render decisions).
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print results and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the config file (default: ~/.discovery-feed/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and print a list
    Feed(FeedCommand),

    /// Manage the user configuration
    Config(ConfigCommand),
}

impl Cli {
    /// Runs the parsed command.
    ///
    /// # Errors
    ///
    /// Returns the command's error, with context for display through
    /// [`user_friendly_error`](crate::core::user_friendly_error).
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translates global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            config_path: self.config.clone(),
        }
    }

    /// Runs the command with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns the command's error.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();

        match self.command {
            Commands::Feed(cmd) => cmd.execute(config.config_path).await,
            Commands::Config(cmd) => cmd.execute(config.config_path).await,
        }
    }
}
