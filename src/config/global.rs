//! User-wide configuration for discovery-feed.
//!
//! The configuration file lives at `~/.discovery-feed/config.toml` and tunes
//! how screens page, join and refine their lists. Every field is optional; a
//! missing file or a missing field falls back to the built-in default.
//!
//! # File Format
//!
//! ```toml
//! # Items per list page
//! per_page = 20
//!
//! # Concurrent per-item dataset requests during a join
//! fan_out_limit = 8
//!
//! # Refine lists with a fresh device location when none is known at start
//! geo_upgrade = true
//!
//! # Re-join every dataset for the refined list instead of reusing the first pass
//! rejoin_on_upgrade = false
//!
//! # Persist the cache as JSON files here; in-memory when omitted
//! cache_dir = "/home/user/.discovery-feed/cache"
//!
//! # Buffered favorite changes per topic before slow screens skip some
//! broadcast_capacity = 64
//! ```

use crate::broadcast::MutationBus;
use crate::cache::{Cache, FileCacheStore};
use crate::constants::{
    APP_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_BROADCAST_CAPACITY, DEFAULT_FAN_OUT_LIMIT,
    DEFAULT_PER_PAGE,
};
use crate::pipeline::PipelineOptions;
use crate::screen::ScreenOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Settings read from `config.toml`.
///
/// # Examples
///
/// ```rust
/// use discovery_feed::config::FeedConfig;
///
/// let config: FeedConfig = toml::from_str("per_page = 50").unwrap();
/// assert_eq!(config.per_page, 50);
/// assert!(config.geo_upgrade);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Items per list page.
    pub per_page: u32,

    /// Maximum concurrent per-item dataset requests.
    pub fan_out_limit: usize,

    /// Whether lists are refined with a fresh device location.
    pub geo_upgrade: bool,

    /// Whether the refined list re-joins every dataset.
    pub rejoin_on_upgrade: bool,

    /// Directory for the file-backed cache. The cache is in-memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Buffered mutations per broadcast topic.
    pub broadcast_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            fan_out_limit: DEFAULT_FAN_OUT_LIMIT,
            geo_upgrade: true,
            rejoin_on_upgrade: false,
            cache_dir: None,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

impl FeedConfig {
    /// Loads the configuration from the default location, or defaults if the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined, or the
    /// file exists but cannot be read or parsed.
    pub async fn load() -> Result<Self> {
        Self::load_with_optional(None).await
    }

    /// Loads from `path` when given, otherwise from the default location.
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if fs::try_exists(&path).await.unwrap_or(false) {
            Self::load_from(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Loads from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML for
    /// this schema.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Writes the configuration as pretty TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// `~/.discovery-feed/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn default_path() -> Result<PathBuf> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?;
        Ok(home.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Pipeline options derived from this configuration.
    #[must_use]
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            per_page: self.per_page.max(1),
            geo_upgrade: self.geo_upgrade,
            rejoin_on_upgrade: self.rejoin_on_upgrade,
            reference_date: None,
        }
    }

    /// Screen options derived from this configuration.
    #[must_use]
    pub fn screen_options(&self) -> ScreenOptions {
        ScreenOptions {
            pipeline: self.pipeline_options(),
            fetch_missing_favorites: false,
        }
    }

    /// The configured cache: file-backed under `cache_dir`, else in-memory.
    #[must_use]
    pub fn cache(&self) -> Cache {
        match &self.cache_dir {
            Some(dir) => Cache::new(Arc::new(FileCacheStore::new(dir))),
            None => Cache::in_memory(),
        }
    }

    /// A mutation bus with the configured capacity.
    #[must_use]
    pub fn mutation_bus(&self) -> MutationBus {
        MutationBus::new(self.broadcast_capacity)
    }
}
