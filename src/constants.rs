//! Global constants used throughout the discovery-feed codebase.
//!
//! Defaults shared by configuration, the pipeline and the screen controller
//! live here so the numbers are discoverable in one place.

/// Items requested per list page.
pub const DEFAULT_PER_PAGE: u32 = 20;

/// First page number used by list endpoints.
pub const FIRST_PAGE: u32 = 1;

/// Maximum number of concurrent per-item dataset requests during a join.
///
/// The fan-out waits for every request regardless of this limit; it only
/// bounds how many are on the wire at once.
pub const DEFAULT_FAN_OUT_LIMIT: usize = 8;

/// Buffered mutations per broadcast topic before slow subscribers lag.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// Directory name for the per-user config and file cache.
pub const APP_DIR_NAME: &str = ".discovery-feed";

/// Config file name inside [`APP_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Partition name used on disk for the unpartitioned cache set.
pub const UNPARTITIONED_CACHE_FILE: &str = "_all";
