//! Shared utilities
//!
//! - [`fs`] - atomic file writes used by the file cache and config

pub mod fs;

pub use fs::{atomic_write, ensure_dir, read_optional};
