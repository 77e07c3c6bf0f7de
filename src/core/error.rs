//! Error handling for discovery-feed
//!
//! The crate uses one strongly-typed error enum, [`FeedError`], for every failure
//! that crosses a component boundary, and [`ErrorContext`] to present those
//! failures to terminal users with details and suggestions.
//!
//! # Error Categories
//!
//! Failures fall into four categories, each with its own propagation policy:
//!
//! 1. **Primary transport failures** ([`FeedError::Network`]): the baseline or
//!    geo-upgrade list fetch failed. These are the only errors surfaced to a
//!    screen, always as retriable.
//! 2. **Dependent-dataset failures**: a schedule or assessment request failed.
//!    The join engine degrades the dataset to empty and logs; callers never see
//!    the error.
//! 3. **Cache failures** ([`FeedError::Cache`]): produced by a [`CacheStore`]
//!    and swallowed by the [`Cache`] facade.
//! 4. **Malformed payloads**: a missing join key or an undecodable cache record
//!    is treated as absent data.
//!
//! # Examples
//!
//! ```rust,no_run
//! use discovery_feed::core::{FeedError, user_friendly_error};
//!
//! let error = FeedError::Network {
//!     operation: "retrieve restaurants".to_string(),
//!     reason: "connection reset".to_string(),
//! };
//! assert!(error.is_retriable());
//!
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display();
//! ```
//!
//! [`CacheStore`]: crate::cache::CacheStore
//! [`Cache`]: crate::cache::Cache

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for discovery-feed operations.
///
/// Variants carry owned strings rather than source errors so the type stays
/// `Clone`; render events and scripted test endpoints hand the same error to
/// several consumers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// A network request to a primary or dependent endpoint failed.
    #[error("Network error: {operation}")]
    Network {
        /// The request that failed (e.g., "retrieve restaurants page 1")
        operation: String,
        /// Transport-level reason
        reason: String,
    },

    /// A request was cancelled through its fetch token before it resolved.
    #[error("Request cancelled: {operation}")]
    Cancelled {
        /// The request that was cancelled
        operation: String,
    },

    /// A cache store read or write failed.
    #[error("Cache error during {operation}: {reason}")]
    Cache {
        /// The cache operation that failed
        operation: String,
        /// Reason for the failure
        reason: String,
    },

    /// A payload could not be decoded.
    #[error("Failed to decode payload: {reason}")]
    Decode {
        /// Decoder message
        reason: String,
    },

    /// The device location could not be obtained.
    #[error("Location unavailable: {reason}")]
    LocationUnavailable {
        /// Reason reported by the location provider
        reason: String,
    },

    /// Unknown resource kind string.
    #[error("Invalid resource kind: {kind}")]
    InvalidResourceKind {
        /// The string that failed to parse
        kind: String,
    },

    /// A resource looked up by id does not exist.
    #[error("Resource '{id}' not found")]
    ResourceNotFound {
        /// Identifier of the missing resource
        id: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the configuration error
        message: String,
    },

    /// I/O error
    #[error("IO error: {0}")]
    IoError(String),

    /// Other error
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
    },
}

impl FeedError {
    /// Builds a [`FeedError::Network`] from an operation label and reason.
    pub fn network(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Network {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Builds a [`FeedError::Cache`] from an operation label and reason.
    pub fn cache(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cache {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether a user-facing retry could plausibly succeed.
    ///
    /// Only transport failures qualify. Cancellation is never surfaced, and
    /// decode or configuration errors repeat deterministically.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::LocationUnavailable { .. })
    }

    /// Whether this error is the result of a fetch token cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<std::io::Error> for FeedError {
    fn from(error: std::io::Error) -> Self {
        Self::IoError(error.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode {
            reason: error.to_string(),
        }
    }
}

impl From<toml::de::Error> for FeedError {
    fn from(error: toml::de::Error) -> Self {
        Self::ConfigError {
            message: error.to_string(),
        }
    }
}

/// Error context wrapper that provides user-friendly error information.
///
/// Used by the binary to print an error with optional details and a
/// suggestion, color coded for the terminal.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: FeedError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub const fn new(error: FeedError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors
    ///
    /// - Error message: red and bold
    /// - Details: yellow
    /// - Suggestion: green
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with a suggestion where one is known.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(feed_error) = error.downcast_ref::<FeedError>() {
        return create_error_context(feed_error.clone());
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        if io_error.kind() == std::io::ErrorKind::NotFound {
            return ErrorContext::new(FeedError::IoError(format!("{error:#}")))
                .with_suggestion("Check that the file or directory exists and the path is correct");
        }
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(FeedError::ConfigError {
            message: toml_error.to_string(),
        })
        .with_suggestion("Check the TOML syntax in your config.toml");
    }

    // Fall back to the full anyhow chain so `.context()` messages survive
    let message = format!("{error:#}");
    ErrorContext::new(FeedError::Other { message })
}

fn create_error_context(error: FeedError) -> ErrorContext {
    match &error {
        FeedError::Network { reason, .. } => {
            let details = format!("The request failed with: {reason}");
            ErrorContext::new(error)
                .with_details(details)
                .with_suggestion("Check your network connection and retry")
        }
        FeedError::LocationUnavailable { .. } => ErrorContext::new(error)
            .with_suggestion("Grant location permission or pass --lat/--lon explicitly"),
        FeedError::InvalidResourceKind { .. } => {
            ErrorContext::new(error).with_suggestion("Valid kinds are 'restaurant' and 'event'")
        }
        FeedError::ConfigError { .. } => ErrorContext::new(error)
            .with_suggestion("Run 'discovery-feed config init' to write a fresh config file"),
        _ => ErrorContext::new(error),
    }
}
