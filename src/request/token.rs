//! Fetch tokens for in-flight baseline requests.
//!
//! A token moves through exactly one transition:
//!
//! ```text
//! Pending ──resolve──► Resolved
//!    │
//!    └────cancel─────► Cancelled
//! ```
//!
//! The transition is a single compare-and-swap, so a request that resolves at
//! the same moment as a competing cancellation ends up in exactly one state.
//! A cancelled token also fires its [`CancellationToken`], which makes
//! [`FetchToken::run`] drop the request future instead of waiting for it.

use crate::core::FeedError;
use crate::session::Generation;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;

const PENDING: u8 = 0;
const RESOLVED: u8 = 1;
const CANCELLED: u8 = 2;

/// Resolution state of a [`FetchToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// The request has not resolved
    Pending,
    /// The request resolved before any cancellation
    Resolved,
    /// The request was cancelled before it resolved
    Cancelled,
}

/// Handle for one in-flight request, tagged with the pipeline generation that
/// issued it.
#[derive(Debug, Clone)]
pub struct FetchToken {
    generation: Generation,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
}

impl FetchToken {
    /// Creates a pending token for `generation`.
    #[must_use]
    pub fn new(generation: Generation) -> Self {
        Self {
            generation,
            state: Arc::new(AtomicU8::new(PENDING)),
            cancel: CancellationToken::new(),
        }
    }

    /// Generation of the run that issued the request.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TokenState {
        match self.state.load(Ordering::Acquire) {
            PENDING => TokenState::Pending,
            RESOLVED => TokenState::Resolved,
            _ => TokenState::Cancelled,
        }
    }

    /// Whether the token was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == TokenState::Cancelled
    }

    /// Marks the request resolved. Returns `false` if it was already cancelled.
    pub fn try_resolve(&self) -> bool {
        self.transition(RESOLVED)
    }

    /// Cancels the request if it has not resolved yet. Returns `true` if this
    /// call performed the cancellation.
    pub fn cancel_if_pending(&self) -> bool {
        let cancelled = self.transition(CANCELLED);
        if cancelled {
            self.cancel.cancel();
        }
        cancelled
    }

    fn transition(&self, to: u8) -> bool {
        self.state.compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Drives `request` until it completes or the token is cancelled.
    ///
    /// A completed request (success or failure) resolves the token. If the
    /// token was cancelled first, the request future is dropped and
    /// [`FeedError::Cancelled`] is returned; the underlying transport may or may
    /// not stop, but its result is never observed.
    ///
    /// # Errors
    ///
    /// Returns the request's own error, or [`FeedError::Cancelled`].
    pub async fn run<T, F>(&self, operation: &str, request: F) -> Result<T, FeedError>
    where
        F: Future<Output = Result<T, FeedError>>,
    {
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = request => Some(result),
        };

        match outcome {
            Some(result) if self.try_resolve() => result,
            _ => Err(FeedError::Cancelled {
                operation: operation.to_string(),
            }),
        }
    }
}
