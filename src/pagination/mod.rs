//! Single-flight "load more" controller.
//!
//! A [`PaginationGuard`] owns the [`PageCursor`] of the current query session
//! and guarantees:
//!
//! - at most one page request in flight;
//! - the cursor advances only after a page resolved successfully with items;
//! - a page requested for a list that has since been replaced is never
//!   appended, whether a new generation started or a later render of the
//!   same generation (the geo-upgrade) re-seeded the cursor;
//! - the loading flag is cleared however the request ends, including when
//!   the caller drops the future.
//!
//! The guard does not hold items itself. [`PaginationGuard::load_next`]
//! returns the fetched page to the caller, whose list is append-only.
//!
//! # Examples
//!
//! ```rust,no_run
//! use discovery_feed::pagination::{LoadNextOutcome, PaginationGuard};
//! use discovery_feed::request::{Page, PageMeta};
//!
//! # async fn example() {
//! let guard = PaginationGuard::new();
//! guard.reset(1);
//! guard.seed(1, PageMeta::new(1, true));
//!
//! let outcome = guard
//!     .load_next(|page| async move { Ok(Page::new(vec!["item"], PageMeta::new(page, false))) })
//!     .await;
//! assert!(matches!(outcome, LoadNextOutcome::Appended { .. }));
//! # }
//! ```

use crate::core::FeedError;
use crate::request::{Page, PageMeta};
use crate::session::{Generation, PageCursor};
use std::future::Future;
use std::sync::Mutex;
use tracing::debug;

/// Why a `load_next` call did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The backend reported no further pages
    NoMorePages,
    /// Another page request is in flight
    AlreadyLoading,
}

/// Result of one `load_next` call.
#[derive(Debug)]
pub enum LoadNextOutcome<T> {
    /// The page resolved with items; append them.
    Appended {
        /// Generation the page belongs to
        generation: Generation,
        /// List epoch the page extends
        epoch: u64,
        /// Page metadata
        meta: PageMeta,
        /// Items to append, in backend order
        items: Vec<T>,
    },
    /// The page resolved empty; the cursor is exhausted.
    Exhausted,
    /// No request was made.
    Skipped(SkipReason),
    /// The list was replaced while the page was in flight; the result was dropped.
    Stale,
    /// The request failed; the cursor is unchanged and a later call retries it.
    Failed(FeedError),
}

#[derive(Debug)]
struct GuardState {
    generation: Generation,
    // Bumped by every reset and seed
    epoch: u64,
    cursor: PageCursor,
    in_flight: bool,
}

impl GuardState {
    fn is_current(&self, generation: Generation, epoch: u64) -> bool {
        self.generation == generation && self.epoch == epoch
    }
}

/// Single-flight, cursor-based page loader.
#[derive(Debug)]
pub struct PaginationGuard {
    state: Mutex<GuardState>,
}

impl Default for PaginationGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl PaginationGuard {
    /// A guard with no pages to load until [`seed`](Self::seed) is called.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GuardState {
                generation: 0,
                epoch: 0,
                cursor: PageCursor::first(),
                in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardState> {
        // The state is plain data, valid even if a holder panicked
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Resets to the first page for a new session generation.
    ///
    /// Any request in flight for an earlier generation will report
    /// [`LoadNextOutcome::Stale`]. Generations only move forward: resetting to
    /// the current or an older generation does nothing.
    pub fn reset(&self, generation: Generation) {
        let mut state = self.lock();
        if generation <= state.generation {
            return;
        }
        state.generation = generation;
        state.epoch += 1;
        state.cursor = PageCursor::first();
        state.in_flight = false;
    }

    /// Records first-page metadata of a freshly rendered list.
    ///
    /// Starts a new epoch: a request in flight for the list being replaced
    /// reports [`LoadNextOutcome::Stale`] and no longer blocks new loads.
    /// Ignored for any generation other than the current one.
    pub fn seed(&self, generation: Generation, meta: PageMeta) {
        let mut state = self.lock();
        if state.generation != generation {
            debug!(generation, current = state.generation, "Ignoring stale pagination seed");
            return;
        }
        state.epoch += 1;
        state.cursor = PageCursor::first();
        state.cursor.advance(&meta);
        state.in_flight = false;
    }

    /// Current cursor.
    #[must_use]
    pub fn cursor(&self) -> PageCursor {
        self.lock().cursor
    }

    /// Whether a page request is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.lock().in_flight
    }

    /// Generation the cursor belongs to.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.lock().generation
    }

    /// Epoch of the list the cursor belongs to.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Fetches the next page with `fetch`, unless there is none or one is
    /// already loading.
    pub async fn load_next<T, F, Fut>(&self, fetch: F) -> LoadNextOutcome<T>
    where
        F: FnOnce(u32) -> Fut,
        Fut: Future<Output = Result<Page<T>, FeedError>>,
    {
        let (generation, epoch, page) = {
            let mut state = self.lock();
            if !state.cursor.has_next {
                return LoadNextOutcome::Skipped(SkipReason::NoMorePages);
            }
            if state.in_flight {
                return LoadNextOutcome::Skipped(SkipReason::AlreadyLoading);
            }
            state.in_flight = true;
            (state.generation, state.epoch, state.cursor.next_page())
        };

        let mut loading = LoadingFlag {
            guard: Some(self),
            generation,
            epoch,
        };

        debug!(generation, page, "Loading next page");
        let result = fetch(page).await;
        loading.disarm();

        let mut state = self.lock();
        if !state.is_current(generation, epoch) {
            debug!(generation, current = state.generation, page, "Dropping page for replaced list");
            return LoadNextOutcome::Stale;
        }
        state.in_flight = false;

        match result {
            Ok(response) if response.items.is_empty() => {
                state.cursor.exhaust();
                LoadNextOutcome::Exhausted
            }
            Ok(response) => {
                state.cursor.advance(&response.meta);
                LoadNextOutcome::Appended {
                    generation,
                    epoch,
                    meta: response.meta,
                    items: response.items,
                }
            }
            Err(e) => LoadNextOutcome::Failed(e),
        }
    }
}

/// Clears the loading flag if a `load_next` future is dropped or its fetch
/// panics before the page resolved.
struct LoadingFlag<'a> {
    guard: Option<&'a PaginationGuard>,
    generation: Generation,
    epoch: u64,
}

impl LoadingFlag<'_> {
    fn disarm(&mut self) {
        self.guard = None;
    }
}

impl Drop for LoadingFlag<'_> {
    fn drop(&mut self) {
        let Some(guard) = self.guard else {
            return;
        };
        let mut state = guard.lock();
        if state.is_current(self.generation, self.epoch) {
            debug!(generation = self.generation, "Page request abandoned");
            state.in_flight = false;
        }
    }
}
