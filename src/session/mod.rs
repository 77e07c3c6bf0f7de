//! Query sessions, page cursors and generations.
//!
//! A [`QuerySession`] is the explicit value a screen passes into the pipeline
//! describing what to show: the resource kind, selected tag filters, an
//! optional city, and an optional user-chosen location. Two sessions that
//! compare equal describe the same list, which is how the pipeline suppresses
//! redundant fetches when a filter is tapped twice.
//!
//! A [`PageCursor`] tracks "load more" progress for the current session and
//! resets to the first page whenever the session changes.
//!
//! A [`Generation`] identifies one pipeline run. Generations only increase;
//! any result tagged with an older generation than the current one is stale.

use crate::constants::FIRST_PAGE;
use crate::core::{GeoPoint, ResourceKind};
use crate::request::PageMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of one pipeline run.
pub type Generation = u64;

/// Filter, scope and geo parameters of a list screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySession {
    /// Which resources to list
    pub kind: ResourceKind,
    /// Selected tag filters; ordered so equality and cache keys are stable
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// City scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_id: Option<String>,
    /// Explicit location chosen by the user, overriding the device location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

impl QuerySession {
    /// A session listing every resource of `kind`.
    #[must_use]
    pub const fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            tags: BTreeSet::new(),
            city_id: None,
            location: None,
        }
    }

    /// Adds a tag filter.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Scopes the session to a city.
    #[must_use]
    pub fn with_city(mut self, city_id: impl Into<String>) -> Self {
        self.city_id = Some(city_id.into());
        self
    }

    /// Pins the session to an explicit location.
    #[must_use]
    pub const fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    /// Cache partition key for this session's scope.
    ///
    /// Location is deliberately not part of the key: the same city and filters
    /// render the same cached list before any location is known.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        format!("city={};tags={}", self.city_id.as_deref().unwrap_or_default(), tags.join(","))
    }
}

/// "Load more" position within the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    /// Last page successfully loaded
    pub page: u32,
    /// Whether the backend reported more pages
    pub has_next: bool,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self::first()
    }
}

impl PageCursor {
    /// Cursor for a fresh session: first page, nothing more known yet.
    #[must_use]
    pub const fn first() -> Self {
        Self {
            page: FIRST_PAGE,
            has_next: false,
        }
    }

    /// The page a "load more" would request.
    #[must_use]
    pub const fn next_page(&self) -> u32 {
        self.page + 1
    }

    /// Advances to the page described by `meta`.
    ///
    /// The page number never moves backwards, even if a backend reports a
    /// lower page than already loaded.
    pub fn advance(&mut self, meta: &PageMeta) {
        self.page = self.page.max(meta.page);
        self.has_next = meta.has_next;
    }

    /// Marks the cursor as having no further pages.
    pub fn exhaust(&mut self) {
        self.has_next = false;
    }
}
