//! Resource data model
//!
//! This module defines the list items rendered by discovery screens and the
//! dependent datasets joined onto them.
//!
//! # Types
//!
//! - [`ResourceKind`] - the category of list item (restaurant, event)
//! - [`Resource`] - an identified list item with optional join keys
//! - [`Schedule`] / [`TimeSlot`] - batched dataset keyed by restaurant key
//! - [`Assessment`] - per-item dataset keyed by place id
//! - [`FeedItem`] - a resource with its joined data and distance
//! - [`GeoPoint`] - a WGS84 coordinate
//!
//! Join keys are matched by loose string equality. An empty or whitespace-only
//! key is treated the same as a missing one, so a malformed payload degrades
//! to "no joined data" instead of an error.
//!
//! # Examples
//!
//! ```rust
//! use discovery_feed::core::{ResourceKind, Resource};
//!
//! let kind: ResourceKind = "restaurant".parse().unwrap();
//! let resource = Resource::new("r-1", kind, "Trattoria").with_schedule_key("  ");
//! assert_eq!(resource.schedule_key(), None);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine distance, in meters.
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Category of a list resource.
///
/// Each kind has its own list endpoint query, cache partition, and broadcast
/// topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A restaurant with bookable time slots and a place rating
    Restaurant,
    /// A scheduled event
    Event,
}

impl ResourceKind {
    /// Every kind, in declaration order.
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Restaurant, ResourceKind::Event];
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Restaurant => write!(f, "restaurant"),
            ResourceKind::Event => write!(f, "event"),
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = crate::core::FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "restaurant" | "restaurants" => Ok(ResourceKind::Restaurant),
            "event" | "events" => Ok(ResourceKind::Event),
            _ => Err(crate::core::FeedError::InvalidResourceKind {
                kind: s.to_string(),
            }),
        }
    }
}

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
}

impl GeoPoint {
    /// Creates a coordinate from latitude and longitude in degrees.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to `other` in meters (haversine).
    #[must_use]
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
    }
}

/// An identified list item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Stable identifier, unique within a kind
    pub id: String,
    /// Resource category
    pub kind: ResourceKind,
    /// Display title
    pub title: String,
    /// Position, when the backend knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Foreign key into the schedule dataset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_key: Option<String>,
    /// Foreign key into the assessment dataset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    /// Whether the user marked this resource as a favorite
    #[serde(default)]
    pub favorite: bool,
}

impl Resource {
    /// Creates a resource with no location, join keys, or favorite flag.
    pub fn new(id: impl Into<String>, kind: ResourceKind, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            location: None,
            schedule_key: None,
            place_id: None,
            favorite: false,
        }
    }

    /// Sets the position.
    #[must_use]
    pub const fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the schedule join key.
    #[must_use]
    pub fn with_schedule_key(mut self, key: impl Into<String>) -> Self {
        self.schedule_key = Some(key.into());
        self
    }

    /// Sets the assessment join key.
    #[must_use]
    pub fn with_place_id(mut self, key: impl Into<String>) -> Self {
        self.place_id = Some(key.into());
        self
    }

    /// Sets the favorite flag.
    #[must_use]
    pub const fn with_favorite(mut self, favorite: bool) -> Self {
        self.favorite = favorite;
        self
    }

    /// The schedule join key, if present and non-blank.
    #[must_use]
    pub fn schedule_key(&self) -> Option<&str> {
        usable_key(self.schedule_key.as_deref())
    }

    /// The assessment join key, if present and non-blank.
    #[must_use]
    pub fn place_id(&self) -> Option<&str> {
        usable_key(self.place_id.as_deref())
    }
}

fn usable_key(key: Option<&str>) -> Option<&str> {
    key.map(str::trim).filter(|k| !k.is_empty())
}

/// A bookable time slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Slot start
    pub starts_at: DateTime<Utc>,
    /// Remaining seats, when the backend reports them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seats: Option<u32>,
}

/// Eligible time slots for one restaurant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Join key, matches [`Resource::schedule_key`]
    pub restaurant_key: String,
    /// Slots in backend order
    #[serde(default)]
    pub slots: Vec<TimeSlot>,
}

/// Aggregated rating for one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    /// Join key, matches [`Resource::place_id`]
    pub place_id: String,
    /// Average rating
    pub rating: f32,
    /// Number of ratings
    pub count: u32,
}

/// A resource with its joined datasets, ready to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// The primary resource
    pub resource: Resource,
    /// Joined schedule, absent when the key was missing or the join degraded
    pub schedule: Option<Schedule>,
    /// Joined assessment, absent when the key was missing or the request failed
    pub assessment: Option<Assessment>,
    /// Distance from the render origin in meters; only set when an origin was known
    pub distance_meters: Option<f64>,
}

impl FeedItem {
    /// The resource identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.resource.id
    }

    /// Human readable distance label: meters below one kilometer, otherwise
    /// kilometers with one decimal.
    #[must_use]
    pub fn distance_text(&self) -> Option<String> {
        self.distance_meters.map(|meters| {
            if meters < 1000.0 {
                format!("{} m", meters.round() as u64)
            } else {
                format!("{:.1} km", meters / 1000.0)
            }
        })
    }
}
