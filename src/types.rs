//! Core value types and the user-facing error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Address placed on a `Location` when resolution fails or yields nothing.
///
/// A coordinate is always usable on its own, so a failed lookup degrades the
/// address to this sentinel instead of failing the acquisition.
pub const FALLBACK_ADDRESS: &str = "Address not found";

/// Neutral map center shown before the first tap of a picking round.
pub const DEFAULT_PICK_CENTER: Coordinate = Coordinate {
    latitude: 37.78825,
    longitude: -122.4324,
};

// ─── Coordinate ──────────────────────────────────────────────────

/// A validated geographic coordinate pair.
///
/// Latitude is kept within [-90, 90] and longitude within [-180, 180] by
/// construction; deserialization runs through the same validation, so no
/// `Coordinate` in the program can hold an out-of-range or NaN component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, InvalidCoordinate> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(InvalidCoordinate::Latitude(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(InvalidCoordinate::Longitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}, {:.5}", self.latitude, self.longitude)
    }
}

/// Unvalidated mirror of `Coordinate` for deserialization.
#[derive(Deserialize)]
struct RawCoordinate {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = InvalidCoordinate;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.latitude, raw.longitude)
    }
}

/// A coordinate component outside its valid range (NaN included).
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum InvalidCoordinate {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
}

// ─── Location ────────────────────────────────────────────────────

/// A committed location: a coordinate plus its resolved address.
///
/// Immutable once constructed. The address is always non-empty: an empty or
/// whitespace-only string is replaced by [`FALLBACK_ADDRESS`] so callers never
/// see a half-resolved value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawLocation")]
pub struct Location {
    coordinate: Coordinate,
    address: String,
}

impl Location {
    pub fn new(coordinate: Coordinate, address: impl Into<String>) -> Self {
        let address = address.into();
        let address = if address.trim().is_empty() {
            FALLBACK_ADDRESS.to_string()
        } else {
            address
        };
        Self {
            coordinate,
            address,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.coordinate)
    }
}

/// Mirror of `Location` that re-applies address normalization on the way in.
#[derive(Deserialize)]
struct RawLocation {
    coordinate: Coordinate,
    address: String,
}

impl From<RawLocation> for Location {
    fn from(raw: RawLocation) -> Self {
        Location::new(raw.coordinate, raw.address)
    }
}

// ─── Error taxonomy ──────────────────────────────────────────────

/// User-facing acquisition failures.
///
/// The `Display` strings are the wording shown to the user. Permission and
/// position failures end the current acquisition attempt. `NoSelection` is a
/// local prompt that leaves the pick session open. `GeocodeDegraded` never
/// reaches the caller as a failure, since a degraded address still commits;
/// it exists for logs and diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("Permission denied. Enable location permission to continue.")]
    PermissionDenied,
    #[error("Location permission is blocked. Enable it in app settings.")]
    PermissionBlocked,
    #[error("Could not fetch the current position.")]
    PositionUnavailable,
    #[error("No location selected. Tap on the map first.")]
    NoSelection,
    #[error("Address lookup fell back to the placeholder value.")]
    GeocodeDegraded,
}
