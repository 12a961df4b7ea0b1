//! Geofix — location acquisition and confirmation.
//!
//! Attaches one committed, address-resolved location to whatever the caller
//! is building, from either a device position fix or a point picked on a
//! map. The [`coordinator`] event loop drives permission negotiation, the
//! fix, and reverse geocoding, and guarantees at most one commit per
//! attempt no matter how the user mashes the buttons.
//!
//! The device and network edges are trait seams ([`permission::PermissionBackend`],
//! [`position::PositionProvider`], [`geocode::AddressLookup`]); [`sim`]
//! ships scriptable implementations for development and tests.

pub mod coordinator;
pub mod geocode;
pub mod permission;
pub mod position;
pub mod session;
pub mod sim;
pub mod types;

pub use coordinator::{
    Collaborators, CoordinatorConfig, CoordinatorEvent, CoordinatorHandle, CoordinatorState,
};
pub use geocode::{GeocodingClient, HttpLookup};
pub use permission::{PermissionGate, PermissionOutcome};
pub use position::FixOptions;
pub use types::{Coordinate, ErrorKind, Location, DEFAULT_PICK_CENTER, FALLBACK_ADDRESS};
