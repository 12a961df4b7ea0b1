//! Reverse geocoding with a defined fallback.
//!
//! Lookup backends may fail; [`GeocodingClient`] may not. It bounds every
//! lookup with a timeout and absorbs all failure modes into the fixed
//! fallback string, so an unreadable address never blocks an acquisition.

use crate::types::{Coordinate, FALLBACK_ADDRESS};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default budget for one address lookup.
pub const DEFAULT_GEOCODE_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = "geofix/0.3 (location-acquisition)";

/// Why an address lookup failed. Absorbed by the client; surfaces in logs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeocodeError {
    #[error("network error: {0}")]
    Network(String),
    #[error("service returned status {0}")]
    Status(String),
    #[error("empty result set")]
    EmptyResults,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// A fallible coordinate-to-address resolver.
#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn lookup(&self, coordinate: Coordinate) -> Result<String, GeocodeError>;
}

// ─── Client ──────────────────────────────────────────────────────

/// Resolves a coordinate to an address string, or the fallback.
///
/// Reverse geocoding is cosmetic, not blocking. Whatever goes wrong with
/// the lookup, the caller gets [`FALLBACK_ADDRESS`] and the acquisition
/// proceeds on the coordinate alone.
#[derive(Clone)]
pub struct GeocodingClient {
    backend: Arc<dyn AddressLookup>,
    timeout: Duration,
}

impl GeocodingClient {
    pub fn new(backend: Arc<dyn AddressLookup>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_GEOCODE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve `coordinate` to an address. Never fails.
    pub async fn reverse_geocode(&self, coordinate: Coordinate) -> String {
        let result = match tokio::time::timeout(self.timeout, self.backend.lookup(coordinate)).await
        {
            Ok(result) => result,
            Err(_) => Err(GeocodeError::Timeout(self.timeout)),
        };
        match result {
            Ok(address) if !address.trim().is_empty() => address,
            Ok(_) => {
                log::warn!("reverse geocoding for ({coordinate}) returned an empty address");
                FALLBACK_ADDRESS.to_string()
            }
            Err(err) => {
                log::warn!("reverse geocoding for ({coordinate}) degraded: {err}");
                FALLBACK_ADDRESS.to_string()
            }
        }
    }
}

// ─── HTTP backend ────────────────────────────────────────────────

/// Production endpoint for the address-resolution service.
pub const GEOCODE_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Wire format of the service response.
#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: String,
}

/// [`AddressLookup`] over the Google-style geocoding HTTP API:
/// `GET {endpoint}?latlng={lat},{lng}&key={api_key}`.
pub struct HttpLookup {
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl HttpLookup {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: GEOCODE_ENDPOINT.to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_GEOCODE_TIMEOUT,
        }
    }

    /// Point at a different endpoint (staging, local stub).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request_url(&self, coordinate: Coordinate) -> String {
        format!(
            "{}?latlng={},{}&key={}",
            self.endpoint,
            coordinate.latitude(),
            coordinate.longitude(),
            self.api_key,
        )
    }
}

#[async_trait]
impl AddressLookup for HttpLookup {
    async fn lookup(&self, coordinate: Coordinate) -> Result<String, GeocodeError> {
        let url = self.request_url(coordinate);
        let timeout = self.timeout;
        // ureq is blocking; keep it off the coordinator's runtime threads.
        let response = tokio::task::spawn_blocking(move || fetch_response(&url, timeout))
            .await
            .map_err(|e| GeocodeError::Network(e.to_string()))??;
        address_from(response)
    }
}

fn fetch_response(url: &str, timeout: Duration) -> Result<GeocodeResponse, GeocodeError> {
    let response = ureq::get(url)
        .set("User-Agent", USER_AGENT)
        .timeout(timeout)
        .call()
        .map_err(|e| GeocodeError::Network(e.to_string()))?;

    response
        .into_json()
        .map_err(|e| GeocodeError::InvalidResponse(e.to_string()))
}

/// Extract the first formatted address, or the reason there is none.
fn address_from(response: GeocodeResponse) -> Result<String, GeocodeError> {
    if response.status != "OK" {
        let status = match response.error_message {
            Some(message) => format!("{}: {}", response.status, message),
            None => response.status,
        };
        return Err(GeocodeError::Status(status));
    }
    let first = response.results.into_iter().next();
    match first {
        Some(result) if !result.formatted_address.trim().is_empty() => {
            Ok(result.formatted_address)
        }
        _ => Err(GeocodeError::EmptyResults),
    }
}
