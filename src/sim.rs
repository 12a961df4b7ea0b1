//! Scriptable stand-ins for the device and network collaborators.
//!
//! The real permission dialog, position sensor, and geocoding service only
//! exist on a device. These simulators play their roles from a script, for
//! the demo binary and for exercising the coordinator deterministically.

use crate::geocode::{AddressLookup, GeocodeError};
use crate::permission::{PermissionBackend, PermissionStatus};
use crate::position::{FixOptions, PositionError, PositionProvider};
use crate::types::Coordinate;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

// ─── Latch ───────────────────────────────────────────────────────

/// Holds simulated operations in flight until released.
///
/// Each gated operation waits for one permit; `release(n)` lets the next
/// `n` waiters through, in arrival order.
#[derive(Clone)]
pub struct Latch {
    permits: Arc<Semaphore>,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    async fn pass(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Permissions ─────────────────────────────────────────────────

/// Permission backend answering from two fixed statuses.
pub struct SimPermissions {
    queried: PermissionStatus,
    requested: PermissionStatus,
    prompts: AtomicUsize,
}

impl SimPermissions {
    /// Permission was granted in an earlier session; no prompt needed.
    pub fn granted() -> Self {
        Self::answering(PermissionStatus::Granted, PermissionStatus::Granted)
    }

    /// First ask: the prompt appears and the user accepts.
    pub fn prompt_grants() -> Self {
        Self::answering(PermissionStatus::NotDetermined, PermissionStatus::Granted)
    }

    /// First ask: the prompt appears and the user declines.
    pub fn prompt_denies() -> Self {
        Self::answering(PermissionStatus::NotDetermined, PermissionStatus::Denied)
    }

    /// Previously declined and still declined when re-asked.
    pub fn denied() -> Self {
        Self::answering(PermissionStatus::Denied, PermissionStatus::Denied)
    }

    /// Permanently blocked; only a settings change could lift it.
    pub fn blocked() -> Self {
        Self::answering(PermissionStatus::Blocked, PermissionStatus::Blocked)
    }

    fn answering(queried: PermissionStatus, requested: PermissionStatus) -> Self {
        Self {
            queried,
            requested,
            prompts: AtomicUsize::new(0),
        }
    }

    /// How many times the simulated dialog was shown.
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionBackend for SimPermissions {
    async fn query(&self) -> PermissionStatus {
        self.queried
    }

    async fn request(&self) -> PermissionStatus {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.requested
    }
}

// ─── Positions ───────────────────────────────────────────────────

/// Position provider that pops one scripted result per call.
///
/// An exhausted script reports the location service as disabled.
pub struct SimPositions {
    script: Mutex<VecDeque<Result<Coordinate, PositionError>>>,
    latch: Option<Latch>,
    calls: AtomicUsize,
}

impl SimPositions {
    pub fn new(script: impl IntoIterator<Item = Result<Coordinate, PositionError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            latch: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Make every call wait on the latch before answering.
    pub fn gated(mut self, latch: Latch) -> Self {
        self.latch = Some(latch);
        self
    }

    /// How many fixes have been requested, including gated ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PositionProvider for SimPositions {
    async fn current_position(&self, _opts: &FixOptions) -> Result<Coordinate, PositionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latch) = &self.latch {
            latch.pass().await;
        }
        self.script
            .lock()
            .expect("position script lock")
            .pop_front()
            .unwrap_or(Err(PositionError::Disabled))
    }
}

// ─── Address lookup ──────────────────────────────────────────────

/// Address lookup that answers every call with the same result.
pub struct SimLookup {
    answer: Result<String, GeocodeError>,
    latch: Option<Latch>,
    calls: AtomicUsize,
}

impl SimLookup {
    pub fn returning(address: impl Into<String>) -> Self {
        Self::answering(Ok(address.into()))
    }

    pub fn failing() -> Self {
        Self::answering(Err(GeocodeError::Status("ZERO_RESULTS".into())))
    }

    fn answering(answer: Result<String, GeocodeError>) -> Self {
        Self {
            answer,
            latch: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Make every call wait on the latch before answering.
    pub fn gated(mut self, latch: Latch) -> Self {
        self.latch = Some(latch);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AddressLookup for SimLookup {
    async fn lookup(&self, _coordinate: Coordinate) -> Result<String, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latch) = &self.latch {
            latch.pass().await;
        }
        self.answer.clone()
    }
}
