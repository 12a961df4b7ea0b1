//! Device location permission: raw platform status, the normalized outcome,
//! and the gate that turns one into the other with at most one prompt.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Normalized result of a permission negotiation.
///
/// `Blocked` is terminal for the current session: re-requesting cannot
/// escalate it, only an out-of-band settings change can.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied,
    Blocked,
}

impl fmt::Display for PermissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Raw status reported by the OS permission subsystem.
///
/// Platform backends collapse their native result sets onto these four
/// values; a partial grant (e.g. reduced-accuracy or "limited") maps to
/// `Denied`, which is re-askable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Blocked,
    NotDetermined,
}

impl fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
            Self::Blocked => write!(f, "blocked"),
            Self::NotDetermined => write!(f, "not-determined"),
        }
    }
}

/// The OS permission surface: one silent status query, one prompting request.
///
/// Implemented per platform by the embedding application; [`crate::sim`]
/// ships a scriptable backend for development and tests.
#[async_trait]
pub trait PermissionBackend: Send + Sync {
    /// Current status without any user-visible side effect.
    async fn query(&self) -> PermissionStatus;

    /// Show the OS permission dialog and report the resulting status.
    async fn request(&self) -> PermissionStatus;
}

/// Runs the check-then-request negotiation over a platform backend.
///
/// Shows at most one OS dialog per [`check_or_request`](Self::check_or_request)
/// call: an already-granted or blocked status short-circuits without
/// prompting.
#[derive(Clone)]
pub struct PermissionGate {
    backend: Arc<dyn PermissionBackend>,
}

impl PermissionGate {
    pub fn new(backend: Arc<dyn PermissionBackend>) -> Self {
        Self { backend }
    }

    pub async fn check_or_request(&self) -> PermissionOutcome {
        let status = self.backend.query().await;
        let outcome = match status {
            PermissionStatus::Granted => PermissionOutcome::Granted,
            // Prompting while blocked is a silent no-op on most platforms.
            PermissionStatus::Blocked => PermissionOutcome::Blocked,
            PermissionStatus::Denied | PermissionStatus::NotDetermined => {
                match self.backend.request().await {
                    PermissionStatus::Granted => PermissionOutcome::Granted,
                    PermissionStatus::Blocked => PermissionOutcome::Blocked,
                    // A dialog dismissed without an answer counts as denied.
                    PermissionStatus::Denied | PermissionStatus::NotDetermined => {
                        PermissionOutcome::Denied
                    }
                }
            }
        };
        log::debug!("permission status {status} resolved to {outcome}");
        outcome
    }
}
