//! Device position fixes: the one-shot provider seam and a last-fix cache
//! that trades freshness for latency via the max-age option.

use crate::types::Coordinate;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Default wait budget for one fix.
pub const DEFAULT_FIX_TIMEOUT: Duration = Duration::from_secs(15);

/// Default acceptable age for a reused fix.
pub const DEFAULT_FIX_MAX_AGE: Duration = Duration::from_secs(10);

/// Parameters for a single position request.
#[derive(Debug, Clone, Copy)]
pub struct FixOptions {
    /// Ask the device for its best (GPS-grade) accuracy.
    pub high_accuracy: bool,
    /// How long to wait for the fix before giving up.
    pub timeout: Duration,
    /// A cached fix no older than this may be returned instead of a fresh
    /// one. Zero disables reuse.
    pub max_age: Duration,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: DEFAULT_FIX_TIMEOUT,
            max_age: DEFAULT_FIX_MAX_AGE,
        }
    }
}

/// Why a position fix could not be produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    #[error("position request timed out after {0:?}")]
    Timeout(Duration),
    #[error("location service is disabled")]
    Disabled,
    #[error("position sensor error: {0}")]
    Sensor(String),
}

/// One-shot source of device position fixes.
///
/// Exactly one fix is requested per call and there is no internal retry loop;
/// retrying is the caller's decision. Implementations honor
/// [`FixOptions::timeout`] themselves, and the coordinator additionally bounds
/// every dispatched call so a misbehaving provider cannot stall it.
#[async_trait]
pub trait PositionProvider: Send + Sync {
    async fn current_position(&self, opts: &FixOptions) -> Result<Coordinate, PositionError>;
}

// ─── Last-fix cache ──────────────────────────────────────────────

struct CachedFix {
    coordinate: Coordinate,
    fetched_at_ms: i64,
}

/// Provider decorator that serves the most recent fix while it is younger
/// than the call's `max_age`, delegating to the inner provider otherwise.
///
/// Holds a single fix, not a history; failed inner calls leave the cache
/// untouched.
pub struct LastFixCache {
    inner: Arc<dyn PositionProvider>,
    last: Mutex<Option<CachedFix>>,
}

impl LastFixCache {
    pub fn new(inner: Arc<dyn PositionProvider>) -> Self {
        Self {
            inner,
            last: Mutex::new(None),
        }
    }

    fn cached_within(&self, max_age: Duration) -> Option<Coordinate> {
        if max_age.is_zero() {
            return None;
        }
        let last = self.last.lock().expect("fix cache lock");
        let fix = last.as_ref()?;
        let age_ms = chrono::Utc::now().timestamp_millis() - fix.fetched_at_ms;
        if age_ms <= max_age.as_millis() as i64 {
            log::debug!("serving cached fix aged {age_ms} ms");
            Some(fix.coordinate)
        } else {
            None
        }
    }

    fn store(&self, coordinate: Coordinate) {
        let mut last = self.last.lock().expect("fix cache lock");
        *last = Some(CachedFix {
            coordinate,
            fetched_at_ms: chrono::Utc::now().timestamp_millis(),
        });
    }
}

#[async_trait]
impl PositionProvider for LastFixCache {
    async fn current_position(&self, opts: &FixOptions) -> Result<Coordinate, PositionError> {
        if let Some(coordinate) = self.cached_within(opts.max_age) {
            return Ok(coordinate);
        }
        let coordinate = self.inner.current_position(opts).await?;
        self.store(coordinate);
        Ok(coordinate)
    }
}
