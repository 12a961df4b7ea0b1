//! One map-picking round: provisional taps, ended by confirm or cancel.

use crate::types::Coordinate;
use thiserror::Error;

/// Confirm was pressed before any tap landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no location selected")]
pub struct NoSelection;

/// Tracks the provisional selection of a single picking round.
///
/// Every tap replaces the previous one, so at most one coordinate is pending
/// at a time. `confirm` hands the selection over and closes the round;
/// `cancel` discards it and closes. A closed session ignores further taps.
#[derive(Debug, Default)]
pub struct MapSelectionSession {
    pending: Option<Coordinate>,
    closed: bool,
}

impl MapSelectionSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest provisional selection, if any.
    pub fn pending(&self) -> Option<Coordinate> {
        self.pending
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Record a tap, replacing any earlier one. Returns false if the round
    /// is already closed and the tap was dropped.
    pub fn on_tap(&mut self, coordinate: Coordinate) -> bool {
        if self.closed {
            return false;
        }
        self.pending = Some(coordinate);
        true
    }

    /// Hand over the selection and close the round.
    ///
    /// With nothing selected this reports [`NoSelection`] and leaves the
    /// round open, so the user can still tap and confirm again.
    pub fn confirm(&mut self) -> Result<Coordinate, NoSelection> {
        if self.closed {
            return Err(NoSelection);
        }
        match self.pending.take() {
            Some(coordinate) => {
                self.closed = true;
                Ok(coordinate)
            }
            None => Err(NoSelection),
        }
    }

    /// Discard the selection and close the round.
    pub fn cancel(&mut self) {
        self.pending = None;
        self.closed = true;
    }
}
