//! Stop ratchet.
//!
//! **Core rule:** once a position is open its stop may tighten, never loosen.
//! - Long positions: the stop can only rise
//! - Short positions: the stop can only fall
//!
//! The level is private: the only way to move it is [`StopRatchet::tighten`],
//! so a retreating stop cannot be written by accident.

use serde::{Deserialize, Serialize};

use crate::domain::Direction;
use crate::error::InvariantViolation;

/// Which rule placed the current stop. Decides the exit reason when it fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Initial,
    Breakeven,
    Trailing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRatchet {
    side: Direction,
    level: f64,
    kind: StopKind,
}

impl StopRatchet {
    pub fn new(side: Direction, initial_level: f64) -> Self {
        Self {
            side,
            level: initial_level,
            kind: StopKind::Initial,
        }
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn kind(&self) -> StopKind {
        self.kind
    }

    pub fn side(&self) -> Direction {
        self.side
    }

    /// Move the stop to `candidate` if that is strictly tighter.
    ///
    /// Returns whether the stop moved. A looser candidate is ignored, not an
    /// error: trailing rules routinely propose stops behind the current one
    /// after a retracement.
    ///
    /// ```
    /// use exitlab_core::domain::Direction;
    /// use exitlab_core::ratchet::{StopKind, StopRatchet};
    ///
    /// let mut stop = StopRatchet::new(Direction::Long, 95.0);
    /// assert!(stop.tighten(100.0, StopKind::Breakeven));
    /// assert!(!stop.tighten(90.0, StopKind::Trailing));
    /// assert_eq!(stop.level(), 100.0);
    /// ```
    pub fn tighten(&mut self, candidate: f64, kind: StopKind) -> bool {
        if !candidate.is_finite() || !self.side.is_better(candidate, self.level) {
            return false;
        }
        self.level = candidate;
        self.kind = kind;
        true
    }

    /// Post-condition check against an earlier observation of this stop.
    pub fn ensure_not_loosened(&self, previous: f64) -> Result<(), InvariantViolation> {
        if self.side.is_better(previous, self.level) {
            return Err(InvariantViolation::StopRetreat {
                previous,
                current: self.level,
            });
        }
        Ok(())
    }
}
