//! Error taxonomy for the engine.
//!
//! Two very different failure classes live here:
//! - [`RejectReason`]: a signal that could not be turned into a position.
//!   Not an error for the run; the simulator records it and moves on.
//! - [`InvariantViolation`]: a caller bug (malformed signal, unordered bars,
//!   a stop that retreated). Always fatal, surfaced through [`SimulationError`]
//!   together with the signal or position that tripped it.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a signal was not converted into a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Stop-loss is at the entry price or on its profitable side.
    NonPositiveRiskDistance,
    /// Entry price is zero or negative.
    NonPositiveEntryPrice,
    /// After slippage the entry already sits at or beyond the first target.
    EntryBeyondTarget,
    /// Risk fraction is not in (0, 1].
    RiskFractionOutOfRange,
    /// Capital is zero or negative.
    NonPositiveCapital,
    /// The concurrency cap is already reached.
    MaxConcurrentPositions,
    /// No free margin left for another position.
    InsufficientCapital,
    /// The series ends before the position timeout could elapse.
    TimeoutWindowUnavailable,
    /// The signal's timestamp matches no bar in the series.
    NoMatchingBar,
    /// Another signal already claimed this bar.
    DuplicateSignal,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NonPositiveRiskDistance => "non_positive_risk_distance",
            Self::NonPositiveEntryPrice => "non_positive_entry_price",
            Self::EntryBeyondTarget => "entry_beyond_target",
            Self::RiskFractionOutOfRange => "risk_fraction_out_of_range",
            Self::NonPositiveCapital => "non_positive_capital",
            Self::MaxConcurrentPositions => "max_concurrent_positions",
            Self::InsufficientCapital => "insufficient_capital",
            Self::TimeoutWindowUnavailable => "timeout_window_unavailable",
            Self::NoMatchingBar => "no_matching_bar",
            Self::DuplicateSignal => "duplicate_signal",
        };
        f.write_str(s)
    }
}

/// A broken precondition. Indicates a bug in whoever produced the input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("take-profit close fractions sum to {sum}, expected 1.0")]
    CloseFractionSum { sum: f64 },

    #[error("take-profit level {level} has close fraction {fraction} outside (0, 1]")]
    CloseFractionOutOfRange { level: usize, fraction: f64 },

    #[error("take-profit level {level} is not farther from entry than the previous level")]
    LevelOrdering { level: usize },

    #[error("take-profit level {level} at {price} lies on the losing side of entry")]
    LevelWrongSide { level: usize, price: f64 },

    #[error("invalid trailing stop config: {0}")]
    InvalidTrailing(String),

    #[error("invalid exit profile: {0}")]
    InvalidProfile(String),

    #[error("bar at {current} arrived after bar at {previous}")]
    OutOfOrderBar {
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },

    #[error("bar at {timestamp} has void or inconsistent OHLC values")]
    InvalidBar { timestamp: NaiveDateTime },

    #[error("active stop moved against the holder: {previous} -> {current}")]
    StopRetreat { previous: f64, current: f64 },

    #[error("position finalized with remaining fraction {remaining}")]
    PositionNotClosed { remaining: f64 },

    #[error("closed fractions sum to {sum}, expected 1.0")]
    LedgerImbalance { sum: f64 },
}

/// Fatal simulation failure, tagged with the offending signal or position.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("invalid simulation config: {0}")]
    Config(String),

    #[error("malformed price series: {source}")]
    Series { source: InvariantViolation },

    #[error("signal at {signal_time} rejected as malformed: {source}")]
    Signal {
        signal_time: NaiveDateTime,
        source: InvariantViolation,
    },

    #[error("position opened at {opened_at} failed at bar {bar_time}: {source}")]
    Position {
        opened_at: NaiveDateTime,
        bar_time: NaiveDateTime,
        source: InvariantViolation,
    },
}

impl SimulationError {
    /// The underlying invariant, if this error carries one.
    pub fn violation(&self) -> Option<&InvariantViolation> {
        match self {
            Self::Config(_) => None,
            Self::Series { source }
            | Self::Signal { source, .. }
            | Self::Position { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reason_display_is_snake_case() {
        assert_eq!(
            RejectReason::NonPositiveRiskDistance.to_string(),
            "non_positive_risk_distance"
        );
        assert_eq!(RejectReason::EntryBeyondTarget.to_string(), "entry_beyond_target");
        assert_eq!(
            RejectReason::MaxConcurrentPositions.to_string(),
            "max_concurrent_positions"
        );
    }

    #[test]
    fn reject_reason_serializes_like_display() {
        let json = serde_json::to_string(&RejectReason::TimeoutWindowUnavailable).unwrap();
        assert_eq!(json, "\"timeout_window_unavailable\"");
    }

    #[test]
    fn simulation_error_exposes_violation() {
        let err = SimulationError::Series {
            source: InvariantViolation::CloseFractionSum { sum: 0.9 },
        };
        assert!(matches!(
            err.violation(),
            Some(InvariantViolation::CloseFractionSum { .. })
        ));
        assert!(SimulationError::Config("x".into()).violation().is_none());
    }
}
