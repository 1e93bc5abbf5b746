//! Exit policy: pure decisions about a position against one bar.
//!
//! Nothing here mutates. The lifecycle engine asks the policy "does the stop
//! fill?", "does this take-profit fill?", "where would the trailing rule put
//! the stop?" and applies the answers in its fixed order.
//!
//! Pattern-specific behaviour ("momentum setups get tighter stops") is data,
//! not code: an [`ExitProfile`] keyed by signal tag adjusts the stop distance
//! and trailing rule when the position is opened.

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, ExitReason, Position, TakeProfitLevel, TrailingStopConfig};
use crate::error::InvariantViolation;
use crate::ratchet::StopKind;

/// Fill rules shared by every position in a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitPolicy {
    /// When a bar opens beyond a stop or target, fill at the open instead of
    /// the level (worse for stops, better for targets).
    pub gap_fills: bool,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self { gap_fills: true }
    }
}

impl ExitPolicy {
    pub fn new(gap_fills: bool) -> Self {
        Self { gap_fills }
    }

    /// Fill price and reason if the bar's adverse extreme crosses the active stop.
    pub fn stop_fill(&self, position: &Position, bar: &Bar) -> Option<(f64, ExitReason)> {
        let dir = position.direction();
        let stop = position.active_stop_loss();
        if dir.is_better(dir.adverse_extreme(bar), stop) {
            return None;
        }
        let price = if self.gap_fills && dir.is_better(stop, bar.open) {
            bar.open
        } else {
            stop
        };
        Some((price, stop_reason(position.stop.kind())))
    }

    /// Fill price if the bar's favourable extreme reaches `level`.
    pub fn take_profit_fill(
        &self,
        position: &Position,
        level: &TakeProfitLevel,
        bar: &Bar,
    ) -> Option<f64> {
        let dir = position.direction();
        if dir.is_better(level.price, dir.favorable_extreme(bar)) {
            return None;
        }
        if self.gap_fills && dir.is_better(bar.open, level.price) {
            Some(bar.open)
        } else {
            Some(level.price)
        }
    }

    /// Stop proposed by the trailing rule from the favourable extreme.
    ///
    /// The caller runs the proposal through the ratchet; a looser proposal
    /// is simply dropped there.
    pub fn trailing_candidate(&self, position: &Position) -> Option<(f64, StopKind)> {
        if !position.trailing_active {
            return None;
        }
        let dir = position.direction();
        let extreme = position.favorable_extreme_price;
        let entry = position.entry_price;

        match position.trailing {
            TrailingStopConfig::None => None,
            TrailingStopConfig::Fixed { distance } => {
                Some((dir.offset_favorable(extreme, -distance), StopKind::Trailing))
            }
            TrailingStopConfig::Percent { pct } => {
                Some((extreme * (1.0 - dir.sign() * pct), StopKind::Trailing))
            }
            TrailingStopConfig::BreakevenThenTrail {
                trigger_distance,
                trail_distance,
            } => {
                let at_breakeven = !dir.is_better(entry, position.active_stop_loss());
                if at_breakeven {
                    Some((
                        dir.offset_favorable(extreme, -trail_distance),
                        StopKind::Trailing,
                    ))
                } else if dir.favorable_move(entry, extreme) >= trigger_distance {
                    Some((entry, StopKind::Breakeven))
                } else {
                    None
                }
            }
        }
    }
}

fn stop_reason(kind: StopKind) -> ExitReason {
    match kind {
        StopKind::Initial => ExitReason::StopLoss,
        StopKind::Breakeven => ExitReason::BreakevenStop,
        StopKind::Trailing => ExitReason::TrailingStop,
    }
}

/// Per-tag overrides applied when a position opens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitProfile {
    /// Multiplier on the entry-to-stop distance, in (0, 1]. 0.5 halves it.
    #[serde(default = "default_stop_scale")]
    pub stop_scale: f64,
    /// Replaces the signal's trailing rule when set.
    #[serde(default)]
    pub trailing: Option<TrailingStopConfig>,
}

fn default_stop_scale() -> f64 {
    1.0
}

impl Default for ExitProfile {
    fn default() -> Self {
        Self {
            stop_scale: default_stop_scale(),
            trailing: None,
        }
    }
}

impl ExitProfile {
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        if !(self.stop_scale > 0.0 && self.stop_scale <= 1.0) {
            return Err(InvariantViolation::InvalidProfile(format!(
                "stop_scale must be in (0, 1], got {}",
                self.stop_scale
            )));
        }
        match self.trailing {
            Some(t) => t.validate(),
            None => Ok(()),
        }
    }

    /// Pull `stop` toward `entry` by the profile's scale.
    pub fn scaled_stop(&self, entry: f64, stop: f64) -> f64 {
        entry - (entry - stop) * self.stop_scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, Signal};
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(ts(), open, high, low, close, 1_000.0)
    }

    fn position(direction: Direction, stop: f64, tp: f64, trailing: TrailingStopConfig) -> Position {
        let signal = Signal::new(
            ts(),
            direction,
            100.0,
            stop,
            vec![TakeProfitLevel::new(tp, 1.0)],
        )
        .with_trailing(trailing);
        Position::open(signal, 100.0, stop, 10_000.0, ts(), 0)
    }

    #[test]
    fn long_stop_fills_at_level() {
        let pos = position(Direction::Long, 95.0, 110.0, TrailingStopConfig::None);
        let fill = ExitPolicy::default().stop_fill(&pos, &bar(99.0, 100.0, 94.0, 96.0));
        assert_eq!(fill, Some((95.0, ExitReason::StopLoss)));
    }

    #[test]
    fn long_stop_gap_fills_at_open() {
        let pos = position(Direction::Long, 95.0, 110.0, TrailingStopConfig::None);
        let b = bar(92.0, 93.0, 90.0, 91.0);
        assert_eq!(
            ExitPolicy::default().stop_fill(&pos, &b),
            Some((92.0, ExitReason::StopLoss))
        );
        assert_eq!(
            ExitPolicy::new(false).stop_fill(&pos, &b),
            Some((95.0, ExitReason::StopLoss))
        );
    }

    #[test]
    fn short_stop_untouched() {
        let pos = position(Direction::Short, 105.0, 90.0, TrailingStopConfig::None);
        assert!(ExitPolicy::default()
            .stop_fill(&pos, &bar(100.0, 104.9, 98.0, 99.0))
            .is_none());
    }

    #[test]
    fn take_profit_touch_fills() {
        let pos = position(Direction::Long, 95.0, 110.0, TrailingStopConfig::None);
        let level = pos.signal.take_profit_levels[0].clone();
        let policy = ExitPolicy::default();
        assert_eq!(
            policy.take_profit_fill(&pos, &level, &bar(105.0, 110.0, 104.0, 108.0)),
            Some(110.0)
        );
        assert_eq!(
            policy.take_profit_fill(&pos, &level, &bar(105.0, 109.9, 104.0, 108.0)),
            None
        );
        // Gapped above the target: the better open is taken.
        assert_eq!(
            policy.take_profit_fill(&pos, &level, &bar(112.0, 113.0, 111.0, 112.0)),
            Some(112.0)
        );
    }

    #[test]
    fn percent_trail_measured_from_extreme() {
        let mut pos = position(
            Direction::Long,
            90.0,
            150.0,
            TrailingStopConfig::Percent { pct: 0.10 },
        );
        pos.favorable_extreme_price = 120.0;
        let (stop, kind) = ExitPolicy::default().trailing_candidate(&pos).unwrap();
        assert!((stop - 108.0).abs() < 1e-9);
        assert_eq!(kind, StopKind::Trailing);
    }

    #[test]
    fn fixed_trail_short() {
        let mut pos = position(
            Direction::Short,
            110.0,
            50.0,
            TrailingStopConfig::Fixed { distance: 4.0 },
        );
        pos.favorable_extreme_price = 80.0;
        let (stop, _) = ExitPolicy::default().trailing_candidate(&pos).unwrap();
        assert_eq!(stop, 84.0);
    }

    #[test]
    fn breakeven_then_trail_phases() {
        let policy = ExitPolicy::default();
        let mut pos = position(
            Direction::Long,
            95.0,
            150.0,
            TrailingStopConfig::BreakevenThenTrail {
                trigger_distance: 5.0,
                trail_distance: 3.0,
            },
        );

        pos.favorable_extreme_price = 103.0;
        assert!(policy.trailing_candidate(&pos).is_none());

        pos.favorable_extreme_price = 106.0;
        assert_eq!(
            policy.trailing_candidate(&pos),
            Some((100.0, StopKind::Breakeven))
        );

        pos.stop.tighten(100.0, StopKind::Breakeven);
        pos.favorable_extreme_price = 112.0;
        assert_eq!(
            policy.trailing_candidate(&pos),
            Some((109.0, StopKind::Trailing))
        );
    }

    #[test]
    fn inactive_trailing_proposes_nothing() {
        let mut pos = position(
            Direction::Long,
            95.0,
            150.0,
            TrailingStopConfig::Percent { pct: 0.05 },
        );
        pos.trailing_active = false;
        assert!(ExitPolicy::default().trailing_candidate(&pos).is_none());
    }

    #[test]
    fn profile_scales_stop_distance() {
        let profile = ExitProfile {
            stop_scale: 0.5,
            trailing: None,
        };
        assert_eq!(profile.scaled_stop(100.0, 90.0), 95.0);
        assert_eq!(profile.scaled_stop(100.0, 110.0), 105.0);
        assert!(profile.validate().is_ok());
        assert!(ExitProfile {
            stop_scale: 0.0,
            trailing: None
        }
        .validate()
        .is_err());
    }
}
