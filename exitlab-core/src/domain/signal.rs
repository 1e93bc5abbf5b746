//! Signal: an already-identified trade setup handed to the engine.
//!
//! Signals are produced upstream (pattern detection lives elsewhere) and are
//! immutable once they reach the simulator.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::bar::Bar;
use crate::error::InvariantViolation;

/// Tolerance for the close-fraction sum and ledger checks.
pub const FRACTION_EPSILON: f64 = 1e-6;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// Map the upstream `{-1, 0, 1}` encoding. Zero means "no signal".
    pub fn from_code(code: i64) -> Option<Self> {
        match code.signum() {
            1 => Some(Direction::Long),
            -1 => Some(Direction::Short),
            _ => None,
        }
    }

    /// The price extreme that works in the holder's favour (high for longs).
    pub fn favorable_extreme(self, bar: &Bar) -> f64 {
        match self {
            Direction::Long => bar.high,
            Direction::Short => bar.low,
        }
    }

    /// The price extreme that works against the holder (low for longs).
    pub fn adverse_extreme(self, bar: &Bar) -> f64 {
        match self {
            Direction::Long => bar.low,
            Direction::Short => bar.high,
        }
    }

    /// True if `a` is strictly more favourable than `b` for this side.
    ///
    /// Applies to prices and stops alike: a higher stop is tighter for a long.
    pub fn is_better(self, a: f64, b: f64) -> bool {
        match self {
            Direction::Long => a > b,
            Direction::Short => a < b,
        }
    }

    /// The more favourable of two prices.
    pub fn better_of(self, a: f64, b: f64) -> f64 {
        if self.is_better(a, b) {
            a
        } else {
            b
        }
    }

    /// Signed move from `from` to `to`, positive when it favours the holder.
    pub fn favorable_move(self, from: f64, to: f64) -> f64 {
        (to - from) * self.sign()
    }

    /// Shift `price` by `distance` toward the holder's profit.
    pub fn offset_favorable(self, price: f64, distance: f64) -> f64 {
        price + distance * self.sign()
    }
}

/// What happens to the rest of the position when a take-profit level fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelAction {
    #[default]
    None,
    MoveStopToBreakeven,
    ActivateTrailing,
}

/// One take-profit rung.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    pub price: f64,
    /// Fraction of the *original* position closed at this level.
    pub close_fraction: f64,
    #[serde(default)]
    pub on_fill: LevelAction,
}

impl TakeProfitLevel {
    pub fn new(price: f64, close_fraction: f64) -> Self {
        Self {
            price,
            close_fraction,
            on_fill: LevelAction::None,
        }
    }

    pub fn with_action(mut self, action: LevelAction) -> Self {
        self.on_fill = action;
        self
    }
}

/// Trailing stop rule.
///
/// Distances are measured from the favourable extreme reached so far, never
/// from the entry price, so the stop only ratchets with new highs (lows).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TrailingStopConfig {
    #[default]
    None,
    /// Stop trails the extreme by a fixed price distance.
    Fixed { distance: f64 },
    /// Stop trails the extreme by a fraction of the extreme (0.05 = 5%).
    Percent { pct: f64 },
    /// Move to breakeven once the extreme is `trigger_distance` past entry,
    /// then trail by `trail_distance`.
    BreakevenThenTrail {
        trigger_distance: f64,
        trail_distance: f64,
    },
}

impl TrailingStopConfig {
    pub fn is_none(&self) -> bool {
        matches!(self, TrailingStopConfig::None)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TrailingStopConfig::None => "none",
            TrailingStopConfig::Fixed { .. } => "fixed",
            TrailingStopConfig::Percent { .. } => "percent",
            TrailingStopConfig::BreakevenThenTrail { .. } => "breakeven_then_trail",
        }
    }

    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(InvariantViolation::InvalidTrailing(format!(
                    "{name} must be positive, got {v}"
                )))
            }
        };
        match *self {
            TrailingStopConfig::None => Ok(()),
            TrailingStopConfig::Fixed { distance } => positive("distance", distance),
            TrailingStopConfig::Percent { pct } => {
                positive("pct", pct)?;
                if pct >= 1.0 {
                    return Err(InvariantViolation::InvalidTrailing(format!(
                        "pct must be < 1.0, got {pct}"
                    )));
                }
                Ok(())
            }
            TrailingStopConfig::BreakevenThenTrail {
                trigger_distance,
                trail_distance,
            } => {
                positive("trigger_distance", trigger_distance)?;
                positive("trail_distance", trail_distance)
            }
        }
    }
}

/// An entry instruction with its exit plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: NaiveDateTime,
    pub direction: Direction,
    pub entry_price: f64,
    pub initial_stop_loss: f64,
    /// Ordered nearest-first.
    pub take_profit_levels: Vec<TakeProfitLevel>,
    #[serde(default)]
    pub trailing: TrailingStopConfig,
    /// Pattern label used to pick an exit profile ("momentum", "reversal", ...).
    #[serde(default)]
    pub tag: Option<String>,
}

impl Signal {
    pub fn new(
        timestamp: NaiveDateTime,
        direction: Direction,
        entry_price: f64,
        initial_stop_loss: f64,
        take_profit_levels: Vec<TakeProfitLevel>,
    ) -> Self {
        Self {
            timestamp,
            direction,
            entry_price,
            initial_stop_loss,
            take_profit_levels,
            trailing: TrailingStopConfig::None,
            tag: None,
        }
    }

    pub fn with_trailing(mut self, trailing: TrailingStopConfig) -> Self {
        self.trailing = trailing;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Absolute distance between entry and initial stop.
    pub fn risk_distance(&self) -> f64 {
        (self.entry_price - self.initial_stop_loss).abs()
    }

    /// Structural checks on the take-profit ladder and trailing rule. A
    /// failure here is a bug in the signal producer.
    ///
    /// The stop side is *not* checked: a stop at or beyond entry is a
    /// rejectable signal, handled when the simulator tries to open it.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let dir = self.direction;
        let entry = self.entry_price;

        let mut sum = 0.0;
        let mut prev_distance = 0.0;
        for (i, level) in self.take_profit_levels.iter().enumerate() {
            let n = i + 1;
            if !(level.close_fraction > 0.0 && level.close_fraction <= 1.0) {
                return Err(InvariantViolation::CloseFractionOutOfRange {
                    level: n,
                    fraction: level.close_fraction,
                });
            }
            let distance = dir.favorable_move(entry, level.price);
            if distance <= 0.0 {
                return Err(InvariantViolation::LevelWrongSide {
                    level: n,
                    price: level.price,
                });
            }
            if distance <= prev_distance {
                return Err(InvariantViolation::LevelOrdering { level: n });
            }
            prev_distance = distance;
            sum += level.close_fraction;
        }

        if (sum - 1.0).abs() > FRACTION_EPSILON {
            return Err(InvariantViolation::CloseFractionSum { sum });
        }

        self.trailing.validate()
    }

    /// Whether a trailing rule is armed only by a take-profit fill.
    pub fn trailing_waits_for_level(&self) -> bool {
        self.take_profit_levels
            .iter()
            .any(|l| l.on_fill == LevelAction::ActivateTrailing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn long_signal(levels: Vec<TakeProfitLevel>) -> Signal {
        Signal::new(ts(), Direction::Long, 100.0, 95.0, levels)
    }

    #[test]
    fn direction_from_code() {
        assert_eq!(Direction::from_code(1), Some(Direction::Long));
        assert_eq!(Direction::from_code(-1), Some(Direction::Short));
        assert_eq!(Direction::from_code(0), None);
    }

    #[test]
    fn is_better_respects_side() {
        assert!(Direction::Long.is_better(101.0, 100.0));
        assert!(!Direction::Long.is_better(99.0, 100.0));
        assert!(Direction::Short.is_better(99.0, 100.0));
        assert!(!Direction::Short.is_better(100.0, 100.0));
    }

    #[test]
    fn single_target_is_valid() {
        let s = long_signal(vec![TakeProfitLevel::new(110.0, 1.0)]);
        assert!(s.validate().is_ok());
        assert_eq!(s.risk_distance(), 5.0);
    }

    #[test]
    fn fractions_must_sum_to_one() {
        let s = long_signal(vec![
            TakeProfitLevel::new(110.0, 0.5),
            TakeProfitLevel::new(120.0, 0.4),
        ]);
        assert!(matches!(
            s.validate(),
            Err(InvariantViolation::CloseFractionSum { .. })
        ));
    }

    #[test]
    fn fraction_sum_tolerates_rounding() {
        let s = long_signal(vec![
            TakeProfitLevel::new(110.0, 1.0 / 3.0),
            TakeProfitLevel::new(115.0, 1.0 / 3.0),
            TakeProfitLevel::new(120.0, 1.0 / 3.0),
        ]);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn levels_must_move_away_from_entry() {
        let s = long_signal(vec![
            TakeProfitLevel::new(120.0, 0.5),
            TakeProfitLevel::new(110.0, 0.5),
        ]);
        assert_eq!(
            s.validate(),
            Err(InvariantViolation::LevelOrdering { level: 2 })
        );
    }

    #[test]
    fn short_level_above_entry_is_wrong_side() {
        let s = Signal::new(
            ts(),
            Direction::Short,
            100.0,
            105.0,
            vec![TakeProfitLevel::new(101.0, 1.0)],
        );
        assert!(matches!(
            s.validate(),
            Err(InvariantViolation::LevelWrongSide { level: 1, .. })
        ));
    }

    #[test]
    fn stop_on_profit_side_is_not_structural() {
        let s = Signal::new(
            ts(),
            Direction::Long,
            100.0,
            105.0,
            vec![TakeProfitLevel::new(110.0, 1.0)],
        );
        assert!(s.validate().is_ok());
    }

    #[test]
    fn zero_risk_is_left_to_the_sizer() {
        let s = Signal::new(
            ts(),
            Direction::Long,
            100.0,
            100.0,
            vec![TakeProfitLevel::new(110.0, 1.0)],
        );
        assert!(s.validate().is_ok());
        assert_eq!(s.risk_distance(), 0.0);
    }

    #[test]
    fn trailing_percent_bounds() {
        assert!(TrailingStopConfig::Percent { pct: 0.05 }.validate().is_ok());
        assert!(TrailingStopConfig::Percent { pct: 1.5 }.validate().is_err());
        assert!(TrailingStopConfig::Fixed { distance: 0.0 }.validate().is_err());
    }

    #[test]
    fn trailing_config_toml_shape() {
        let cfg = TrailingStopConfig::BreakevenThenTrail {
            trigger_distance: 5.0,
            trail_distance: 3.0,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"mode\":\"breakeven_then_trail\""));
        let back: TrailingStopConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
