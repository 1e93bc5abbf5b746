//! Simulation configuration, mutable run state, and run result types.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, ClosedTrade, Position};
use crate::error::{RejectReason, SimulationError};
use crate::exit_policy::ExitProfile;

/// Maximum holding period. Measured from bar indices or bar timestamps,
/// never the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionTimeout {
    Bars(usize),
    Seconds(i64),
}

impl PositionTimeout {
    /// True once a position opened at (`opened_index`, `opened_at`) has been
    /// held for the full timeout as of `bar`.
    pub fn elapsed(
        &self,
        opened_index: usize,
        opened_at: NaiveDateTime,
        bar_index: usize,
        bar: &Bar,
    ) -> bool {
        match *self {
            PositionTimeout::Bars(n) => bar_index.saturating_sub(opened_index) >= n,
            PositionTimeout::Seconds(s) => (bar.timestamp - opened_at).num_seconds() >= s,
        }
    }

    /// Whether the series holds enough bars after `entry_index` for the
    /// timeout to be reachable at all.
    pub fn fits(&self, series: &[Bar], entry_index: usize) -> bool {
        let Some(last) = series.last() else {
            return false;
        };
        match *self {
            PositionTimeout::Bars(n) => entry_index + n < series.len(),
            PositionTimeout::Seconds(s) => {
                (last.timestamp - series[entry_index].timestamp).num_seconds() >= s
            }
        }
    }
}

/// Configuration for a single simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub initial_capital: f64,
    /// Fraction of current capital put at risk per trade, in (0, 1].
    /// Out-of-range values reject every signal rather than failing the run.
    pub risk_per_trade: f64,
    pub max_concurrent_positions: usize,
    /// Charged once per trade on the full entry notional.
    pub commission_rate: f64,
    /// Entry fill is moved this fraction against the holder.
    pub slippage_rate: f64,
    #[serde(default)]
    pub position_timeout: Option<PositionTimeout>,
    pub max_leverage: f64,
    pub gap_fills: bool,
    /// Exit overrides keyed by signal tag.
    #[serde(default)]
    pub profiles: BTreeMap<String, ExitProfile>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            risk_per_trade: 0.01,
            max_concurrent_positions: 1,
            commission_rate: 0.0,
            slippage_rate: 0.0,
            position_timeout: None,
            max_leverage: 1.0,
            gap_fills: true,
            profiles: BTreeMap::new(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), SimulationError> {
        let fail = |msg: String| Err(SimulationError::Config(msg));

        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return fail(format!(
                "initial_capital must be positive, got {}",
                self.initial_capital
            ));
        }
        if self.max_concurrent_positions == 0 {
            return fail("max_concurrent_positions must be at least 1".into());
        }
        if !(self.commission_rate >= 0.0 && self.commission_rate.is_finite()) {
            return fail(format!(
                "commission_rate must be >= 0, got {}",
                self.commission_rate
            ));
        }
        if !(self.slippage_rate >= 0.0 && self.slippage_rate < 1.0) {
            return fail(format!(
                "slippage_rate must be in [0, 1), got {}",
                self.slippage_rate
            ));
        }
        if !(self.max_leverage.is_finite() && self.max_leverage > 0.0) {
            return fail(format!(
                "max_leverage must be positive, got {}",
                self.max_leverage
            ));
        }
        match self.position_timeout {
            Some(PositionTimeout::Bars(0)) => {
                return fail("position_timeout must be at least one bar".into())
            }
            Some(PositionTimeout::Seconds(s)) if s <= 0 => {
                return fail(format!("position_timeout must be positive, got {s}s"))
            }
            _ => {}
        }
        for (tag, profile) in &self.profiles {
            if let Err(e) = profile.validate() {
                return fail(format!("profile '{tag}': {e}"));
            }
        }
        Ok(())
    }
}

/// A signal that did not become a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub timestamp: NaiveDateTime,
    pub reason: RejectReason,
}

/// Mutable state that evolves bar-by-bar during the simulation loop.
#[derive(Debug)]
pub struct SimulationState {
    /// Realized capital. Moves only when a trade is finalized.
    pub capital: f64,
    pub open: Vec<Position>,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<f64>,
    pub rejections: Vec<Rejection>,
    pub total_commission: f64,
    pub max_open_positions: usize,
}

impl SimulationState {
    pub fn new(initial_capital: f64, bar_count: usize) -> Self {
        let mut equity_curve = Vec::with_capacity(bar_count + 1);
        equity_curve.push(initial_capital);
        Self {
            capital: initial_capital,
            open: Vec::new(),
            trades: Vec::new(),
            equity_curve,
            rejections: Vec::new(),
            total_commission: 0.0,
            max_open_positions: 0,
        }
    }

    /// Capital tied up by open positions at the given leverage.
    pub fn margin_in_use(&self, max_leverage: f64) -> f64 {
        self.open.iter().map(|p| p.margin(max_leverage)).sum()
    }

    /// Capital plus unrealized PnL of every open position at `price`.
    pub fn mark_to_market(&self, price: f64) -> f64 {
        self.capital + self.open.iter().map(|p| p.unrealized_pnl(price)).sum::<f64>()
    }

    pub fn reject(&mut self, timestamp: NaiveDateTime, reason: RejectReason) {
        tracing::debug!(%timestamp, %reason, "signal rejected");
        self.rejections.push(Rejection { timestamp, reason });
    }
}

/// Output of a completed simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub trades: Vec<ClosedTrade>,
    /// `initial_capital` followed by one value per bar. The last point is the
    /// settled capital after end-of-data closes.
    pub equity_curve: Vec<f64>,
    /// Ordered by signal timestamp.
    pub rejections: Vec<Rejection>,
    pub final_capital: f64,
    pub total_commission: f64,
    pub max_open_positions: usize,
    pub bar_count: usize,
}

impl SimulationResult {
    pub fn total_realized_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.realized_pnl).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(n: i64) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        (0..n)
            .map(|i| Bar::new(start + Duration::hours(i), 10.0, 11.0, 9.0, 10.0, 0.0))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn config_rejects_zero_positions() {
        let cfg = SimulationConfig {
            max_concurrent_positions: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(SimulationError::Config(_))));
    }

    #[test]
    fn config_rejects_bad_profile() {
        let mut cfg = SimulationConfig::default();
        cfg.profiles.insert(
            "momentum".into(),
            ExitProfile {
                stop_scale: 1.5,
                trailing: None,
            },
        );
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("momentum"));
    }

    #[test]
    fn bar_timeout_fits_and_elapses() {
        let bars = series(5);
        let t = PositionTimeout::Bars(3);
        assert!(t.fits(&bars, 1));
        assert!(!t.fits(&bars, 2));
        assert!(!t.elapsed(1, bars[1].timestamp, 3, &bars[3]));
        assert!(t.elapsed(1, bars[1].timestamp, 4, &bars[4]));
    }

    #[test]
    fn seconds_timeout_uses_timestamps() {
        let bars = series(4);
        let t = PositionTimeout::Seconds(2 * 3600);
        assert!(t.fits(&bars, 1));
        assert!(!t.fits(&bars, 2));
        assert!(t.elapsed(0, bars[0].timestamp, 2, &bars[2]));
    }

    #[test]
    fn timeout_serializes_snake_case() {
        let json = serde_json::to_string(&PositionTimeout::Bars(10)).unwrap();
        assert_eq!(json, r#"{"bars":10}"#);
    }
}
