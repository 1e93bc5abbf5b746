//! TOML backtest configuration.
//!
//! ```toml
//! [simulation]
//! initial_capital = 100000.0
//! risk_per_trade = 0.01
//! max_concurrent_positions = 3
//! commission_rate = 0.0005
//! slippage_rate = 0.0002
//! position_timeout = { bars = 20 }
//!
//! [exits]
//! trailing_mode = "percent"
//! trailing_pct = 0.05
//!
//! [signals]
//! tp_close_fractions = [0.5, 0.5]
//! breakeven_on_level = 1
//!
//! [profiles.momentum]
//! stop_scale = 0.5
//! ```
//!
//! Every section and field is optional; missing values fall back to the
//! `Default` impls below.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use exitlab_core::domain::{LevelAction, TrailingStopConfig, FRACTION_EPSILON};
use exitlab_core::engine::{PositionTimeout, SimulationConfig};
use exitlab_core::exit_policy::ExitProfile;

/// Errors from loading or validating a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

/// Complete backtest configuration as read from disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub simulation: SimulationSection,
    pub exits: ExitsSection,
    pub signals: SignalsSection,
    /// Exit overrides keyed by signal tag.
    pub profiles: BTreeMap<String, ExitProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    pub initial_capital: f64,
    pub risk_per_trade: f64,
    pub max_concurrent_positions: usize,
    pub commission_rate: f64,
    pub slippage_rate: f64,
    pub position_timeout: Option<PositionTimeout>,
    pub max_leverage: f64,
    pub gap_fills: bool,
    /// Bars per year, for annualizing Sharpe.
    pub periods_per_year: f64,
}

impl Default for SimulationSection {
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
            periods_per_year: 252.0,
        }
    }
}

/// Trailing rule family selected in `[exits]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingMode {
    #[default]
    None,
    Fixed,
    Percent,
    BreakevenThenTrail,
}

impl TrailingMode {
    pub fn name(self) -> &'static str {
        match self {
            TrailingMode::None => "none",
            TrailingMode::Fixed => "fixed",
            TrailingMode::Percent => "percent",
            TrailingMode::BreakevenThenTrail => "breakeven_then_trail",
        }
    }
}

impl std::str::FromStr for TrailingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(TrailingMode::None),
            "fixed" => Ok(TrailingMode::Fixed),
            "percent" => Ok(TrailingMode::Percent),
            "breakeven_then_trail" | "breakeven" => Ok(TrailingMode::BreakevenThenTrail),
            other => Err(format!("unknown trailing mode '{other}'")),
        }
    }
}

/// Default trailing rule applied to every signal without its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitsSection {
    pub trailing_mode: TrailingMode,
    /// Price distance for `fixed` and the trail leg of `breakeven_then_trail`.
    pub trailing_distance: f64,
    /// Fraction of the favourable extreme for `percent`.
    pub trailing_pct: f64,
    /// Favourable move that parks the stop at entry (`breakeven_then_trail`).
    pub breakeven_trigger: f64,
}

impl Default for ExitsSection {
    fn default() -> Self {
        Self {
            trailing_mode: TrailingMode::None,
            trailing_distance: 1.0,
            trailing_pct: 0.02,
            breakeven_trigger: 1.0,
        }
    }
}

impl ExitsSection {
    pub fn trailing(&self) -> TrailingStopConfig {
        match self.trailing_mode {
            TrailingMode::None => TrailingStopConfig::None,
            TrailingMode::Fixed => TrailingStopConfig::Fixed {
                distance: self.trailing_distance,
            },
            TrailingMode::Percent => TrailingStopConfig::Percent {
                pct: self.trailing_pct,
            },
            TrailingMode::BreakevenThenTrail => TrailingStopConfig::BreakevenThenTrail {
                trigger_distance: self.breakeven_trigger,
                trail_distance: self.trailing_distance,
            },
        }
    }
}

/// How take-profit columns in the input table become levels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalsSection {
    /// Close fraction per level, nearest first. Empty means an equal split
    /// over however many levels a row carries.
    pub tp_close_fractions: Vec<f64>,
    /// 1-based level whose fill moves the stop to entry.
    pub breakeven_on_level: Option<usize>,
    /// 1-based level whose fill arms the trailing rule.
    pub trail_on_level: Option<usize>,
}

impl SignalsSection {
    /// Close fractions for a row with `levels` take-profit prices.
    pub fn fractions_for(&self, levels: usize) -> Option<Vec<f64>> {
        if levels == 0 {
            return Some(Vec::new());
        }
        if self.tp_close_fractions.is_empty() {
            return Some(vec![1.0 / levels as f64; levels]);
        }
        (self.tp_close_fractions.len() == levels).then(|| self.tp_close_fractions.clone())
    }

    /// Action attached to the `level`-th (1-based) take-profit.
    pub fn action_for(&self, level: usize) -> LevelAction {
        if self.breakeven_on_level == Some(level) {
            LevelAction::MoveStopToBreakeven
        } else if self.trail_on_level == Some(level) {
            LevelAction::ActivateTrailing
        } else {
            LevelAction::None
        }
    }
}

impl BacktestConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        if !(sim.initial_capital.is_finite() && sim.initial_capital > 0.0) {
            return Err(invalid("simulation.initial_capital", "must be > 0"));
        }
        if !(sim.risk_per_trade > 0.0 && sim.risk_per_trade <= 1.0) {
            return Err(invalid("simulation.risk_per_trade", "must be in (0, 1]"));
        }
        if sim.max_concurrent_positions == 0 {
            return Err(invalid("simulation.max_concurrent_positions", "must be >= 1"));
        }
        if !(sim.commission_rate >= 0.0) {
            return Err(invalid("simulation.commission_rate", "must be >= 0"));
        }
        if !(sim.slippage_rate >= 0.0 && sim.slippage_rate < 1.0) {
            return Err(invalid("simulation.slippage_rate", "must be in [0, 1)"));
        }
        if !(sim.max_leverage.is_finite() && sim.max_leverage > 0.0) {
            return Err(invalid("simulation.max_leverage", "must be > 0"));
        }
        if !(sim.periods_per_year > 0.0) {
            return Err(invalid("simulation.periods_per_year", "must be > 0"));
        }
        match sim.position_timeout {
            Some(PositionTimeout::Bars(0)) => {
                return Err(invalid("simulation.position_timeout", "must be at least one bar"))
            }
            Some(PositionTimeout::Seconds(s)) if s <= 0 => {
                return Err(invalid("simulation.position_timeout", "must be positive"))
            }
            _ => {}
        }

        self.exits
            .trailing()
            .validate()
            .map_err(|e| invalid("exits", e.to_string()))?;

        let fractions = &self.signals.tp_close_fractions;
        if !fractions.is_empty() {
            if let Some(f) = fractions.iter().find(|f| !(**f > 0.0 && **f <= 1.0)) {
                return Err(invalid(
                    "signals.tp_close_fractions",
                    format!("fraction {f} outside (0, 1]"),
                ));
            }
            let sum: f64 = fractions.iter().sum();
            if (sum - 1.0).abs() > FRACTION_EPSILON {
                return Err(invalid(
                    "signals.tp_close_fractions",
                    format!("fractions sum to {sum}, expected 1.0"),
                ));
            }
        }
        for (field, level) in [
            ("signals.breakeven_on_level", self.signals.breakeven_on_level),
            ("signals.trail_on_level", self.signals.trail_on_level),
        ] {
            if level == Some(0) {
                return Err(invalid(field, "levels are numbered from 1"));
            }
        }
        if self.signals.breakeven_on_level.is_some()
            && self.signals.breakeven_on_level == self.signals.trail_on_level
        {
            return Err(invalid(
                "signals.trail_on_level",
                "cannot share a level with breakeven_on_level",
            ));
        }

        for (tag, profile) in &self.profiles {
            profile
                .validate()
                .map_err(|e| invalid(format!("profiles.{tag}"), e.to_string()))?;
        }
        Ok(())
    }

    /// Engine-level configuration for this backtest.
    pub fn to_simulation_config(&self) -> SimulationConfig {
        let sim = &self.simulation;
        SimulationConfig {
            initial_capital: sim.initial_capital,
            risk_per_trade: sim.risk_per_trade,
            max_concurrent_positions: sim.max_concurrent_positions,
            commission_rate: sim.commission_rate,
            slippage_rate: sim.slippage_rate,
            position_timeout: sim.position_timeout,
            max_leverage: sim.max_leverage,
            gap_fills: sim.gap_fills,
            profiles: self.profiles.clone(),
        }
    }
}
