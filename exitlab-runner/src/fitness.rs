//! Fitness function: which summary statistic ranks sweep results.

use serde::{Deserialize, Serialize};

use crate::metrics::SummaryStats;

/// Which metric to sort by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitnessMetric {
    #[default]
    Sharpe,
    TotalReturn,
    WinRate,
    ProfitFactor,
    MaxDrawdown,
}

impl FitnessMetric {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sharpe => "sharpe",
            Self::TotalReturn => "total_return",
            Self::WinRate => "win_rate",
            Self::ProfitFactor => "profit_factor",
            Self::MaxDrawdown => "max_drawdown",
        }
    }

    /// Extract the relevant value from a summary.
    ///
    /// Higher is better for every metric. Drawdown is stored negative, so a
    /// shallower drawdown already compares greater.
    pub fn extract(self, stats: &SummaryStats) -> f64 {
        match self {
            Self::Sharpe => stats.sharpe,
            Self::TotalReturn => stats.total_return,
            Self::WinRate => stats.win_rate,
            Self::ProfitFactor => stats.profit_factor,
            Self::MaxDrawdown => stats.max_drawdown,
        }
    }
}

impl std::str::FromStr for FitnessMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "sharpe" => Ok(Self::Sharpe),
            "total_return" | "return" => Ok(Self::TotalReturn),
            "win_rate" => Ok(Self::WinRate),
            "profit_factor" => Ok(Self::ProfitFactor),
            "max_drawdown" | "drawdown" => Ok(Self::MaxDrawdown),
            other => Err(format!(
                "unknown metric '{other}' (expected sharpe, total_return, win_rate, profit_factor, max_drawdown)"
            )),
        }
    }
}

impl std::fmt::Display for FitnessMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
