//! Close events and the terminal trade record.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::signal::{Direction, Signal};

/// Why (part of) a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitReason {
    /// Take-profit level, 1-based.
    TakeProfit { level: usize },
    /// The original stop-loss.
    StopLoss,
    /// A stop placed by the trailing rule.
    TrailingStop,
    /// A stop parked at the entry price.
    BreakevenStop,
    /// Maximum holding period elapsed.
    Timeout,
    /// The series ran out while the position was open.
    EndOfData,
}

impl ExitReason {
    pub fn is_stop(&self) -> bool {
        matches!(
            self,
            ExitReason::StopLoss | ExitReason::TrailingStop | ExitReason::BreakevenStop
        )
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::TakeProfit { level } => write!(f, "TP{level}"),
            ExitReason::StopLoss => f.write_str("SL"),
            ExitReason::TrailingStop => f.write_str("TrailingSL"),
            ExitReason::BreakevenStop => f.write_str("BreakevenSL"),
            ExitReason::Timeout => f.write_str("Timeout"),
            ExitReason::EndOfData => f.write_str("EndOfData"),
        }
    }
}

/// One slice of a position being closed. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialClose {
    pub timestamp: NaiveDateTime,
    pub bar_index: usize,
    pub price: f64,
    /// Fraction of the original position closed by this event.
    pub fraction_closed: f64,
    pub pnl: f64,
    pub reason: ExitReason,
}

/// A finished trade. Produced exactly once per position, never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub signal: Signal,

    // ── Entry ──
    pub entry_time: NaiveDateTime,
    pub entry_bar: usize,
    /// Fill price after slippage.
    pub entry_price: f64,

    // ── Exit ──
    pub exit_time: NaiveDateTime,
    pub exit_bar: usize,
    /// Fraction-weighted average of all close prices.
    pub exit_price: f64,
    pub exit_reason: ExitReason,

    // ── Size ──
    pub notional: f64,
    pub quantity: f64,

    // ── PnL ──
    pub closed_portions: Vec<PartialClose>,
    /// Gross of commission.
    pub realized_pnl: f64,
    pub commission: f64,
    /// `realized_pnl / notional`, as a fraction.
    pub pnl_pct: f64,

    // ── Duration ──
    pub bars_held: usize,
    pub duration_secs: i64,

    // ── Excursion (fractions of entry price) ──
    pub mae: f64,
    pub mfe: f64,
}

impl ClosedTrade {
    pub fn direction(&self) -> Direction {
        self.signal.direction
    }

    pub fn net_pnl(&self) -> f64 {
        self.realized_pnl - self.commission
    }

    pub fn is_winner(&self) -> bool {
        self.net_pnl() > 0.0
    }

    pub fn partial_close_count(&self) -> usize {
        self.closed_portions.len()
    }

    pub fn closed_fraction(&self) -> f64 {
        self.closed_portions.iter().map(|c| c.fraction_closed).sum()
    }
}
