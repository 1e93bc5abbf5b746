//! Summary statistics: pure functions over a trade list and equity curve.
//!
//! Every metric is a pure function: equity curve and/or trade list in, scalar out.
//! Degenerate inputs produce sentinel values, never errors: zero trades give
//! zeros, zero losses give an infinite profit factor, flat equity gives a
//! Sharpe of zero.

use serde::{Deserialize, Serialize};

use exitlab_core::domain::ClosedTrade;

/// Aggregate statistics for one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub trade_count: usize,
    pub win_rate: f64,
    /// `f64::INFINITY` when there are winners and no losers. JSON has no
    /// infinity, so it is written as `null` and read back as infinity.
    #[serde(with = "infinite_as_null")]
    pub profit_factor: f64,
    pub sharpe: f64,
    /// Negative fraction, e.g. -0.15 for a 15% drawdown.
    pub max_drawdown: f64,
    pub total_return: f64,
    /// Net of commission.
    pub total_pnl: f64,
    pub total_commission: f64,
    pub avg_trade_pnl: f64,
    pub avg_bars_held: f64,
    /// Partial closes across all trades (one per ledger entry).
    pub partial_close_count: usize,
}

impl SummaryStats {
    /// Compute all statistics from a trade list and equity curve.
    pub fn compute(trades: &[ClosedTrade], equity_curve: &[f64], periods_per_year: f64) -> Self {
        let total_pnl: f64 = trades.iter().map(|t| t.net_pnl()).sum();
        Self {
            trade_count: trades.len(),
            win_rate: win_rate(trades),
            profit_factor: profit_factor(trades),
            sharpe: sharpe_ratio(equity_curve, periods_per_year),
            max_drawdown: max_drawdown(equity_curve),
            total_return: total_return(equity_curve),
            total_pnl,
            total_commission: trades.iter().map(|t| t.commission).sum(),
            avg_trade_pnl: if trades.is_empty() {
                0.0
            } else {
                total_pnl / trades.len() as f64
            },
            avg_bars_held: mean_f64(
                &trades
                    .iter()
                    .map(|t| t.bars_held as f64)
                    .collect::<Vec<_>>(),
            ),
            partial_close_count: trades.iter().map(|t| t.partial_close_count()).sum(),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - initial) / initial.
pub fn total_return(equity_curve: &[f64]) -> f64 {
    match (equity_curve.first(), equity_curve.last()) {
        (Some(&initial), Some(&last)) if equity_curve.len() >= 2 && initial > 0.0 => {
            (last - initial) / initial
        }
        _ => 0.0,
    }
}

/// Annualized Sharpe ratio from bar-over-bar returns.
///
/// Sharpe = mean(returns) / std(returns) * sqrt(periods_per_year).
/// Returns 0.0 if variance is zero or fewer than 2 returns.
pub fn sharpe_ratio(equity_curve: &[f64], periods_per_year: f64) -> f64 {
    let returns = period_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(&returns);
    if std < 1e-15 {
        return 0.0;
    }
    (mean_f64(&returns) / std) * periods_per_year.sqrt()
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
///
/// Returns 0.0 if equity is constant or monotonically increasing.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    for &eq in equity_curve {
        peak = peak.max(eq);
        if peak > 0.0 {
            max_dd = max_dd.min((eq - peak) / peak);
        }
    }
    max_dd
}

/// Win rate: fraction of trades with positive net PnL.
pub fn win_rate(trades: &[ClosedTrade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    winners as f64 / trades.len() as f64
}

/// Profit factor: gross net profits / gross net losses.
///
/// Infinite with winners and no losers; zero with no trades or no winners.
pub fn profit_factor(trades: &[ClosedTrade]) -> f64 {
    let gross_profit: f64 = trades
        .iter()
        .map(|t| t.net_pnl())
        .filter(|p| *p > 0.0)
        .sum();
    let gross_loss: f64 = trades
        .iter()
        .map(|t| t.net_pnl())
        .filter(|p| *p < 0.0)
        .map(f64::abs)
        .sum();

    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 { f64::INFINITY } else { 0.0 };
    }
    gross_profit / gross_loss
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Bar-over-bar fractional change of an equity curve.
pub fn period_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

mod infinite_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            s.serialize_some(value)
        } else {
            s.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::INFINITY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use exitlab_core::domain::{Direction, ExitReason, PartialClose, Signal, TakeProfitLevel};

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn trade(pnl: f64, commission: f64, bars: usize, partials: usize) -> ClosedTrade {
        let signal = Signal::new(
            ts(),
            Direction::Long,
            100.0,
            95.0,
            vec![TakeProfitLevel::new(110.0, 1.0)],
        );
        let portion = PartialClose {
            timestamp: ts(),
            bar_index: bars,
            price: 100.0,
            fraction_closed: 1.0 / partials as f64,
            pnl: pnl / partials as f64,
            reason: ExitReason::StopLoss,
        };
        ClosedTrade {
            signal,
            entry_time: ts(),
            entry_bar: 0,
            entry_price: 100.0,
            exit_time: ts(),
            exit_bar: bars,
            exit_price: 100.0,
            exit_reason: ExitReason::StopLoss,
            notional: 10_000.0,
            quantity: 100.0,
            closed_portions: vec![portion; partials],
            realized_pnl: pnl,
            commission,
            pnl_pct: pnl / 10_000.0,
            bars_held: bars,
            duration_secs: 0,
            mae: 0.0,
            mfe: 0.0,
        }
    }

    #[test]
    fn empty_run_is_all_zero() {
        let s = SummaryStats::compute(&[], &[100.0], 252.0);
        assert_eq!(s.trade_count, 0);
        assert_eq!(s.win_rate, 0.0);
        assert_eq!(s.profit_factor, 0.0);
        assert_eq!(s.sharpe, 0.0);
        assert_eq!(s.max_drawdown, 0.0);
        assert_eq!(s.avg_trade_pnl, 0.0);
    }

    #[test]
    fn no_losers_gives_infinite_profit_factor() {
        let trades = vec![trade(100.0, 0.0, 3, 1), trade(50.0, 0.0, 5, 2)];
        assert_eq!(profit_factor(&trades), f64::INFINITY);
        let s = SummaryStats::compute(&trades, &[1000.0, 1100.0, 1150.0], 252.0);
        assert_eq!(s.win_rate, 1.0);
        assert_eq!(s.partial_close_count, 3);
        assert_eq!(s.avg_bars_held, 4.0);
    }

    #[test]
    fn commission_turns_scratch_into_loss() {
        let trades = vec![trade(200.0, 0.0, 1, 1), trade(0.0, 10.0, 1, 1)];
        assert_eq!(win_rate(&trades), 0.5);
        assert_eq!(profit_factor(&trades), 20.0);
        let s = SummaryStats::compute(&trades, &[1000.0, 1190.0], 252.0);
        assert_eq!(s.total_pnl, 190.0);
        assert_eq!(s.total_commission, 10.0);
    }

    #[test]
    fn drawdown_from_running_peak() {
        let dd = max_drawdown(&[100.0, 120.0, 90.0, 130.0, 117.0]);
        assert!((dd + 0.25).abs() < 1e-12);
        assert_eq!(max_drawdown(&[100.0, 101.0, 102.0]), 0.0);
    }

    #[test]
    fn sharpe_zero_for_flat_equity() {
        assert_eq!(sharpe_ratio(&[100.0; 10], 252.0), 0.0);
    }

    #[test]
    fn sharpe_positive_for_rising_noisy_equity() {
        let eq = [100.0, 101.0, 101.5, 103.0, 102.8, 104.0];
        assert!(sharpe_ratio(&eq, 252.0) > 0.0);
        // Annualization scales with sqrt(periods).
        let daily = sharpe_ratio(&eq, 1.0);
        assert!((sharpe_ratio(&eq, 4.0) - 2.0 * daily).abs() < 1e-12);
    }

    #[test]
    fn infinite_profit_factor_survives_json() {
        let trades = vec![trade(100.0, 0.0, 3, 1)];
        let s = SummaryStats::compute(&trades, &[1000.0, 1100.0], 252.0);
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"profit_factor\":null"));
        let back: SummaryStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back.profit_factor, f64::INFINITY);
    }
}
