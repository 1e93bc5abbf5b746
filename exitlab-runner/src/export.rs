//! Reporting and export: JSON, CSV, and Markdown artifact generation.
//!
//! - **JSON**: full round-trip serialization with schema versioning
//! - **CSV**: trade log, equity curve, and rejected signals
//! - **Markdown**: a human-readable single-run report
//!
//! Persisted artifacts carry a `schema_version`. Versions newer than this
//! build understands are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use exitlab_core::domain::{ClosedTrade, Direction, ExitReason};
use exitlab_core::engine::Rejection;

use crate::runner::{BacktestResult, SCHEMA_VERSION};

const RESULT_FILE: &str = "result.json";
const TRADES_FILE: &str = "trades.csv";
const EQUITY_FILE: &str = "equity.csv";
const REJECTIONS_FILE: &str = "rejections.csv";

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `BacktestResult` to pretty JSON.
pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult` from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Export the trade log, one row per finished trade.
///
/// Columns: entry_time, exit_time, direction, entry_price, exit_price,
/// exit_type, pnl, pnl_pct, duration, bars_held, partial_close_count,
/// commission, net_pnl. `duration` is in seconds; `exit_type` names the
/// reason that closed the final slice.
pub fn export_trades_csv(trades: &[ClosedTrade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "entry_time",
        "exit_time",
        "direction",
        "entry_price",
        "exit_price",
        "exit_type",
        "pnl",
        "pnl_pct",
        "duration",
        "bars_held",
        "partial_close_count",
        "commission",
        "net_pnl",
    ])?;

    for t in trades {
        wtr.write_record([
            &t.entry_time.to_string(),
            &t.exit_time.to_string(),
            direction_label(t.direction()),
            &format!("{:.6}", t.entry_price),
            &format!("{:.6}", t.exit_price),
            &t.exit_reason.to_string(),
            &format!("{:.2}", t.realized_pnl),
            &format!("{:.6}", t.pnl_pct),
            &t.duration_secs.to_string(),
            &t.bars_held.to_string(),
            &t.partial_close_count().to_string(),
            &format!("{:.2}", t.commission),
            &format!("{:.2}", t.net_pnl()),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export an equity curve as CSV with bar_index and equity columns.
///
/// Index 0 is the starting capital, index `i` is the value after bar `i - 1`.
pub fn export_equity_csv(equity_curve: &[f64]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["bar_index", "equity"])?;
    for (i, eq) in equity_curve.iter().enumerate() {
        wtr.write_record([&i.to_string(), &format!("{:.2}", eq)])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export rejected signals with their reasons.
pub fn export_rejections_csv(rejections: &[Rejection]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "reason"])?;
    for r in rejections {
        wtr.write_record([&r.timestamp.to_string(), &r.reason.to_string()])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Long => "long",
        Direction::Short => "short",
    }
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set for a single backtest run.
///
/// Writes into `output_dir/{run_id prefix}/`:
/// - `result.json`: the full `BacktestResult`
/// - `trades.csv`: trade log
/// - `equity.csv`: equity curve
/// - `rejections.csv`: signals that never became positions
///
/// The directory name comes from the run id, so re-running identical inputs
/// overwrites the same bundle. Returns the path to the directory.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let dirname: String = result.run_id.chars().take(16).collect();
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    write_file(&run_dir.join(RESULT_FILE), &export_json(result)?)?;
    write_file(&run_dir.join(TRADES_FILE), &export_trades_csv(&result.trades)?)?;
    write_file(
        &run_dir.join(EQUITY_FILE),
        &export_equity_csv(&result.equity_curve)?,
    )?;
    write_file(
        &run_dir.join(REJECTIONS_FILE),
        &export_rejections_csv(&result.rejections)?,
    )?;

    tracing::debug!(dir = %run_dir.display(), "artifacts written");
    Ok(run_dir)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

/// Load a `BacktestResult` from an artifact directory's result.json.
///
/// Rejects unknown schema versions.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let path = dir.join(RESULT_FILE);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

// ─── Markdown report ────────────────────────────────────────────────

/// Generate a Markdown report for a single backtest run.
pub fn generate_report(result: &BacktestResult) -> String {
    let mut md = String::with_capacity(2048);
    let sim = &result.config.simulation;

    md.push_str("# Backtest Report\n\n");

    md.push_str("## Run\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Run ID | {} |\n", result.run_id));
    md.push_str(&format!("| Bars | {} |\n", result.bar_count));
    md.push_str(&format!(
        "| Signals | {} ({} rejected) |\n",
        result.signal_count,
        result.rejections.len()
    ));
    md.push_str(&format!(
        "| Initial Capital | {:.2} |\n",
        sim.initial_capital
    ));
    md.push_str(&format!("| Final Capital | {:.2} |\n", result.final_capital));
    md.push_str(&format!(
        "| Risk per Trade | {:.2}% |\n",
        sim.risk_per_trade * 100.0
    ));
    md.push_str(&format!(
        "| Max Concurrent | {} (peak {}) |\n",
        sim.max_concurrent_positions, result.max_open_positions
    ));
    md.push_str(&format!(
        "| Trailing | {} |\n",
        result.config.exits.trailing_mode.name()
    ));
    md.push('\n');

    let m = &result.summary;
    md.push_str("## Performance Summary\n\n");
    md.push_str("| Metric | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!(
        "| Total Return | {:.2}% |\n",
        m.total_return * 100.0
    ));
    md.push_str(&format!("| Net PnL | {:.2} |\n", m.total_pnl));
    md.push_str(&format!("| Commission | {:.2} |\n", m.total_commission));
    md.push_str(&format!("| Sharpe | {:.3} |\n", m.sharpe));
    md.push_str(&format!(
        "| Max Drawdown | {:.2}% |\n",
        m.max_drawdown * 100.0
    ));
    md.push_str(&format!("| Win Rate | {:.1}% |\n", m.win_rate * 100.0));
    if m.profit_factor.is_finite() {
        md.push_str(&format!("| Profit Factor | {:.2} |\n", m.profit_factor));
    } else {
        md.push_str("| Profit Factor | ∞ |\n");
    }
    md.push_str(&format!("| Trades | {} |\n", m.trade_count));
    md.push_str(&format!("| Partial Closes | {} |\n", m.partial_close_count));
    md.push_str(&format!("| Avg Bars Held | {:.1} |\n", m.avg_bars_held));
    md.push('\n');

    let exits = exit_breakdown(&result.trades);
    if !exits.is_empty() {
        md.push_str("## Exits\n\n");
        md.push_str("| Exit | Trades |\n");
        md.push_str("| --- | ---: |\n");
        for (reason, count) in exits {
            md.push_str(&format!("| {reason} | {count} |\n"));
        }
        md.push('\n');
    }

    if !result.rejections.is_empty() {
        md.push_str("## Rejected Signals\n\n");
        let mut counts: Vec<(String, usize)> = Vec::new();
        for r in &result.rejections {
            let key = r.reason.to_string();
            match counts.iter_mut().find(|(k, _)| *k == key) {
                Some((_, n)) => *n += 1,
                None => counts.push((key, 1)),
            }
        }
        for (reason, n) in counts {
            md.push_str(&format!("- {reason}: {n}\n"));
        }
        md.push('\n');
    }

    md
}

/// Trades counted by the reason that closed their final slice, in first-seen order.
fn exit_breakdown(trades: &[ClosedTrade]) -> Vec<(ExitReason, usize)> {
    let mut counts: Vec<(ExitReason, usize)> = Vec::new();
    for t in trades {
        match counts.iter_mut().find(|(r, _)| *r == t.exit_reason) {
            Some((_, n)) => *n += 1,
            None => counts.push((t.exit_reason, 1)),
        }
    }
    counts
}
