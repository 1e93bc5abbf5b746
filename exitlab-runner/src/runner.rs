//! Backtest runner: wires together config, signal table, simulator, and
//! summary statistics.
//!
//! Two entry points:
//! - `run_backtest_from_files()`: loads the config and CSV from disk, then runs. Used by CLI.
//! - `run_backtest()`: takes a parsed config and a loaded table, no I/O. Used by sweeps.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use exitlab_core::domain::ClosedTrade;
use exitlab_core::engine::{simulate, Rejection};
use exitlab_core::SimulationError;

use crate::config::{BacktestConfig, ConfigError};
use crate::data_loader::{load_csv, LoadError, LoadOptions, SignalTable};
use crate::metrics::SummaryStats;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("simulation failed: {0}")]
    Simulation(#[from] SimulationError),
    #[error("failed to fingerprint run inputs: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

impl RunError {
    /// True when the run aborted on a broken invariant rather than bad
    /// configuration or unreadable input.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, RunError::Simulation(e) if e.violation().is_some())
    }
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Complete result of a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// BLAKE3 over the config and the input table.
    pub run_id: String,
    pub summary: SummaryStats,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<f64>,
    pub rejections: Vec<Rejection>,
    pub config: BacktestConfig,
    pub final_capital: f64,
    pub max_open_positions: usize,
    pub bar_count: usize,
    pub signal_count: usize,
}

/// Default schema version for serde deserialization of older JSON without the field.
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Deterministic fingerprint of a run's inputs.
///
/// Identical config and table give an identical id; any change to either
/// gives a different one.
pub fn run_id(config: &BacktestConfig, table: &SignalTable) -> Result<String, RunError> {
    let mut hasher = blake3::Hasher::new();
    serde_json::to_writer(&mut hasher, config)?;
    serde_json::to_writer(&mut hasher, table)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Run a backtest on an already-loaded table. No I/O.
pub fn run_backtest(
    config: &BacktestConfig,
    table: &SignalTable,
) -> Result<BacktestResult, RunError> {
    config.validate()?;
    let run_id = run_id(config, table)?;

    let sim = simulate(&table.bars, &table.signals, &config.to_simulation_config())?;
    let summary = SummaryStats::compute(
        &sim.trades,
        &sim.equity_curve,
        config.simulation.periods_per_year,
    );

    let short_id = run_id.get(..12).unwrap_or(&run_id);
    tracing::info!(
        run_id = short_id,
        trades = summary.trade_count,
        rejected = sim.rejections.len(),
        total_return = summary.total_return,
        sharpe = summary.sharpe,
        "backtest complete"
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        run_id,
        summary,
        trades: sim.trades,
        equity_curve: sim.equity_curve,
        rejections: sim.rejections,
        config: config.clone(),
        final_capital: sim.final_capital,
        max_open_positions: sim.max_open_positions,
        bar_count: sim.bar_count,
        signal_count: table.signals.len(),
    })
}

/// Load config and signal table from disk, then run.
pub fn run_backtest_from_files(
    config_path: &Path,
    input_path: &Path,
) -> Result<BacktestResult, RunError> {
    let config = BacktestConfig::from_file(config_path)?;
    let table = load_csv(input_path, &LoadOptions::from_config(&config))?;
    run_backtest(&config, &table)
}
