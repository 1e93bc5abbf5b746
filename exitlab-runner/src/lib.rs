//! ExitLab Runner: backtest orchestration on top of `exitlab-core`.
//!
//! - TOML configuration with validation
//! - CSV signal table loading
//! - Single-run backtests with summary statistics and a run fingerprint
//! - JSON/CSV/Markdown artifacts
//! - Parallel parameter sweeps

pub mod config;
pub mod data_loader;
pub mod export;
pub mod fitness;
pub mod metrics;
pub mod runner;
pub mod sweep;

pub use config::{BacktestConfig, ConfigError, TrailingMode};
pub use data_loader::{load_csv, read_table, LoadError, LoadOptions, SignalTable};
pub use export::{generate_report, load_artifacts, save_artifacts};
pub use fitness::FitnessMetric;
pub use metrics::SummaryStats;
pub use runner::{run_backtest, run_backtest_from_files, BacktestResult, RunError};
pub use sweep::{ParamGrid, ParamSweep, SweepResults};
