//! ExitLab CLI: run backtests and parameter sweeps over a signal table.
//!
//! Commands:
//! - `run`: execute one backtest from a TOML config and a CSV signal table
//! - `sweep`: grid over risk, concurrency, and trailing mode
//! - `report`: print the Markdown report of a saved artifact directory
//!
//! Exit status is 1 for bad input and 2 when a run aborts on a broken
//! invariant.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exitlab_runner::{
    generate_report, load_artifacts, run_backtest_from_files, save_artifacts, BacktestConfig,
    FitnessMetric, ParamGrid, ParamSweep, RunError, TrailingMode,
};

#[derive(Parser)]
#[command(
    name = "exitlab",
    about = "ExitLab CLI: multi-level exit backtesting engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a backtest from a TOML config and a CSV signal table.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// CSV file with bars and signals.
        #[arg(long)]
        input: PathBuf,

        /// Output directory for artifacts.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Print the Markdown report instead of the one-line summary.
        #[arg(long, default_value_t = false)]
        report: bool,
    },
    /// Sweep sizing and exit parameters over one signal table.
    Sweep {
        /// Path to the base TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// CSV file with bars and signals.
        #[arg(long)]
        input: PathBuf,

        /// Risk fractions to try (e.g. --risk 0.005 --risk 0.01).
        #[arg(long = "risk")]
        risk_per_trade: Vec<f64>,

        /// Concurrency caps to try.
        #[arg(long = "max-positions")]
        max_positions: Vec<usize>,

        /// Trailing modes to try: none, fixed, percent, breakeven_then_trail.
        #[arg(long = "trailing")]
        trailing_modes: Vec<TrailingMode>,

        /// Metric to rank by.
        #[arg(long, default_value = "sharpe")]
        metric: FitnessMetric,

        /// How many ranked results to print.
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Run grid points one at a time.
        #[arg(long, default_value_t = false)]
        sequential: bool,

        /// Save artifacts of the best run here.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Print the report of a saved artifact directory.
    Report {
        /// Directory written by `run`.
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Run {
            config,
            input,
            output_dir,
            report,
        } => run_cmd(&config, &input, &output_dir, report),
        Commands::Sweep {
            config,
            input,
            risk_per_trade,
            max_positions,
            trailing_modes,
            metric,
            top,
            sequential,
            output_dir,
        } => sweep_cmd(
            &config,
            &input,
            ParamGrid {
                risk_per_trade,
                max_concurrent_positions: max_positions,
                trailing_modes,
            },
            metric,
            top,
            sequential,
            output_dir.as_deref(),
        ),
        Commands::Report { dir } => report_cmd(&dir),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let invariant = err
                .downcast_ref::<RunError>()
                .is_some_and(RunError::is_invariant_violation);
            if invariant {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run_cmd(config: &Path, input: &Path, output_dir: &Path, report: bool) -> Result<()> {
    let result = run_backtest_from_files(config, input)
        .with_context(|| format!("backtest of {} failed", input.display()))?;

    if report {
        print!("{}", generate_report(&result));
    } else {
        let s = &result.summary;
        println!(
            "trades={} rejected={} return={:.2}% sharpe={:.3} max_dd={:.2}% win_rate={:.1}% final_capital={:.2}",
            s.trade_count,
            result.rejections.len(),
            s.total_return * 100.0,
            s.sharpe,
            s.max_drawdown * 100.0,
            s.win_rate * 100.0,
            result.final_capital,
        );
    }

    let run_dir = save_artifacts(&result, output_dir)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn sweep_cmd(
    config: &Path,
    input: &Path,
    grid: ParamGrid,
    metric: FitnessMetric,
    top: usize,
    sequential: bool,
    output_dir: Option<&Path>,
) -> Result<()> {
    let base = BacktestConfig::from_file(config)?;
    let table = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;

    let results = ParamSweep::new(table)
        .with_parallelism(!sequential)
        .sweep(&grid, &base)?;
    tracing::info!(points = results.len(), metric = %metric, "sweep finished");

    println!(
        "{:>4}  {:>8}  {:>4}  {:<22}  {:>12}  {:>6}",
        "rank", "risk", "max", "trailing", metric.name(), "trades"
    );
    for (rank, r) in results.top_n(metric, top).into_iter().enumerate() {
        let sim = &r.config.simulation;
        println!(
            "{:>4}  {:>8.4}  {:>4}  {:<22}  {:>12.4}  {:>6}",
            rank + 1,
            sim.risk_per_trade,
            sim.max_concurrent_positions,
            r.config.exits.trailing_mode.name(),
            metric.extract(&r.summary),
            r.summary.trade_count,
        );
    }

    if let (Some(dir), Some(best)) = (output_dir, results.best_by(metric)) {
        let run_dir = save_artifacts(best, dir)?;
        println!("Best run saved to: {}", run_dir.display());
    }
    Ok(())
}

fn report_cmd(dir: &Path) -> Result<()> {
    let result = load_artifacts(dir)?;
    print!("{}", generate_report(&result));
    Ok(())
}
