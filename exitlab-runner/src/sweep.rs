//! Parameter sweep over sizing and exit settings.
//!
//! The trailing rule is baked into each signal when the table is read, so a
//! sweep keeps the raw CSV text and re-reads it per configuration.

use rayon::prelude::*;
use std::collections::HashMap;

use crate::config::{BacktestConfig, TrailingMode};
use crate::data_loader::{read_table, LoadOptions};
use crate::fitness::FitnessMetric;
use crate::runner::{run_backtest, BacktestResult, RunError};

/// Parameter grid specification.
///
/// An empty axis keeps the base config's value for that parameter.
#[derive(Debug, Clone, Default)]
pub struct ParamGrid {
    pub risk_per_trade: Vec<f64>,
    pub max_concurrent_positions: Vec<usize>,
    pub trailing_modes: Vec<TrailingMode>,
}

impl ParamGrid {
    /// Upper bound on the number of configurations, before invalid
    /// combinations are dropped.
    pub fn size(&self) -> usize {
        self.risk_per_trade.len().max(1)
            * self.max_concurrent_positions.len().max(1)
            * self.trailing_modes.len().max(1)
    }

    /// Generates all valid configurations in the grid, in axis order.
    pub fn generate_configs(&self, base_config: &BacktestConfig) -> Vec<BacktestConfig> {
        let risks = axis(&self.risk_per_trade, base_config.simulation.risk_per_trade);
        let caps = axis(
            &self.max_concurrent_positions,
            base_config.simulation.max_concurrent_positions,
        );
        let modes = axis(&self.trailing_modes, base_config.exits.trailing_mode);

        let mut configs = Vec::with_capacity(self.size());
        for &risk in &risks {
            for &cap in &caps {
                for &mode in &modes {
                    let mut config = base_config.clone();
                    config.simulation.risk_per_trade = risk;
                    config.simulation.max_concurrent_positions = cap;
                    config.exits.trailing_mode = mode;

                    match config.validate() {
                        Ok(()) => configs.push(config),
                        Err(e) => tracing::warn!(
                            risk,
                            max_positions = cap,
                            trailing = mode.name(),
                            error = %e,
                            "skipping invalid sweep point"
                        ),
                    }
                }
            }
        }
        configs
    }
}

fn axis<T: Copy>(values: &[T], base: T) -> Vec<T> {
    if values.is_empty() {
        vec![base]
    } else {
        values.to_vec()
    }
}

/// Parameter sweep executor.
///
/// Runs one backtest per grid point against the same input table,
/// optionally in parallel.
pub struct ParamSweep {
    input: String,
    parallel: bool,
}

impl ParamSweep {
    /// Creates a sweep over the given CSV signal table.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            parallel: true,
        }
    }

    /// Enables or disables parallel execution.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    fn run_one(&self, config: &BacktestConfig) -> Result<BacktestResult, RunError> {
        let table = read_table(self.input.as_bytes(), &LoadOptions::from_config(config))?;
        run_backtest(config, &table)
    }

    /// Executes a parameter sweep over the given grid.
    ///
    /// Results come back in grid order regardless of parallelism. The first
    /// failing run aborts the sweep.
    pub fn sweep(
        &self,
        grid: &ParamGrid,
        base_config: &BacktestConfig,
    ) -> Result<SweepResults, RunError> {
        let configs = grid.generate_configs(base_config);
        tracing::info!(
            points = configs.len(),
            parallel = self.parallel,
            "starting sweep"
        );

        let results: Vec<BacktestResult> = if self.parallel {
            configs
                .par_iter()
                .map(|config| self.run_one(config))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            configs
                .iter()
                .map(|config| self.run_one(config))
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(SweepResults::new(results))
    }
}

/// Results from a parameter sweep.
#[derive(Debug)]
pub struct SweepResults {
    results: Vec<BacktestResult>,
    by_run_id: HashMap<String, usize>,
}

impl SweepResults {
    fn new(results: Vec<BacktestResult>) -> Self {
        let by_run_id = results
            .iter()
            .enumerate()
            .map(|(i, r)| (r.run_id.clone(), i))
            .collect();

        Self {
            results,
            by_run_id,
        }
    }

    /// Returns all results in grid order.
    pub fn all(&self) -> &[BacktestResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Gets a result by run id.
    pub fn get(&self, run_id: &str) -> Option<&BacktestResult> {
        self.by_run_id.get(run_id).map(|&i| &self.results[i])
    }

    /// Returns results sorted by the metric, best first. Ties keep grid order.
    pub fn sorted_by(&self, metric: FitnessMetric) -> Vec<&BacktestResult> {
        let mut sorted: Vec<_> = self.results.iter().collect();
        sorted.sort_by(|a, b| {
            metric
                .extract(&b.summary)
                .partial_cmp(&metric.extract(&a.summary))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        sorted
    }

    /// Returns the top N results by the metric.
    pub fn top_n(&self, metric: FitnessMetric, n: usize) -> Vec<&BacktestResult> {
        self.sorted_by(metric).into_iter().take(n).collect()
    }

    /// Returns the best result by the metric.
    pub fn best_by(&self, metric: FitnessMetric) -> Option<&BacktestResult> {
        self.sorted_by(metric).into_iter().next()
    }
}
