//! Signal table loading.
//!
//! The input is one CSV row per bar. Price columns describe the bar; the
//! remaining columns carry an optional signal produced upstream:
//!
//! | column              | required | meaning                                  |
//! |---------------------|----------|------------------------------------------|
//! | `timestamp`         | yes      | RFC 3339, `%Y-%m-%d %H:%M:%S` or `%Y-%m-%d` |
//! | `open..close`       | yes      | bar prices                               |
//! | `volume`            | no       | defaults to 0                            |
//! | `signal`            | no       | -1 short, 0 none, 1 long                 |
//! | `entry_price`       | on signal|                                          |
//! | `stop_loss`         | on signal|                                          |
//! | `take_profit`       | on signal| single target, or `tp1..tpN` instead     |
//! | `trailing_stop_pct` | no       | per-row percent trail (0.02 = 2%)        |
//! | `tag`               | no       | selects an exit profile                  |
//!
//! Close fractions and level actions come from the `[signals]` section of
//! the backtest config.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use exitlab_core::domain::{Bar, Direction, Signal, TakeProfitLevel, TrailingStopConfig};

use crate::config::{BacktestConfig, SignalsSection};

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("line {line}: cannot parse {column} value '{value}'")]
    Parse {
        line: u64,
        column: String,
        value: String,
    },

    #[error("line {line}: signal row is missing '{field}'")]
    MissingSignalField { line: u64, field: &'static str },

    #[error("line {line}: {levels} take-profit levels but {fractions} close fractions configured")]
    FractionMismatch {
        line: u64,
        levels: usize,
        fractions: usize,
    },
}

/// How signal rows become [`Signal`]s.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub signals: SignalsSection,
    /// Trailing rule for rows without `trailing_stop_pct`.
    pub default_trailing: TrailingStopConfig,
}

impl LoadOptions {
    pub fn from_config(config: &BacktestConfig) -> Self {
        Self {
            signals: config.signals.clone(),
            default_trailing: config.exits.trailing(),
        }
    }
}

/// Bars plus the signals attached to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalTable {
    pub bars: Vec<Bar>,
    pub signals: Vec<Signal>,
}

/// Load a signal table from a CSV file.
pub fn load_csv(path: &Path, opts: &LoadOptions) -> Result<SignalTable, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_table(file, opts)
}

/// Read a signal table from any CSV source.
pub fn read_table<R: Read>(reader: R, opts: &LoadOptions) -> Result<SignalTable, LoadError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let columns = Columns::locate(rdr.headers()?)?;

    let mut table = SignalTable::default();
    for record in rdr.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let row = Row {
            record: &record,
            line,
        };

        let bar = Bar::new(
            row.timestamp(columns.timestamp)?,
            row.required_f64(columns.open, "open")?,
            row.required_f64(columns.high, "high")?,
            row.required_f64(columns.low, "low")?,
            row.required_f64(columns.close, "close")?,
            row.optional_f64(columns.volume, "volume")?.unwrap_or(0.0),
        );

        let code = match columns.signal {
            Some(i) => row.optional_i64(i, "signal")?.unwrap_or(0),
            None => 0,
        };
        if let Some(direction) = Direction::from_code(code) {
            table
                .signals
                .push(row.signal(&columns, bar.timestamp, direction, opts)?);
        }
        table.bars.push(bar);
    }

    tracing::debug!(
        bars = table.bars.len(),
        signals = table.signals.len(),
        "signal table loaded"
    );
    Ok(table)
}

/// Parse a timestamp in any of the accepted layouts.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

// ── Column layout ────────────────────────────────────────────────────

struct Columns {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
    signal: Option<usize>,
    entry_price: Option<usize>,
    stop_loss: Option<usize>,
    /// `take_profit` alone, or `tp1..tpN` in level order.
    take_profits: Vec<usize>,
    trailing_stop_pct: Option<usize>,
    tag: Option<usize>,
}

impl Columns {
    fn locate(headers: &StringRecord) -> Result<Self, LoadError> {
        let find = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
        let require = |name: &'static str| find(name).ok_or(LoadError::MissingColumn(name));

        let mut take_profits = Vec::new();
        if let Some(i) = find("take_profit") {
            take_profits.push(i);
        } else {
            let mut n = 1;
            while let Some(i) = find(&format!("tp{n}")) {
                take_profits.push(i);
                n += 1;
            }
        }

        Ok(Self {
            timestamp: require("timestamp")?,
            open: require("open")?,
            high: require("high")?,
            low: require("low")?,
            close: require("close")?,
            volume: find("volume"),
            signal: find("signal"),
            entry_price: find("entry_price"),
            stop_loss: find("stop_loss"),
            take_profits,
            trailing_stop_pct: find("trailing_stop_pct"),
            tag: find("tag"),
        })
    }
}

struct Row<'a> {
    record: &'a StringRecord,
    line: u64,
}

impl Row<'_> {
    /// Non-empty cell text.
    fn cell(&self, idx: usize) -> Option<&str> {
        self.record.get(idx).filter(|s| !s.is_empty())
    }

    fn parse_error(&self, column: &str, value: &str) -> LoadError {
        LoadError::Parse {
            line: self.line,
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    fn timestamp(&self, idx: usize) -> Result<NaiveDateTime, LoadError> {
        let raw = self.cell(idx).unwrap_or_default();
        parse_timestamp(raw).ok_or_else(|| self.parse_error("timestamp", raw))
    }

    fn optional_f64(&self, idx: Option<usize>, column: &str) -> Result<Option<f64>, LoadError> {
        match idx.and_then(|i| self.cell(i)) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.parse_error(column, raw)),
        }
    }

    fn required_f64(&self, idx: usize, column: &str) -> Result<f64, LoadError> {
        let raw = self.cell(idx).unwrap_or_default();
        raw.parse::<f64>().map_err(|_| self.parse_error(column, raw))
    }

    fn optional_i64(&self, idx: usize, column: &str) -> Result<Option<i64>, LoadError> {
        match self.cell(idx) {
            None => Ok(None),
            // Upstream tables sometimes write the code as a float ("1.0").
            // A fractional code is an error, not a truncation.
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    raw.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && f.fract() == 0.0)
                        .map(|f| f as i64)
                })
                .map(Some)
                .ok_or_else(|| self.parse_error(column, raw)),
        }
    }

    fn signal_field(&self, idx: Option<usize>, field: &'static str) -> Result<f64, LoadError> {
        self.optional_f64(idx, field)?
            .ok_or(LoadError::MissingSignalField {
                line: self.line,
                field,
            })
    }

    fn signal(
        &self,
        columns: &Columns,
        timestamp: NaiveDateTime,
        direction: Direction,
        opts: &LoadOptions,
    ) -> Result<Signal, LoadError> {
        let entry = self.signal_field(columns.entry_price, "entry_price")?;
        let stop = self.signal_field(columns.stop_loss, "stop_loss")?;

        // Levels fill left to right; a blank cell ends the ladder.
        let mut prices = Vec::with_capacity(columns.take_profits.len());
        let mut blank: Option<usize> = None;
        for (n, &idx) in columns.take_profits.iter().enumerate() {
            let column = format!("tp{}", n + 1);
            match (self.optional_f64(Some(idx), &column)?, blank) {
                (None, None) => blank = Some(n + 1),
                (None, Some(_)) => {}
                (Some(p), None) => prices.push(p),
                (Some(_), Some(gap)) => {
                    return Err(self.parse_error(&format!("tp{gap}"), ""));
                }
            }
        }
        if prices.is_empty() {
            return Err(LoadError::MissingSignalField {
                line: self.line,
                field: "take_profit",
            });
        }

        let fractions =
            opts.signals
                .fractions_for(prices.len())
                .ok_or(LoadError::FractionMismatch {
                    line: self.line,
                    levels: prices.len(),
                    fractions: opts.signals.tp_close_fractions.len(),
                })?;
        let levels = prices
            .into_iter()
            .zip(fractions)
            .enumerate()
            .map(|(i, (price, fraction))| {
                TakeProfitLevel::new(price, fraction).with_action(opts.signals.action_for(i + 1))
            })
            .collect();

        let trailing = match self.optional_f64(columns.trailing_stop_pct, "trailing_stop_pct")? {
            Some(pct) if pct > 0.0 => TrailingStopConfig::Percent { pct },
            _ => opts.default_trailing,
        };

        let mut signal =
            Signal::new(timestamp, direction, entry, stop, levels).with_trailing(trailing);
        if let Some(tag) = columns.tag.and_then(|i| self.cell(i)) {
            signal = signal.with_tag(tag);
        }
        Ok(signal)
    }
}
