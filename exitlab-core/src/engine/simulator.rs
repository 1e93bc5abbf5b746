//! Portfolio simulator: drives a whole price series through the lifecycle
//! engine under a capital and concurrency budget.
//!
//! Three phases per bar, strictly in this order:
//! 1. Advance every open position (stop, take-profits, trailing), then apply
//!    the timeout. Closed positions are finalized and settled into capital.
//! 2. Consider the bar's signal: concurrency cap, timeout window, sizing and
//!    free margin. A new position is first advanced on the next bar.
//! 3. Mark to market at the bar's close and append to the equity curve.
//!
//! At the end of the series every position still open is closed at the last
//! close with reason `EndOfData`.

use std::collections::BTreeMap;

use crate::domain::{Bar, ExitReason, Position, Signal};
use crate::error::{InvariantViolation, RejectReason, SimulationError};
use crate::exit_policy::{ExitPolicy, ExitProfile};
use crate::sizer::RiskSizer;

use super::lifecycle::LifecycleEngine;
use super::state::{SimulationConfig, SimulationResult, SimulationState};

pub struct PortfolioSimulator {
    config: SimulationConfig,
    engine: LifecycleEngine,
    sizer: RiskSizer,
}

impl PortfolioSimulator {
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        Ok(Self {
            engine: LifecycleEngine::new(ExitPolicy::new(config.gap_fills)),
            sizer: RiskSizer::new(config.max_leverage),
            config,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run the series. Rejected signals are recorded in the result; invariant
    /// violations abort the run.
    pub fn run(
        &self,
        series: &[Bar],
        signals: &[Signal],
    ) -> Result<SimulationResult, SimulationError> {
        validate_series(series)?;

        let mut state = SimulationState::new(self.config.initial_capital, series.len());
        let mut pending = index_signals(series, signals, &mut state)?;

        for (t, bar) in series.iter().enumerate() {
            // ─── Phase 1: advance open positions ───
            let open = std::mem::take(&mut state.open);
            for position in open {
                let opened_at = position.opened_at;
                let wrap = |source: InvariantViolation| SimulationError::Position {
                    opened_at,
                    bar_time: bar.timestamp,
                    source,
                };

                let mut position = self.engine.advance(position, bar, t).map_err(wrap)?.position;
                if !position.is_closed() && self.timed_out(&position, t, bar) {
                    position = self
                        .engine
                        .force_close(position, bar, t, ExitReason::Timeout)
                        .map_err(wrap)?
                        .position;
                }

                if position.is_closed() {
                    self.settle(position, &mut state).map_err(wrap)?;
                } else {
                    state.open.push(position);
                }
            }

            // ─── Phase 2: new entries ───
            if let Some(signal) = pending.remove(&t) {
                let timestamp = signal.timestamp;
                match self.try_open(signal, series, t, &state) {
                    Ok(position) => {
                        tracing::debug!(
                            %timestamp,
                            direction = ?position.direction(),
                            entry = position.entry_price,
                            notional = position.notional,
                            "position opened"
                        );
                        state.open.push(position);
                    }
                    Err(reason) => state.reject(timestamp, reason),
                }
            }
            state.max_open_positions = state.max_open_positions.max(state.open.len());

            // ─── Phase 3: mark to market ───
            let equity = state.mark_to_market(bar.close);
            state.equity_curve.push(equity);
        }

        if let Some((t, last)) = series.iter().enumerate().last() {
            let open = std::mem::take(&mut state.open);
            if !open.is_empty() {
                tracing::warn!(
                    count = open.len(),
                    at = %last.timestamp,
                    "closing positions still open at end of data"
                );
            }
            for position in open {
                let opened_at = position.opened_at;
                let wrap = |source: InvariantViolation| SimulationError::Position {
                    opened_at,
                    bar_time: last.timestamp,
                    source,
                };
                let position = self
                    .engine
                    .force_close(position, last, t, ExitReason::EndOfData)
                    .map_err(wrap)?
                    .position;
                self.settle(position, &mut state).map_err(wrap)?;
            }
            if let Some(final_point) = state.equity_curve.last_mut() {
                *final_point = state.capital;
            }
        }

        state.rejections.sort_by_key(|r| r.timestamp);

        tracing::info!(
            bars = series.len(),
            trades = state.trades.len(),
            rejected = state.rejections.len(),
            final_capital = state.capital,
            "simulation complete"
        );

        Ok(SimulationResult {
            trades: state.trades,
            equity_curve: state.equity_curve,
            rejections: state.rejections,
            final_capital: state.capital,
            total_commission: state.total_commission,
            max_open_positions: state.max_open_positions,
            bar_count: series.len(),
        })
    }

    fn timed_out(&self, position: &Position, t: usize, bar: &Bar) -> bool {
        self.config
            .position_timeout
            .is_some_and(|timeout| {
                timeout.elapsed(position.opened_index, position.opened_at, t, bar)
            })
    }

    /// Finalize a closed position and book it into capital.
    fn settle(
        &self,
        position: Position,
        state: &mut SimulationState,
    ) -> Result<(), InvariantViolation> {
        let commission = position.notional * self.config.commission_rate;
        let trade = self.engine.finalize(position, commission)?;
        state.capital += trade.realized_pnl - commission;
        state.total_commission += commission;
        tracing::debug!(
            entry = %trade.entry_time,
            exit = %trade.exit_time,
            reason = %trade.exit_reason,
            pnl = trade.net_pnl(),
            "trade closed"
        );
        state.trades.push(trade);
        Ok(())
    }

    /// Turn a signal into a position, or say why not.
    fn try_open(
        &self,
        signal: Signal,
        series: &[Bar],
        t: usize,
        state: &SimulationState,
    ) -> Result<Position, RejectReason> {
        let cfg = &self.config;
        if state.open.len() >= cfg.max_concurrent_positions {
            return Err(RejectReason::MaxConcurrentPositions);
        }
        if let Some(timeout) = cfg.position_timeout {
            if !timeout.fits(series, t) {
                return Err(RejectReason::TimeoutWindowUnavailable);
            }
        }
        // Zero or negative risk: the stop must sit strictly on the losing side.
        if !signal
            .direction
            .is_better(signal.entry_price, signal.initial_stop_loss)
        {
            return Err(RejectReason::NonPositiveRiskDistance);
        }

        let profile: Option<ExitProfile> = signal
            .tag
            .as_deref()
            .and_then(|tag| cfg.profiles.get(tag))
            .copied();
        let stop = match profile {
            Some(p) => p.scaled_stop(signal.entry_price, signal.initial_stop_loss),
            None => signal.initial_stop_loss,
        };
        // Pay up on longs, sell lower on shorts.
        let entry = signal
            .direction
            .offset_favorable(signal.entry_price, signal.entry_price * cfg.slippage_rate);

        let sized = self
            .sizer
            .size(state.capital, cfg.risk_per_trade, entry, stop)?;
        if let Some(first) = signal.take_profit_levels.first() {
            if !signal.direction.is_better(first.price, entry) {
                return Err(RejectReason::EntryBeyondTarget);
            }
        }
        let free = (state.capital - state.margin_in_use(cfg.max_leverage)) * cfg.max_leverage;
        if free <= 0.0 {
            return Err(RejectReason::InsufficientCapital);
        }
        let notional = sized.min(free);

        let bar = &series[t];
        let mut position = Position::open(signal, entry, stop, notional, bar.timestamp, t);
        if let Some(trailing) = profile.and_then(|p| p.trailing) {
            position = position.with_trailing(trailing);
        }
        Ok(position)
    }
}

/// Convenience wrapper: build a simulator and run it once.
pub fn simulate(
    series: &[Bar],
    signals: &[Signal],
    config: &SimulationConfig,
) -> Result<SimulationResult, SimulationError> {
    PortfolioSimulator::new(config.clone())?.run(series, signals)
}

/// Bars must be well-formed and strictly increasing in time.
fn validate_series(series: &[Bar]) -> Result<(), SimulationError> {
    for (i, bar) in series.iter().enumerate() {
        if bar.is_void() || !bar.is_sane() {
            return Err(SimulationError::Series {
                source: InvariantViolation::InvalidBar {
                    timestamp: bar.timestamp,
                },
            });
        }
        if i > 0 && bar.timestamp <= series[i - 1].timestamp {
            return Err(SimulationError::Series {
                source: InvariantViolation::OutOfOrderBar {
                    previous: series[i - 1].timestamp,
                    current: bar.timestamp,
                },
            });
        }
    }
    Ok(())
}

/// Attach signals to bar indices. Malformed signals abort the run; signals
/// that cannot be placed on a bar are rejected.
fn index_signals(
    series: &[Bar],
    signals: &[Signal],
    state: &mut SimulationState,
) -> Result<BTreeMap<usize, Signal>, SimulationError> {
    let mut pending = BTreeMap::new();
    for signal in signals {
        signal.validate().map_err(|source| SimulationError::Signal {
            signal_time: signal.timestamp,
            source,
        })?;

        match series.binary_search_by_key(&signal.timestamp, |b| b.timestamp) {
            Err(_) => state.reject(signal.timestamp, RejectReason::NoMatchingBar),
            Ok(idx) if pending.contains_key(&idx) => {
                state.reject(signal.timestamp, RejectReason::DuplicateSignal)
            }
            Ok(idx) => {
                pending.insert(idx, signal.clone());
            }
        }
    }
    Ok(pending)
}
