use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::bar::Bar;
use super::signal::{Direction, Signal, TrailingStopConfig, FRACTION_EPSILON};
use super::trade::{ExitReason, PartialClose};
use crate::ratchet::StopRatchet;

/// Mutable lifecycle state of one open trade.
///
/// Owned by the simulator's open set and moved through
/// [`LifecycleEngine::advance`](crate::engine::LifecycleEngine::advance) by
/// value each bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub signal: Signal,
    /// Fill price after slippage.
    pub entry_price: f64,
    /// Currency value at entry.
    pub notional: f64,
    pub quantity: f64,
    /// Share of the original size still open, in (0, 1]; exactly 0 once closed.
    pub remaining_fraction: f64,
    pub realized_pnl: f64,
    pub stop: StopRatchet,
    pub favorable_extreme_price: f64,
    pub adverse_extreme_price: f64,
    /// First take-profit level not yet consumed. Only moves forward.
    pub next_tp_index: usize,
    /// Effective trailing rule (signal's own, or a profile override).
    pub trailing: TrailingStopConfig,
    pub trailing_active: bool,
    pub opened_at: NaiveDateTime,
    pub opened_index: usize,
    pub last_timestamp: NaiveDateTime,
    pub closed_portions: Vec<PartialClose>,
}

impl Position {
    pub fn open(
        signal: Signal,
        entry_price: f64,
        initial_stop: f64,
        notional: f64,
        opened_at: NaiveDateTime,
        opened_index: usize,
    ) -> Self {
        let trailing = signal.trailing;
        let trailing_active = !trailing.is_none() && !signal.trailing_waits_for_level();
        Self {
            stop: StopRatchet::new(signal.direction, initial_stop),
            quantity: if entry_price > 0.0 {
                notional / entry_price
            } else {
                0.0
            },
            entry_price,
            notional,
            remaining_fraction: 1.0,
            realized_pnl: 0.0,
            favorable_extreme_price: entry_price,
            adverse_extreme_price: entry_price,
            next_tp_index: 0,
            trailing,
            trailing_active,
            opened_at,
            opened_index,
            last_timestamp: opened_at,
            closed_portions: Vec::new(),
            signal,
        }
    }

    /// Replace the trailing rule before the first bar is processed.
    pub fn with_trailing(mut self, trailing: TrailingStopConfig) -> Self {
        self.trailing = trailing;
        self.trailing_active = !trailing.is_none() && !self.signal.trailing_waits_for_level();
        self
    }

    pub fn direction(&self) -> Direction {
        self.signal.direction
    }

    pub fn active_stop_loss(&self) -> f64 {
        self.stop.level()
    }

    pub fn is_closed(&self) -> bool {
        self.remaining_fraction <= 0.0
    }

    /// Mark-to-market PnL of the still-open slice.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.direction().favorable_move(self.entry_price, price)
            * self.quantity
            * self.remaining_fraction
    }

    /// Open margin at the given leverage.
    pub fn margin(&self, max_leverage: f64) -> f64 {
        self.notional * self.remaining_fraction / max_leverage
    }

    /// Track the best and worst prices seen since entry.
    pub fn record_extremes(&mut self, bar: &Bar) {
        let dir = self.direction();
        self.favorable_extreme_price =
            dir.better_of(dir.favorable_extreme(bar), self.favorable_extreme_price);
        let adverse = dir.adverse_extreme(bar);
        if dir.is_better(self.adverse_extreme_price, adverse) {
            self.adverse_extreme_price = adverse;
        }
    }

    /// Close up to `fraction` of the original size at `price`.
    ///
    /// The fraction is clamped to what is still open; a residue below
    /// [`FRACTION_EPSILON`] is swept into this close so the position lands
    /// on exactly zero.
    pub fn close_slice(
        &mut self,
        timestamp: NaiveDateTime,
        bar_index: usize,
        price: f64,
        fraction: f64,
        reason: ExitReason,
    ) -> PartialClose {
        let mut fraction = fraction.min(self.remaining_fraction);
        if self.remaining_fraction - fraction < FRACTION_EPSILON {
            fraction = self.remaining_fraction;
        }
        let pnl = self.direction().favorable_move(self.entry_price, price) * self.quantity * fraction;

        self.remaining_fraction = if fraction == self.remaining_fraction {
            0.0
        } else {
            self.remaining_fraction - fraction
        };
        self.realized_pnl += pnl;

        let event = PartialClose {
            timestamp,
            bar_index,
            price,
            fraction_closed: fraction,
            pnl,
            reason,
        };
        self.closed_portions.push(event.clone());
        event
    }

    /// Close everything that is still open.
    pub fn close_all(
        &mut self,
        timestamp: NaiveDateTime,
        bar_index: usize,
        price: f64,
        reason: ExitReason,
    ) -> PartialClose {
        let rest = self.remaining_fraction;
        self.close_slice(timestamp, bar_index, price, rest, reason)
    }
}
