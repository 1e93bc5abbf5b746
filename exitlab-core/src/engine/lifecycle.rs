//! Position lifecycle engine: one position, one bar at a time.
//!
//! Per-bar order (fixed; re-implementations must match):
//! 1. Stop-loss. If the adverse extreme crosses the active stop the whole
//!    remainder closes and nothing else is evaluated this bar. Intrabar path
//!    order is unknown, so the stop is assumed to have come first.
//! 2. Take-profits, nearest first. Several levels can fill on one bar.
//!    A filled level may park the stop at breakeven or arm the trailing rule.
//! 3. Trailing ratchet. Extremes are updated, the trailing rule proposes a
//!    stop, and the ratchet keeps it only if it is tighter.
//!
//! Timeouts are the caller's business (see the simulator); the engine only
//! offers [`LifecycleEngine::force_close`].

use crate::domain::{
    Bar, ClosedTrade, ExitReason, LevelAction, PartialClose, Position, FRACTION_EPSILON,
};
use crate::error::InvariantViolation;
use crate::exit_policy::ExitPolicy;
use crate::ratchet::StopKind;

/// A position after one bar, plus whatever closed during that bar.
#[derive(Debug, Clone)]
pub struct Advance {
    pub position: Position,
    pub events: Vec<PartialClose>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleEngine {
    policy: ExitPolicy,
}

impl LifecycleEngine {
    pub fn new(policy: ExitPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ExitPolicy {
        &self.policy
    }

    /// Apply one bar to an open position.
    ///
    /// Bars must arrive in non-decreasing timestamp order; an earlier bar is
    /// reported as [`InvariantViolation::OutOfOrderBar`]. A closed position
    /// passes through untouched.
    pub fn advance(
        &self,
        mut position: Position,
        bar: &Bar,
        bar_index: usize,
    ) -> Result<Advance, InvariantViolation> {
        if position.is_closed() {
            return Ok(Advance {
                position,
                events: Vec::new(),
            });
        }
        check_order(&position, bar)?;
        position.last_timestamp = bar.timestamp;
        let stop_before = position.active_stop_loss();

        // 1. Stop-loss dominates.
        if let Some((price, reason)) = self.policy.stop_fill(&position, bar) {
            position.record_extremes(bar);
            let event = position.close_all(bar.timestamp, bar_index, price, reason);
            return Ok(Advance {
                position,
                events: vec![event],
            });
        }

        // 2. Take-profit ladder.
        let mut events = Vec::new();
        let level_count = position.signal.take_profit_levels.len();
        while position.next_tp_index < level_count && !position.is_closed() {
            let index = position.next_tp_index;
            let level = position.signal.take_profit_levels[index].clone();
            let Some(price) = self.policy.take_profit_fill(&position, &level, bar) else {
                // Later levels are farther out; none of them filled either.
                break;
            };

            let fraction = if index + 1 == level_count {
                position.remaining_fraction
            } else {
                level.close_fraction
            };
            events.push(position.close_slice(
                bar.timestamp,
                bar_index,
                price,
                fraction,
                ExitReason::TakeProfit { level: index + 1 },
            ));
            position.next_tp_index += 1;

            match level.on_fill {
                LevelAction::None => {}
                LevelAction::MoveStopToBreakeven => {
                    let entry = position.entry_price;
                    position.stop.tighten(entry, StopKind::Breakeven);
                }
                LevelAction::ActivateTrailing => {
                    position.trailing_active = !position.trailing.is_none();
                }
            }
        }

        // 3. Trailing ratchet.
        position.record_extremes(bar);
        if !position.is_closed() {
            if let Some((candidate, kind)) = self.policy.trailing_candidate(&position) {
                position.stop.tighten(candidate, kind);
            }
        }

        position.stop.ensure_not_loosened(stop_before)?;
        Ok(Advance { position, events })
    }

    /// Close the remainder at the bar's close (timeout, end of data).
    pub fn force_close(
        &self,
        mut position: Position,
        bar: &Bar,
        bar_index: usize,
        reason: ExitReason,
    ) -> Result<Advance, InvariantViolation> {
        if position.is_closed() {
            return Ok(Advance {
                position,
                events: Vec::new(),
            });
        }
        check_order(&position, bar)?;
        position.last_timestamp = bar.timestamp;
        position.record_extremes(bar);
        let event = position.close_all(bar.timestamp, bar_index, bar.close, reason);
        Ok(Advance {
            position,
            events: vec![event],
        })
    }

    /// Seal a fully closed position into its trade record.
    pub fn finalize(
        &self,
        position: Position,
        commission: f64,
    ) -> Result<ClosedTrade, InvariantViolation> {
        if !position.is_closed() {
            return Err(InvariantViolation::PositionNotClosed {
                remaining: position.remaining_fraction,
            });
        }
        let closed: f64 = position
            .closed_portions
            .iter()
            .map(|c| c.fraction_closed)
            .sum();
        if (closed - 1.0).abs() > FRACTION_EPSILON {
            return Err(InvariantViolation::LedgerImbalance { sum: closed });
        }
        let Some(last) = position.closed_portions.last().cloned() else {
            return Err(InvariantViolation::LedgerImbalance { sum: 0.0 });
        };

        let exit_price = position
            .closed_portions
            .iter()
            .map(|c| c.price * c.fraction_closed)
            .sum::<f64>()
            / closed;
        let dir = position.direction();
        let entry = position.entry_price;
        let pnl_pct = if position.notional > 0.0 {
            position.realized_pnl / position.notional
        } else {
            0.0
        };

        Ok(ClosedTrade {
            entry_time: position.opened_at,
            entry_bar: position.opened_index,
            entry_price: entry,
            exit_time: last.timestamp,
            exit_bar: last.bar_index,
            exit_price,
            exit_reason: last.reason,
            notional: position.notional,
            quantity: position.quantity,
            realized_pnl: position.realized_pnl,
            commission,
            pnl_pct,
            bars_held: last.bar_index.saturating_sub(position.opened_index),
            duration_secs: (last.timestamp - position.opened_at).num_seconds(),
            mae: dir.favorable_move(entry, position.adverse_extreme_price) / entry,
            mfe: dir.favorable_move(entry, position.favorable_extreme_price) / entry,
            closed_portions: position.closed_portions,
            signal: position.signal,
        })
    }
}

fn check_order(position: &Position, bar: &Bar) -> Result<(), InvariantViolation> {
    if bar.timestamp < position.last_timestamp {
        return Err(InvariantViolation::OutOfOrderBar {
            previous: position.last_timestamp,
            current: bar.timestamp,
        });
    }
    Ok(())
}
