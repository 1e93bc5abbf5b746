//! Property tests for engine invariants.
//!
//! Uses proptest to verify, over random price paths and signal sets:
//! 1. Close-fraction conservation: every trade closes exactly 100%
//! 2. Stop monotonicity: a position's stop never moves against it
//! 3. Concurrency bound: never more open positions than the cap
//! 4. Determinism: identical inputs give identical outputs
//! 5. Capital conservation: final capital reconciles with the trade log

use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;

use exitlab_core::domain::{
    Bar, Direction, LevelAction, Position, Signal, TakeProfitLevel, TrailingStopConfig,
    FRACTION_EPSILON,
};
use exitlab_core::engine::{simulate, LifecycleEngine, PositionTimeout, SimulationConfig};

// ── Strategies (proptest) ────────────────────────────────────────────

fn ts(i: usize) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 1, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::hours(i as i64)
}

/// A random walk with wicks on both sides of every body.
fn arb_series() -> impl Strategy<Value = Vec<Bar>> {
    prop::collection::vec((-0.03..0.03_f64, 0.0..0.02_f64, 0.0..0.02_f64), 20..120).prop_map(
        |steps| {
            let mut close = 100.0;
            steps
                .into_iter()
                .enumerate()
                .map(|(i, (ret, up, down))| {
                    let open = close;
                    close = open * (1.0 + ret);
                    let high = open.max(close) * (1.0 + up);
                    let low = open.min(close) * (1.0 - down);
                    Bar::new(ts(i), open, high, low, close, 1_000.0)
                })
                .collect()
        },
    )
}

fn arb_trailing() -> impl Strategy<Value = TrailingStopConfig> {
    prop_oneof![
        Just(TrailingStopConfig::None),
        (0.5..5.0_f64).prop_map(|distance| TrailingStopConfig::Fixed { distance }),
        (0.01..0.1_f64).prop_map(|pct| TrailingStopConfig::Percent { pct }),
        (0.5..5.0_f64, 0.5..5.0_f64).prop_map(|(trigger_distance, trail_distance)| {
            TrailingStopConfig::BreakevenThenTrail {
                trigger_distance,
                trail_distance,
            }
        }),
    ]
}

#[derive(Debug, Clone)]
struct SignalShape {
    every: usize,
    stop_pct: f64,
    ladder: bool,
    action: LevelAction,
    trailing: TrailingStopConfig,
}

fn arb_signal_shape() -> impl Strategy<Value = SignalShape> {
    (
        2..6_usize,
        0.01..0.06_f64,
        any::<bool>(),
        prop_oneof![
            Just(LevelAction::None),
            Just(LevelAction::MoveStopToBreakeven),
            Just(LevelAction::ActivateTrailing),
        ],
        arb_trailing(),
    )
        .prop_map(|(every, stop_pct, ladder, action, trailing)| SignalShape {
            every,
            stop_pct,
            ladder,
            action,
            trailing,
        })
}

fn make_signal(bar: &Bar, direction: Direction, shape: &SignalShape) -> Signal {
    let entry = bar.close;
    let risk = entry * shape.stop_pct;
    let stop = direction.offset_favorable(entry, -risk);
    let levels = if shape.ladder {
        vec![
            TakeProfitLevel::new(direction.offset_favorable(entry, risk), 0.3)
                .with_action(shape.action),
            TakeProfitLevel::new(direction.offset_favorable(entry, 2.0 * risk), 0.3),
            TakeProfitLevel::new(direction.offset_favorable(entry, 3.0 * risk), 0.4),
        ]
    } else {
        vec![TakeProfitLevel::new(
            direction.offset_favorable(entry, 2.0 * risk),
            1.0,
        )]
    };
    Signal::new(bar.timestamp, direction, entry, stop, levels).with_trailing(shape.trailing)
}

/// Alternate long and short signals at the close of every `every`-th bar.
fn build_signals(series: &[Bar], shape: &SignalShape) -> Vec<Signal> {
    series
        .iter()
        .enumerate()
        .filter(|(i, _)| i % shape.every == 0)
        .map(|(i, bar)| {
            let direction = if (i / shape.every) % 2 == 0 {
                Direction::Long
            } else {
                Direction::Short
            };
            make_signal(bar, direction, shape)
        })
        .collect()
}

fn arb_config() -> impl Strategy<Value = SimulationConfig> {
    (
        0.001..0.05_f64,
        1..5_usize,
        0.0..0.002_f64,
        0.0..0.002_f64,
        prop::option::of(3..15_usize),
        1.0..3.0_f64,
        any::<bool>(),
    )
        .prop_map(
            |(risk, cap, commission, slippage, timeout, leverage, gap_fills)| SimulationConfig {
                initial_capital: 100_000.0,
                risk_per_trade: risk,
                max_concurrent_positions: cap,
                commission_rate: commission,
                slippage_rate: slippage,
                position_timeout: timeout.map(PositionTimeout::Bars),
                max_leverage: leverage,
                gap_fills,
                profiles: Default::default(),
            },
        )
}

// ── 1. Close-fraction conservation ───────────────────────────────────

proptest! {
    #[test]
    fn every_trade_closes_exactly_once(
        series in arb_series(),
        shape in arb_signal_shape(),
        config in arb_config(),
    ) {
        let signals = build_signals(&series, &shape);
        let result = simulate(&series, &signals, &config).unwrap();
        for trade in &result.trades {
            prop_assert!((trade.closed_fraction() - 1.0).abs() < FRACTION_EPSILON);
            prop_assert!(trade.closed_portions.iter().all(|c| c.fraction_closed > 0.0));
        }
        // Every signal is accounted for: traded or rejected.
        prop_assert_eq!(result.trades.len() + result.rejections.len(), signals.len());
    }
}

// ── 2. Stop monotonicity ─────────────────────────────────────────────

proptest! {
    #[test]
    fn stop_never_retreats(
        series in arb_series(),
        shape in arb_signal_shape(),
        long in any::<bool>(),
    ) {
        let first = &series[0];
        let direction = if long { Direction::Long } else { Direction::Short };
        let signal = make_signal(first, direction, &shape);

        let engine = LifecycleEngine::default();
        let mut position = Position::open(
            signal.clone(),
            signal.entry_price,
            signal.initial_stop_loss,
            10_000.0,
            first.timestamp,
            0,
        );
        let mut last_stop = position.active_stop_loss();
        for (i, bar) in series.iter().enumerate().skip(1) {
            let adv = engine.advance(position, bar, i).unwrap();
            position = adv.position;
            let stop = position.active_stop_loss();
            prop_assert!(
                !direction.is_better(last_stop, stop),
                "stop moved against the holder: {} -> {}", last_stop, stop
            );
            last_stop = stop;
            if position.is_closed() {
                break;
            }
        }
    }
}

// ── 3. Concurrency bound ─────────────────────────────────────────────

proptest! {
    #[test]
    fn open_positions_never_exceed_cap(
        series in arb_series(),
        shape in arb_signal_shape(),
        config in arb_config(),
    ) {
        let shape = SignalShape { every: 1, ..shape };
        let signals = build_signals(&series, &shape);
        let result = simulate(&series, &signals, &config).unwrap();
        prop_assert!(result.max_open_positions <= config.max_concurrent_positions);

        // Replay the trade log: open intervals never overlap beyond the cap.
        for t in 0..series.len() {
            let open = result
                .trades
                .iter()
                .filter(|tr| tr.entry_bar <= t && t < tr.exit_bar)
                .count();
            prop_assert!(open <= config.max_concurrent_positions);
        }
    }
}

// ── 4. Determinism ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn identical_inputs_identical_outputs(
        series in arb_series(),
        shape in arb_signal_shape(),
        config in arb_config(),
    ) {
        let signals = build_signals(&series, &shape);
        let a = simulate(&series, &signals, &config).unwrap();
        let b = simulate(&series, &signals, &config).unwrap();
        prop_assert_eq!(
            serde_json::to_string(&a.trades).unwrap(),
            serde_json::to_string(&b.trades).unwrap()
        );
        prop_assert_eq!(a.equity_curve, b.equity_curve);
    }
}

// ── 5. Capital conservation ──────────────────────────────────────────

proptest! {
    #[test]
    fn capital_reconciles_with_trades(
        series in arb_series(),
        shape in arb_signal_shape(),
        config in arb_config(),
    ) {
        let signals = build_signals(&series, &shape);
        let result = simulate(&series, &signals, &config).unwrap();
        let pnl: f64 = result.trades.iter().map(|t| t.realized_pnl).sum();
        let commission: f64 = result.trades.iter().map(|t| t.commission).sum();
        let expected = config.initial_capital + pnl - commission;
        prop_assert!((result.final_capital - expected).abs() < 1e-6 * config.initial_capital);
        prop_assert!((result.total_commission - commission).abs() < 1e-9);
        prop_assert_eq!(result.equity_curve.len(), series.len() + 1);
        prop_assert_eq!(result.equity_curve[0], config.initial_capital);
    }
}
