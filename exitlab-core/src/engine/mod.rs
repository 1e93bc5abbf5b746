//! Simulation engine: the per-position lifecycle and the portfolio loop.
//!
//! [`LifecycleEngine`] moves one position through one bar. The
//! [`PortfolioSimulator`] owns the open set, capital, and equity curve, and
//! calls the lifecycle engine for every open position on every bar.

pub mod lifecycle;
pub mod simulator;
pub mod state;

pub use lifecycle::{Advance, LifecycleEngine};
pub use simulator::{simulate, PortfolioSimulator};
pub use state::{PositionTimeout, Rejection, SimulationConfig, SimulationResult, SimulationState};
