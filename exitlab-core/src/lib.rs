//! ExitLab Core: domain types, exit policy, position lifecycle, risk sizing,
//! portfolio simulation.
//!
//! This crate contains the execution engine:
//! - Domain types (bars, signals, positions, partial closes, closed trades)
//! - Exit policy: stop-loss, multi-level take-profit, breakeven, trailing
//! - Stop ratchet: the active stop only ever tightens
//! - Lifecycle engine advancing one position one bar at a time
//! - Risk sizer and a capital/concurrency-constrained portfolio simulator
//!
//! No I/O happens here; loading, configuration files, and export live in
//! `exitlab-runner`.

pub mod domain;
pub mod engine;
pub mod error;
pub mod exit_policy;
pub mod ratchet;
pub mod sizer;

pub use error::{InvariantViolation, RejectReason, SimulationError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: domain and result types are Send + Sync, so
    /// parameter sweeps can hand them across threads.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Signal>();
        require_sync::<domain::Signal>();
        require_send::<domain::Position>();
        require_sync::<domain::Position>();
        require_send::<domain::ClosedTrade>();
        require_sync::<domain::ClosedTrade>();

        // Engine types
        require_send::<engine::SimulationConfig>();
        require_sync::<engine::SimulationConfig>();
        require_send::<engine::SimulationResult>();
        require_sync::<engine::SimulationResult>();
        require_send::<engine::PortfolioSimulator>();
        require_sync::<engine::PortfolioSimulator>();

        // Errors
        require_send::<SimulationError>();
        require_sync::<SimulationError>();
    }
}
