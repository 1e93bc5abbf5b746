//! Domain types for ExitLab

pub mod bar;
pub mod position;
pub mod signal;
pub mod trade;

pub use bar::Bar;
pub use position::Position;
pub use signal::{
    Direction, LevelAction, Signal, TakeProfitLevel, TrailingStopConfig, FRACTION_EPSILON,
};
pub use trade::{ClosedTrade, ExitReason, PartialClose};
