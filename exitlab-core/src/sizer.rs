//! Risk Sizer
//!
//! Position notional from a fixed risk budget and the distance to the stop.
//!
//! # Formula
//! ```text
//! risk_dollars  = capital * risk_fraction
//! stop_fraction = |entry - stop| / entry
//! notional      = risk_dollars / stop_fraction
//! notional      = min(notional, capital * max_leverage)
//! ```
//!
//! # Example
//! - Capital: $100,000
//! - Risk per trade: 1% ($1,000)
//! - Entry $100, stop $95 (5% away)
//! - Notional: $1,000 / 0.05 = $20,000

use serde::{Deserialize, Serialize};

use crate::error::RejectReason;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskSizer {
    /// Cap on notional as a multiple of capital.
    pub max_leverage: f64,
}

impl Default for RiskSizer {
    fn default() -> Self {
        Self { max_leverage: 1.0 }
    }
}

impl RiskSizer {
    pub fn new(max_leverage: f64) -> Self {
        Self { max_leverage }
    }

    /// Notional to open, or why the trade cannot be sized.
    pub fn size(
        &self,
        capital: f64,
        risk_fraction: f64,
        entry_price: f64,
        stop_loss: f64,
    ) -> Result<f64, RejectReason> {
        if !(risk_fraction > 0.0 && risk_fraction <= 1.0) {
            return Err(RejectReason::RiskFractionOutOfRange);
        }
        if capital <= 0.0 {
            return Err(RejectReason::NonPositiveCapital);
        }
        if entry_price.is_nan() || entry_price <= 0.0 {
            return Err(RejectReason::NonPositiveEntryPrice);
        }
        let distance = (entry_price - stop_loss).abs();
        if distance == 0.0 {
            return Err(RejectReason::NonPositiveRiskDistance);
        }

        let stop_fraction = distance / entry_price;
        let notional = (capital * risk_fraction) / stop_fraction;
        Ok(notional.min(capital * self.max_leverage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_based_notional() {
        let sizer = RiskSizer::new(10.0);
        let n = sizer.size(100_000.0, 0.01, 100.0, 95.0).unwrap();
        assert!((n - 20_000.0).abs() < 1e-6);
    }

    #[test]
    fn short_side_uses_absolute_distance() {
        let sizer = RiskSizer::new(10.0);
        let n = sizer.size(100_000.0, 0.01, 100.0, 105.0).unwrap();
        assert!((n - 20_000.0).abs() < 1e-6);
    }

    #[test]
    fn leverage_cap_applies() {
        // 2% risk on a 1% stop wants 2x capital; capped at 1x.
        let sizer = RiskSizer::new(1.0);
        let n = sizer.size(50_000.0, 0.02, 100.0, 99.0).unwrap();
        assert_eq!(n, 50_000.0);
    }

    #[test]
    fn zero_distance_rejected() {
        let sizer = RiskSizer::default();
        assert_eq!(
            sizer.size(10_000.0, 0.01, 100.0, 100.0),
            Err(RejectReason::NonPositiveRiskDistance)
        );
    }

    #[test]
    fn non_positive_entry_rejected() {
        let sizer = RiskSizer::default();
        assert_eq!(
            sizer.size(10_000.0, 0.01, 0.0, -5.0),
            Err(RejectReason::NonPositiveEntryPrice)
        );
        assert_eq!(
            sizer.size(10_000.0, 0.01, -1.0, -2.0),
            Err(RejectReason::NonPositiveEntryPrice)
        );
    }

    #[test]
    fn risk_fraction_bounds() {
        let sizer = RiskSizer::default();
        assert_eq!(
            sizer.size(10_000.0, 0.0, 100.0, 95.0),
            Err(RejectReason::RiskFractionOutOfRange)
        );
        assert_eq!(
            sizer.size(10_000.0, -0.1, 100.0, 95.0),
            Err(RejectReason::RiskFractionOutOfRange)
        );
        assert_eq!(
            sizer.size(10_000.0, 1.5, 100.0, 95.0),
            Err(RejectReason::RiskFractionOutOfRange)
        );
        assert!(sizer.size(10_000.0, 1.0, 100.0, 95.0).is_ok());
    }

    #[test]
    fn broke_account_rejected() {
        let sizer = RiskSizer::default();
        assert_eq!(
            sizer.size(0.0, 0.01, 100.0, 95.0),
            Err(RejectReason::NonPositiveCapital)
        );
    }
}
