//! Rank-position to monthly sales volume estimation.
//!
//! Power-law approximation of daily sales velocity from category rank,
//! scaled to a 30-day window: `volume = max(1, floor(a * rank^-b * 30))`.
//! The coefficients are rough fits per category; treat the output as an
//! order-of-magnitude screening signal, never as an exact figure.

use crate::config::{CategoryCoefficients, EstimatorConfig, DEFAULT_CATEGORY};

pub struct SalesEstimator {
    config: EstimatorConfig,
}

impl SalesEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    fn coefficients(&self, category: &str) -> CategoryCoefficients {
        self.config
            .coefficients
            .get(category)
            .or_else(|| self.config.coefficients.get(DEFAULT_CATEGORY))
            .copied()
            .unwrap_or(CategoryCoefficients { a: 4000.0, b: 0.78 })
    }

    /// Estimated monthly units for a rank position. Always >= 1: a listing
    /// that holds any rank at all sells something.
    pub fn estimate(&self, rank: u64, category: &str) -> u64 {
        let rank = rank.max(1);
        let c = self.coefficients(category);
        let daily = c.a * (rank as f64).powf(-c.b);
        let monthly = (daily * 30.0).floor() as u64;
        monthly.max(1)
    }

    /// Estimated monthly revenue at the listing's current price.
    pub fn estimate_monthly_revenue(&self, rank: u64, price: u64, category: &str) -> u64 {
        self.estimate(rank, category) * price
    }
}

impl Default for SalesEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}
