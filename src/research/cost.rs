//! Landed-cost and profit calculation for a matched pair.
//!
//! Pure over its rate tables: identical inputs always produce an identical
//! breakdown.

use crate::config::{CostRates, TierBoundary, DEFAULT_CATEGORY};
use crate::models::{CostBreakdown, FulfillmentMode};

pub struct CostEstimator {
    rates: CostRates,
}

impl CostEstimator {
    pub fn new(rates: CostRates) -> Self {
        Self { rates }
    }

    /// Full landed-cost breakdown.
    ///
    /// `source_price` is the sale price on the source marketplace (JPY),
    /// `target_price_cny` the acquisition price on the target marketplace.
    /// `weight_kg` falls back to the configured default when the listing
    /// reports none.
    pub fn calculate(
        &self,
        source_price: u64,
        target_price_cny: f64,
        fulfillment: FulfillmentMode,
        category: &str,
        weight_kg: Option<f64>,
    ) -> CostBreakdown {
        let converted_cost = (target_price_cny * self.rates.exchange_rate).round() as u64;

        let weight = weight_kg.unwrap_or(self.rates.default_weight_kg);
        let shipping = (weight * self.rates.shipping_per_kg).round() as u64;

        let customs = if converted_cost + shipping > self.rates.customs_threshold {
            (converted_cost as f64 * self.rates.customs_rate).round() as u64
        } else {
            0
        };

        let referral_rate = self
            .rates
            .referral_rates
            .get(category)
            .or_else(|| self.rates.referral_rates.get(DEFAULT_CATEGORY))
            .copied()
            .unwrap_or(0.15);
        let referral_fee = (source_price as f64 * referral_rate).round() as u64;

        let fulfillment_fee = match fulfillment {
            FulfillmentMode::PlatformFulfilled => self.fulfillment_fee(source_price),
            FulfillmentMode::SelfFulfilled => 0,
        };

        let total_cost = converted_cost + shipping + customs + referral_fee + fulfillment_fee;
        let profit = source_price as i64 - total_cost as i64;
        let profit_rate = if source_price > 0 {
            profit as f64 / source_price as f64
        } else {
            0.0
        };

        CostBreakdown {
            source_price,
            converted_cost,
            shipping,
            customs,
            referral_fee,
            fulfillment_fee,
            total_cost,
            profit,
            profit_rate,
            is_profitable: profit > 0,
        }
    }

    /// Fee for the lowest tier covering `price` under the configured
    /// boundary rule; prices above every tier take the top fee.
    fn fulfillment_fee(&self, price: u64) -> u64 {
        for tier in &self.rates.fee_tiers {
            let covered = match self.rates.tier_boundary {
                TierBoundary::InclusiveUpper => price <= tier.up_to,
                TierBoundary::ExclusiveUpper => price < tier.up_to,
            };
            if covered {
                return tier.fee;
            }
        }
        self.rates.top_fee
    }

    /// Smallest source price on a 50-JPY grid in [1000, 50000] whose
    /// breakdown is at least break-even. Returns the grid ceiling when even
    /// that price loses money.
    pub fn break_even_price(
        &self,
        target_price_cny: f64,
        fulfillment: FulfillmentMode,
        category: &str,
        weight_kg: Option<f64>,
    ) -> u64 {
        let mut price = 1000;
        while price <= 50_000 {
            let breakdown =
                self.calculate(price, target_price_cny, fulfillment, category, weight_kg);
            if breakdown.profit >= 0 {
                return price;
            }
            price += 50;
        }
        50_000
    }
}
