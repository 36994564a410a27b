//! Commercial screening of normalized listings.

use tracing::{debug, info};

use crate::config::FilterConfig;
use crate::models::{FulfillmentMode, Listing};
use crate::research::estimator::SalesEstimator;

/// Per-listing screening verdict, with the volume/revenue estimates so the
/// orchestrator does not have to recompute them.
#[derive(Debug, Clone)]
pub struct FilterVerdict {
    pub passed: bool,
    pub reason: Option<String>,
    pub est_monthly_units: u64,
    pub est_monthly_revenue: u64,
}

impl FilterVerdict {
    fn rejected(reason: String) -> Self {
        Self {
            passed: false,
            reason: Some(reason),
            est_monthly_units: 0,
            est_monthly_revenue: 0,
        }
    }
}

pub struct FilterEngine<'a> {
    config: FilterConfig,
    estimator: &'a SalesEstimator,
}

impl<'a> FilterEngine<'a> {
    pub fn new(config: FilterConfig, estimator: &'a SalesEstimator) -> Self {
        Self { config, estimator }
    }

    /// Screen one listing. A survivor must sit in an allowed category,
    /// clear the price floor and the review ceiling, and its estimated
    /// demand must clear the threshold for its fulfillment mode. Listings
    /// without a rank cannot satisfy a demand threshold and are rejected.
    pub fn check(&self, listing: &Listing) -> FilterVerdict {
        if self
            .config
            .excluded_categories
            .iter()
            .any(|c| c == &listing.category)
        {
            return FilterVerdict::rejected(format!(
                "category {} is excluded",
                listing.category
            ));
        }
        if listing.price < self.config.min_price {
            return FilterVerdict::rejected(format!(
                "price {} below floor {}",
                listing.price, self.config.min_price
            ));
        }
        if listing.review_count > self.config.max_reviews {
            return FilterVerdict::rejected(format!(
                "review count {} above ceiling {}",
                listing.review_count, self.config.max_reviews
            ));
        }

        let Some(rank) = listing.rank else {
            return FilterVerdict::rejected("no rank, demand unknowable".to_string());
        };

        let units = self.estimator.estimate(rank, &listing.category);
        let revenue = units * listing.price;

        let passed = match listing.fulfillment {
            FulfillmentMode::PlatformFulfilled => {
                revenue >= self.config.min_monthly_revenue_platform
            }
            FulfillmentMode::SelfFulfilled => units >= self.config.min_monthly_units_self,
        };

        if passed {
            FilterVerdict {
                passed: true,
                reason: None,
                est_monthly_units: units,
                est_monthly_revenue: revenue,
            }
        } else {
            let reason = match listing.fulfillment {
                FulfillmentMode::PlatformFulfilled => format!(
                    "est revenue {} below platform floor {}",
                    revenue, self.config.min_monthly_revenue_platform
                ),
                FulfillmentMode::SelfFulfilled => format!(
                    "est units {} below self-fulfilled floor {}",
                    units, self.config.min_monthly_units_self
                ),
            };
            FilterVerdict {
                passed: false,
                reason: Some(reason),
                est_monthly_units: units,
                est_monthly_revenue: revenue,
            }
        }
    }

    /// Screen a batch, preserving input order. Survivors come back paired
    /// with their verdict (estimates included).
    pub fn filter(&self, listings: &[Listing]) -> Vec<(Listing, FilterVerdict)> {
        let mut survivors = Vec::new();
        for listing in listings {
            let verdict = self.check(listing);
            if verdict.passed {
                survivors.push((listing.clone(), verdict));
            } else {
                debug!(
                    listing_id = %listing.id,
                    reason = verdict.reason.as_deref().unwrap_or(""),
                    "listing filtered out"
                );
            }
        }
        info!(
            passed = survivors.len(),
            total = listings.len(),
            "filter pass complete"
        );
        survivors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EstimatorConfig;

    fn listing(
        id: &str,
        price: u64,
        reviews: u64,
        rank: Option<u64>,
        fulfillment: FulfillmentMode,
    ) -> Listing {
        Listing {
            id: id.to_string(),
            title: "test item".to_string(),
            price,
            image_url: String::new(),
            category: "home_kitchen".to_string(),
            rank,
            review_count: reviews,
            fulfillment,
            url: String::new(),
        }
    }

    fn engine(estimator: &SalesEstimator) -> FilterEngine<'_> {
        FilterEngine::new(FilterConfig::default(), estimator)
    }

    #[test]
    fn test_review_ceiling_excludes_regardless_of_other_fields() {
        let est = SalesEstimator::new(EstimatorConfig::default());
        let config = FilterConfig {
            max_reviews: 40,
            ..FilterConfig::default()
        };
        let engine = FilterEngine::new(config, &est);
        // Strong price and rank, but 41 reviews against a ceiling of 40.
        let l = listing("A1", 5000, 41, Some(100), FulfillmentMode::PlatformFulfilled);
        let verdict = engine.check(&l);
        assert!(!verdict.passed);
        assert!(verdict.reason.unwrap().contains("review"));
    }

    #[test]
    fn test_excluded_category_rejected_regardless_of_demand() {
        let est = SalesEstimator::new(EstimatorConfig::default());
        let config = FilterConfig {
            excluded_categories: vec!["home_kitchen".to_string()],
            ..FilterConfig::default()
        };
        let engine = FilterEngine::new(config, &est);
        // Would pass every other screen.
        let l = listing("A1", 5000, 5, Some(100), FulfillmentMode::PlatformFulfilled);
        let verdict = engine.check(&l);
        assert!(!verdict.passed);
        assert!(verdict.reason.unwrap().contains("category"));
    }

    #[test]
    fn test_price_floor() {
        let est = SalesEstimator::default();
        let e = engine(&est);
        let l = listing("A1", 100, 5, Some(100), FulfillmentMode::SelfFulfilled);
        assert!(!e.check(&l).passed);
    }

    #[test]
    fn test_rankless_listing_dropped() {
        let est = SalesEstimator::default();
        let e = engine(&est);
        let l = listing("A1", 3000, 5, None, FulfillmentMode::SelfFulfilled);
        let verdict = e.check(&l);
        assert!(!verdict.passed);
        assert!(verdict.reason.unwrap().contains("rank"));
    }

    #[test]
    fn test_platform_fulfilled_uses_revenue_floor() {
        let est = SalesEstimator::default();
        let e = engine(&est);
        // Rank 5000 in home_kitchen -> 252 units; 252 * 2000 = 504000 >= 20000.
        let good = listing("A1", 2000, 5, Some(5000), FulfillmentMode::PlatformFulfilled);
        assert!(e.check(&good).passed);
        // Very deep rank -> 1 unit; 1 * 2000 = 2000 < 20000.
        let weak = listing("A2", 2000, 5, Some(50_000_000), FulfillmentMode::PlatformFulfilled);
        assert!(!e.check(&weak).passed);
    }

    #[test]
    fn test_self_fulfilled_uses_unit_floor() {
        let est = SalesEstimator::default();
        let e = engine(&est);
        let good = listing("A1", 2000, 5, Some(5000), FulfillmentMode::SelfFulfilled);
        let verdict = e.check(&good);
        assert!(verdict.passed);
        assert!(verdict.est_monthly_units >= 3);
        let weak = listing("A2", 2000, 5, Some(50_000_000), FulfillmentMode::SelfFulfilled);
        assert!(!e.check(&weak).passed);
    }

    #[test]
    fn test_batch_preserves_input_order() {
        let est = SalesEstimator::default();
        let e = engine(&est);
        let batch = vec![
            listing("A3", 2000, 5, Some(5000), FulfillmentMode::SelfFulfilled),
            listing("A1", 100, 5, Some(5000), FulfillmentMode::SelfFulfilled), // fails price
            listing("A2", 2000, 5, Some(5000), FulfillmentMode::SelfFulfilled),
        ];
        let survivors = e.filter(&batch);
        let ids: Vec<&str> = survivors.iter().map(|(l, _)| l.id.as_str()).collect();
        assert_eq!(ids, vec!["A3", "A2"]);
    }

    #[test]
    fn test_verdict_carries_estimates() {
        let est = SalesEstimator::default();
        let e = engine(&est);
        let l = listing("A1", 2000, 5, Some(5000), FulfillmentMode::PlatformFulfilled);
        let verdict = e.check(&l);
        assert_eq!(verdict.est_monthly_units, 252);
        assert_eq!(verdict.est_monthly_revenue, 252 * 2000);
    }
}
