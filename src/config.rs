//! Runtime configuration.
//!
//! Loaded from a TOML file; every section falls back to defaults so a
//! partial (or absent) config file still yields a usable setup.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Category key used when a lookup table has no entry for a category.
pub const DEFAULT_CATEGORY: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub filter: FilterConfig,
    pub matcher: MatcherConfig,
    pub estimator: EstimatorConfig,
    pub cost: CostRates,
    pub runtime: RuntimeConfig,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Load configuration from a TOML file. A missing file is not an error:
    /// defaults apply, matching how operators run ad-hoc scans.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

/// Commercial screening thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Price floor in JPY.
    pub min_price: u64,
    /// Review-count ceiling; heavily reviewed listings are entrenched.
    pub max_reviews: u64,
    /// Platform-fulfilled: minimum estimated monthly revenue in JPY.
    pub min_monthly_revenue_platform: u64,
    /// Self-fulfilled: minimum estimated monthly units.
    pub min_monthly_units_self: u64,
    /// Categories never worth researching (regulated, oversize, etc.).
    pub excluded_categories: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_price: 1500,
            max_reviews: 50,
            min_monthly_revenue_platform: 20_000,
            min_monthly_units_self: 3,
            excluded_categories: Vec::new(),
        }
    }
}

/// Perceptual matching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum Hamming distance still considered the same product.
    pub threshold: u32,
    /// Cap on candidates requested per search-by-image call.
    pub max_candidates: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            max_candidates: 10,
        }
    }
}

/// Power-law coefficients for one category: daily velocity `a * rank^-b`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CategoryCoefficients {
    pub a: f64,
    pub b: f64,
}

/// Rank-to-volume estimation tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Per-category coefficients; must contain a `default` entry.
    pub coefficients: HashMap<String, CategoryCoefficients>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        let mut coefficients = HashMap::new();
        coefficients.insert("home_kitchen".to_string(), CategoryCoefficients { a: 5000.0, b: 0.75 });
        coefficients.insert("toys".to_string(), CategoryCoefficients { a: 3500.0, b: 0.80 });
        coefficients.insert("beauty".to_string(), CategoryCoefficients { a: 8000.0, b: 0.70 });
        coefficients.insert("electronics".to_string(), CategoryCoefficients { a: 2500.0, b: 0.85 });
        coefficients.insert(DEFAULT_CATEGORY.to_string(), CategoryCoefficients { a: 4000.0, b: 0.78 });
        Self { coefficients }
    }
}

/// How a source price sitting exactly on a tier's upper bound resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierBoundary {
    /// Lowest tier whose upper bound is >= price (default).
    InclusiveUpper,
    /// Lowest tier whose upper bound is > price.
    ExclusiveUpper,
}

/// One fulfillment-fee tier: flat fee for prices up to `up_to` JPY.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeTier {
    pub up_to: u64,
    pub fee: u64,
}

/// Rate tables for the landed-cost calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostRates {
    /// JPY per CNY.
    pub exchange_rate: f64,
    /// International shipping in JPY per kg.
    pub shipping_per_kg: f64,
    /// Assumed weight when a listing reports none.
    pub default_weight_kg: f64,
    /// Customs duty rate applied above the threshold.
    pub customs_rate: f64,
    /// Customs-free allowance on converted cost + shipping, JPY.
    pub customs_threshold: u64,
    /// Referral-fee rate per category; must contain a `default` entry.
    pub referral_rates: HashMap<String, f64>,
    /// Ordered fulfillment-fee tiers, ascending by `up_to`.
    pub fee_tiers: Vec<FeeTier>,
    /// Fee for prices above every tier.
    pub top_fee: u64,
    pub tier_boundary: TierBoundary,
}

impl Default for CostRates {
    fn default() -> Self {
        let mut referral_rates = HashMap::new();
        referral_rates.insert("toys".to_string(), 0.10);
        referral_rates.insert("electronics".to_string(), 0.08);
        referral_rates.insert("beauty".to_string(), 0.10);
        referral_rates.insert("home_kitchen".to_string(), 0.15);
        referral_rates.insert(DEFAULT_CATEGORY.to_string(), 0.15);
        Self {
            exchange_rate: 21.5,
            shipping_per_kg: 1300.0,
            default_weight_kg: 0.5,
            customs_rate: 0.10,
            customs_threshold: 10_000,
            referral_rates,
            fee_tiers: vec![
                FeeTier { up_to: 1000, fee: 290 },
                FeeTier { up_to: 2000, fee: 420 },
            ],
            top_fee: 530,
            tier_boundary: TierBoundary::InclusiveUpper,
        }
    }
}

/// Worker pool and retry knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub worker_pool_size: usize,
    pub max_retries: u32,
    /// Minimum spacing between upstream requests, seconds.
    pub request_delay_secs: f64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            max_retries: 3,
            request_delay_secs: 2.0,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Research gateway endpoints (the external collaborator that owns browser
/// navigation and HTML extraction).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8700/v1".to_string(),
            timeout_secs: 30,
            api_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_have_fallback_entries() {
        let config = Config::default();
        assert!(config.estimator.coefficients.contains_key(DEFAULT_CATEGORY));
        assert!(config.cost.referral_rates.contains_key(DEFAULT_CATEGORY));
        assert_eq!(config.cost.tier_boundary, TierBoundary::InclusiveUpper);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/sourcescout.toml"))).unwrap();
        assert_eq!(config.runtime.worker_pool_size, 4);
    }

    #[test]
    fn test_partial_toml_overrides_one_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[filter]
min_price = 2500

[runtime]
worker_pool_size = 8

[cost]
tier_boundary = "exclusive_upper"
"#
        )
        .unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.filter.min_price, 2500);
        // Untouched fields keep defaults.
        assert_eq!(config.filter.max_reviews, 50);
        assert_eq!(config.runtime.worker_pool_size, 8);
        assert_eq!(config.cost.tier_boundary, TierBoundary::ExclusiveUpper);
        assert_eq!(config.matcher.threshold, 10);
    }

    #[test]
    fn test_fee_tiers_parse_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[cost]
fee_tiers = [ {{ up_to = 1000, fee = 290 }}, {{ up_to = 2000, fee = 420 }}, {{ up_to = 5000, fee = 480 }} ]
top_fee = 600
"#
        )
        .unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.cost.fee_tiers.len(), 3);
        assert_eq!(config.cost.fee_tiers[2].fee, 480);
        assert_eq!(config.cost.top_fee, 600);
    }
}
