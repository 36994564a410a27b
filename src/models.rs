//! Domain records shared across the research pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who handles storage and shipping for a source-marketplace listing.
///
/// Affects which fee table and which volume threshold apply downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentMode {
    /// The marketplace platform stores and ships (FBA-style).
    PlatformFulfilled,
    /// The seller ships directly (FBM-style).
    SelfFulfilled,
}

impl FulfillmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentMode::PlatformFulfilled => "platform_fulfilled",
            FulfillmentMode::SelfFulfilled => "self_fulfilled",
        }
    }
}

/// A normalized source-marketplace listing. Immutable once built by the
/// collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    /// Price in source currency (JPY), always non-negative.
    pub price: u64,
    pub image_url: String,
    pub category: String,
    /// Within-category sales rank; `None` means the marketplace exposed no
    /// rank for this listing ("unrankable").
    pub rank: Option<u64>,
    pub review_count: u64,
    pub fulfillment: FulfillmentMode,
    pub url: String,
}

/// A candidate listing from the target marketplace, produced by one
/// search-by-image call. Ephemeral: owned by the matching step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateListing {
    /// Price in target currency (CNY).
    pub price_cny: f64,
    pub image_url: String,
    pub url: String,
    #[serde(default)]
    pub shop_name: Option<String>,
    #[serde(default)]
    pub min_order: Option<u32>,
}

/// Outcome of matching one listing against its candidates.
///
/// Invariant: `is_matched` equals `distance <= threshold` whenever a
/// candidate was selected; with no usable candidates both `candidate` and
/// `distance` are `None` and `is_matched` is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub candidate: Option<CandidateListing>,
    pub distance: Option<u32>,
    pub is_matched: bool,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            candidate: None,
            distance: None,
            is_matched: false,
        }
    }
}

/// Landed-cost breakdown for one matched pair. All monetary fields are
/// integer JPY.
///
/// Invariants: `total_cost` is the exact sum of the five cost components,
/// `profit = source_price - total_cost`, and `is_profitable = profit > 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub source_price: u64,
    /// Target price converted into source currency.
    pub converted_cost: u64,
    pub shipping: u64,
    pub customs: u64,
    pub referral_fee: u64,
    pub fulfillment_fee: u64,
    pub total_cost: u64,
    pub profit: i64,
    pub profit_rate: f64,
    pub is_profitable: bool,
}

/// One finished research result: a listing that passed the filter and
/// matched a target-marketplace candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRecord {
    pub listing: Listing,
    pub candidate: CandidateListing,
    pub cost: CostBreakdown,
    pub match_distance: u32,
    pub est_monthly_units: u64,
    pub est_monthly_revenue: u64,
}

/// Terminal pipeline state for one listing, reported in the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ListingOutcome {
    Done { record: ResearchRecord },
    Skipped,
    Failed { error_kind: String },
}

/// Aggregate output of one research run. Records are ordered by original
/// collector order regardless of worker completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub query: String,
    pub generated_at: DateTime<Utc>,
    pub records: Vec<ResearchRecord>,
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Listing id and last error kind for every failed item.
    pub failures: Vec<FailureEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEntry {
    pub listing_id: String,
    pub error_kind: String,
}
