//! Adapter seams for the external collaborators.
//!
//! The pipeline only ever sees these traits; the HTTP gateway clients in
//! [`gateway`] implement them for production, and tests plug in mocks.

pub mod gateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::CandidateListing;

/// Raw listing summary as returned by a paginated search, before
/// normalization. Numeric fields stay signed/stringly here; the collector
/// owns coercion and validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSummary {
    pub id: String,
    pub title: String,
}

/// Raw detail record for one listing id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetail {
    pub id: String,
    pub title: String,
    /// Signed on the wire; negative values are validation errors.
    pub price: i64,
    pub image_url: String,
    pub category: String,
    /// Zero or absent means the marketplace exposed no rank.
    #[serde(default)]
    pub rank: Option<i64>,
    pub review_count: i64,
    /// `true` when the platform fulfills the listing.
    pub platform_fulfilled: bool,
    pub url: String,
}

/// Source-marketplace search and detail lookup.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// One page of search results. Fails with `NotFound` when the query has
    /// no results at all, `Transport` on network failure. An empty vec on a
    /// later page simply ends pagination.
    async fn search(&self, query: &str, page: u32) -> Result<Vec<RawSummary>>;

    /// Enriched detail for one listing. `NotFound` if it no longer exists.
    async fn detail(&self, id: &str) -> Result<RawDetail>;
}

/// Target-marketplace reverse image search.
#[async_trait]
pub trait CrossMarketSearch: Send + Sync {
    /// Candidates visually similar to the referenced image, bounded by
    /// `max_results`. Fails with `Transport` or `RateLimited`.
    async fn search_by_image(
        &self,
        image_url: &str,
        max_results: usize,
    ) -> Result<Vec<CandidateListing>>;
}

/// Fetches raw image bytes for fingerprinting.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}
