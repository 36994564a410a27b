//! Listing collection and normalization.
//!
//! Drives the listing source across pages, then resolves each summary's
//! detail record and normalizes it into a [`Listing`]. Every call re-issues
//! all network calls; nothing is cached here.

use tracing::{debug, info, warn};

use crate::adapters::{ListingSource, RawDetail};
use crate::error::{ResearchError, Result};
use crate::models::{FulfillmentMode, Listing};

pub struct Collector<'a, S: ListingSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: ListingSource + ?Sized> Collector<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Collect and normalize up to `max_pages` of search results.
    ///
    /// Pagination stops early on an empty page. A query with no results at
    /// all (`NotFound` on page 1) yields an empty vec rather than an error.
    /// Summaries whose detail record is gone, malformed, or unfetchable are
    /// dropped with a warning; the rest of the batch continues.
    pub async fn collect(&self, query: &str, max_pages: u32) -> Result<Vec<Listing>> {
        let mut summaries = Vec::new();
        for page in 1..=max_pages {
            let batch = match self.source.search(query, page).await {
                Ok(batch) => batch,
                Err(ResearchError::NotFound) if page == 1 => {
                    info!(query, "no results for query");
                    return Ok(Vec::new());
                }
                Err(ResearchError::NotFound) => break,
                Err(e) => return Err(e),
            };
            if batch.is_empty() {
                debug!(page, "empty page, stopping pagination");
                break;
            }
            debug!(page, count = batch.len(), "collected search page");
            summaries.extend(batch);
        }

        let mut listings = Vec::with_capacity(summaries.len());
        for summary in &summaries {
            match self.source.detail(&summary.id).await {
                Ok(detail) => match normalize(detail) {
                    Ok(listing) => listings.push(listing),
                    Err(e) => {
                        warn!(listing_id = %summary.id, error = %e, "dropping malformed record");
                    }
                },
                Err(ResearchError::NotFound) => {
                    warn!(listing_id = %summary.id, "listing vanished, skipping");
                }
                // One listing's fetch failure never takes down the batch.
                // Rate-limit signals still stop collection outright.
                Err(e) if !e.triggers_pause() => {
                    warn!(listing_id = %summary.id, error = %e, "detail fetch failed, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            query,
            found = summaries.len(),
            normalized = listings.len(),
            "collection finished"
        );
        Ok(listings)
    }
}

/// Coerce a raw detail record into a [`Listing`].
///
/// Negative price or review count is a validation error (the record is
/// rejected). A missing, zero or negative rank becomes `None`: the listing
/// stays eligible for price/review screening but fails any volume check.
pub fn normalize(detail: RawDetail) -> Result<Listing> {
    if detail.price < 0 {
        return Err(ResearchError::Validation(format!(
            "negative or unparseable price {} for listing {}",
            detail.price, detail.id
        )));
    }
    if detail.review_count < 0 {
        return Err(ResearchError::Validation(format!(
            "negative review count {} for listing {}",
            detail.review_count, detail.id
        )));
    }
    if detail.title.trim().is_empty() {
        return Err(ResearchError::Validation(format!(
            "empty title for listing {}",
            detail.id
        )));
    }

    let fulfillment = if detail.platform_fulfilled {
        FulfillmentMode::PlatformFulfilled
    } else {
        FulfillmentMode::SelfFulfilled
    };

    Ok(Listing {
        id: detail.id,
        title: detail.title,
        price: detail.price as u64,
        image_url: detail.image_url,
        category: detail.category,
        rank: detail.rank.filter(|r| *r > 0).map(|r| r as u64),
        review_count: detail.review_count as u64,
        fulfillment,
        url: detail.url,
    })
}
