//! Concurrent research pipeline.
//!
//! Runs every filtered listing through search, match and cost under a
//! bounded worker pool. Each listing walks a small state machine
//! (pending -> searching -> matching -> costing) and lands in exactly one
//! terminal state: done, skipped, or failed. A failure never takes down the
//! run, and output order always follows input order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::adapters::{CrossMarketSearch, ImageFetcher};
use crate::config::Config;
use crate::error::{ResearchError, Result};
use crate::models::{
    FailureEntry, Listing, ListingOutcome, ResearchRecord, ResearchReport,
};
use crate::research::control::{BackoffPolicy, SharedControl};
use crate::research::cost::CostEstimator;
use crate::research::filter::FilterVerdict;
use crate::research::matcher::PerceptualMatcher;

pub struct Orchestrator {
    ctx: Arc<WorkerContext>,
    pool_size: usize,
}

struct WorkerContext {
    searcher: Arc<dyn CrossMarketSearch>,
    fetcher: Arc<dyn ImageFetcher>,
    match_threshold: u32,
    max_candidates: usize,
    cost: CostEstimator,
    backoff: BackoffPolicy,
    max_retries: u32,
    control: Arc<SharedControl>,
}

impl Orchestrator {
    pub fn new(
        searcher: Arc<dyn CrossMarketSearch>,
        fetcher: Arc<dyn ImageFetcher>,
        config: &Config,
    ) -> Self {
        let runtime = &config.runtime;
        let control = SharedControl::new(
            runtime.worker_pool_size,
            Duration::from_secs_f64(runtime.request_delay_secs),
        );
        Self {
            ctx: Arc::new(WorkerContext {
                searcher,
                fetcher,
                match_threshold: config.matcher.threshold,
                max_candidates: config.matcher.max_candidates,
                cost: CostEstimator::new(config.cost.clone()),
                backoff: BackoffPolicy::new(runtime.backoff_base_ms, runtime.backoff_max_ms),
                max_retries: runtime.max_retries,
                control,
            }),
            pool_size: runtime.worker_pool_size.max(1),
        }
    }

    /// Run the pipeline over pre-filtered listings and assemble the report.
    ///
    /// Records come back in input order regardless of which worker finished
    /// first. Every input listing is accounted for in exactly one of
    /// `done`, `skipped`, or `failed`.
    pub async fn run(&self, query: &str, work: Vec<(Listing, FilterVerdict)>) -> ResearchReport {
        let total = work.len();
        info!(query, total, pool = self.pool_size, "research run starting");

        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut tasks: JoinSet<(usize, String, ListingOutcome)> = JoinSet::new();

        for (index, (listing, verdict)) in work.into_iter().enumerate() {
            let ctx = Arc::clone(&self.ctx);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => {
                        return (
                            index,
                            listing.id.clone(),
                            ListingOutcome::Failed {
                                error_kind: "internal".to_string(),
                            },
                        )
                    }
                };
                let id = listing.id.clone();
                let outcome = ctx.research_one(&listing, &verdict).await;
                (index, id, outcome)
            });
        }

        let mut finished: Vec<(usize, String, ListingOutcome)> = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => finished.push(entry),
                Err(e) => error!(error = %e, "worker task aborted"),
            }
        }
        finished.sort_by_key(|(index, _, _)| *index);

        let mut records = Vec::new();
        let mut failures = Vec::new();
        let (mut done, mut skipped, mut failed) = (0usize, 0usize, 0usize);
        for (_, listing_id, outcome) in finished {
            match outcome {
                ListingOutcome::Done { record } => {
                    done += 1;
                    records.push(record);
                }
                ListingOutcome::Skipped => skipped += 1,
                ListingOutcome::Failed { error_kind } => {
                    failed += 1;
                    failures.push(FailureEntry {
                        listing_id,
                        error_kind,
                    });
                }
            }
        }

        info!(done, skipped, failed, "research run finished");
        ResearchReport {
            query: query.to_string(),
            generated_at: chrono::Utc::now(),
            records,
            done,
            skipped,
            failed,
            failures,
        }
    }
}

impl WorkerContext {
    /// Take one listing through the full state machine, mapping any error
    /// to a `Failed` outcome so siblings are untouched.
    async fn research_one(&self, listing: &Listing, verdict: &FilterVerdict) -> ListingOutcome {
        match self.pipeline(listing, verdict).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.triggers_pause() {
                    self.trip_pause(e.kind());
                }
                error!(listing_id = %listing.id, error = %e, "listing failed");
                ListingOutcome::Failed {
                    error_kind: e.kind().to_string(),
                }
            }
        }
    }

    async fn pipeline(&self, listing: &Listing, verdict: &FilterVerdict) -> Result<ListingOutcome> {
        debug!(listing_id = %listing.id, stage = "searching", "stage transition");
        let candidates = match self
            .with_retry(&listing.id, "image_search", || {
                let searcher = Arc::clone(&self.searcher);
                let image_url = listing.image_url.clone();
                let limit = self.max_candidates;
                async move { searcher.search_by_image(&image_url, limit).await }
            })
            .await
        {
            Ok(candidates) => candidates,
            // No cross-market results for this image is a miss, not a fault.
            Err(ResearchError::NotFound) => Vec::new(),
            Err(e) => return Err(e),
        };

        debug!(
            listing_id = %listing.id,
            candidates = candidates.len(),
            stage = "matching",
            "stage transition"
        );
        // Reference-image fetches fail transiently too, so matching runs
        // under the same retry policy as the search call.
        let matched = self
            .with_retry(&listing.id, "image_match", || {
                let fetcher = Arc::clone(&self.fetcher);
                let threshold = self.match_threshold;
                let reference_url = listing.image_url.clone();
                let candidates = candidates.clone();
                async move {
                    let matcher = PerceptualMatcher::new(fetcher.as_ref(), threshold);
                    matcher.best_match(&reference_url, &candidates).await
                }
            })
            .await?;

        let Some(candidate) = matched.candidate.filter(|_| matched.is_matched) else {
            debug!(listing_id = %listing.id, "no visual match, skipping");
            return Ok(ListingOutcome::Skipped);
        };
        let distance = matched.distance.unwrap_or(0);

        debug!(listing_id = %listing.id, distance, stage = "costing", "stage transition");
        let cost = self.cost.calculate(
            listing.price,
            candidate.price_cny,
            listing.fulfillment,
            &listing.category,
            None,
        );

        Ok(ListingOutcome::Done {
            record: ResearchRecord {
                listing: listing.clone(),
                candidate,
                cost,
                match_distance: distance,
                est_monthly_units: verdict.est_monthly_units,
                est_monthly_revenue: verdict.est_monthly_revenue,
            },
        })
    }

    /// Retry transient failures with capped exponential backoff. Errors
    /// that signal rate limiting or an automation challenge are never
    /// retried here; they bubble up so the pool can pause. Once the pool
    /// pauses, in-flight retries are abandoned rather than resumed later.
    async fn with_retry<T, F, Fut>(&self, listing_id: &str, op: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            self.control.pause.wait_if_paused().await;
            self.control.limiter.acquire().await;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    if self.control.pause.is_paused() {
                        warn!(listing_id, op, "pool paused, abandoning retries");
                        return Err(e);
                    }
                    let delay = {
                        let mut rng = rand::thread_rng();
                        self.backoff.delay_with_jitter(attempt, &mut rng)
                    };
                    warn!(
                        listing_id,
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    if self.control.pause.is_paused() {
                        warn!(listing_id, op, "pool paused, abandoning retries");
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Raise the pool-wide pause and schedule an automatic resume after the
    /// cooldown. Resume is idempotent, so overlapping trips are harmless.
    fn trip_pause(&self, kind: &str) {
        self.control.pause.pause(kind);
        let control = Arc::clone(&self.control);
        let cooldown = Duration::from_millis(self.backoff.max_ms);
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            control.pause.resume();
        });
    }
}
