//! Error taxonomy for the research pipeline.
//!
//! Classification drives control flow: transport errors are retried,
//! rate-limit signals pause the whole pool, validation and image failures
//! drop the offending record only.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ResearchError {
    /// Network or timeout failure talking to an adapter. Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Listing or resource no longer exists. Skipped, never retried.
    #[error("not found")]
    NotFound,

    /// Upstream returned HTTP 429 or equivalent. Pauses the worker pool.
    #[error("rate limited")]
    RateLimited,

    /// Upstream served an anti-automation challenge. Pauses the worker pool.
    #[error("automation detected")]
    AutomationDetected,

    /// Malformed record from an adapter. The record is dropped and logged.
    #[error("validation error: {0}")]
    Validation(String),

    /// Candidate image could not be decoded. The candidate is excluded.
    #[error("image decode error: {0}")]
    ImageDecode(String),
}

impl ResearchError {
    /// Whether a bounded retry loop should re-attempt the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResearchError::Transport(_))
    }

    /// Whether this error must pause all workers rather than fail one item.
    pub fn triggers_pause(&self) -> bool {
        matches!(
            self,
            ResearchError::RateLimited | ResearchError::AutomationDetected
        )
    }

    /// Short stable name for reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ResearchError::Transport(_) => "transport",
            ResearchError::NotFound => "not_found",
            ResearchError::RateLimited => "rate_limited",
            ResearchError::AutomationDetected => "automation_detected",
            ResearchError::Validation(_) => "validation",
            ResearchError::ImageDecode(_) => "image_decode",
        }
    }
}

pub type Result<T> = std::result::Result<T, ResearchError>;
