//! SourceScout Backend Library
//!
//! Cross-marketplace resale research: collect listings from a source
//! marketplace, find visually identical supply on a target marketplace,
//! and score each pair for landed-cost profitability.
//!
//! Exposes all pipeline modules for use by the binary and integration tests.

pub mod adapters;
pub mod config;
pub mod error;
pub mod models;
pub mod output;
pub mod research;
