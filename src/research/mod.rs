//! Core research pipeline: collect, screen, match, cost, orchestrate.

pub mod collector;
pub mod control;
pub mod cost;
pub mod estimator;
pub mod filter;
pub mod matcher;
pub mod orchestrator;
