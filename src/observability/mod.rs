//! Observability
//!
//! Structured evaluation events and metrics for the search driver.

pub mod audit;
pub mod metrics;
