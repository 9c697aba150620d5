//! Outcome classification
//!
//! Derives phase verdicts as pure functions over supervisor outcomes and
//! error cause chains.

pub mod verdict;
