//! Utilities
//!
//! Child output protocol: log-line classification and result-line parsing.

pub mod output;
