//! Bounded evaluation pipeline
//!
//! Candidate decoding, datasets, metrics, the phase sequencer, and the outer
//! evaluation run that wraps it.

pub mod candidate;
pub mod dataset;
pub mod evaluator;
pub mod metric;
pub mod run;
