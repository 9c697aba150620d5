//! Testing infrastructure
//!
//! Misbehaving components that drive the pipeline into timeouts, memory
//! exhaustion, failures and partial scoring.

pub mod components;
