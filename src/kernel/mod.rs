//! Thin wrappers around kernel primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.

pub mod cputime;
pub mod rlimit;
pub mod signal;
