//! evalbox: resource-bounded evaluation of untrusted learning components
//!
//! Candidates found by a configuration search may loop forever, exhaust
//! memory or crash. evalbox runs each one under a CPU-time budget and,
//! when asked, inside a child process, and always reports a score and a time.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::cputime`]: Process CPU clock and wall clock
//! - [`kernel::rlimit`]: Address-space ceiling for the child
//! - [`kernel::signal`]: Child teardown on signals and at exit
//!
//! ## Supervision ([`core`])
//! - [`core::supervisor`]: Budgeted worker threads with interrupt then abandon
//! - [`core::types`]: Budgets, cancel tokens, work units and outcomes
//!
//! ## Process Isolation ([`exec`])
//! - [`exec::command`]: Wrapper command line construction
//! - [`exec::guard`]: Kill-on-drop child guard
//! - [`exec::boundary`]: Spawn, watch output, parse the result line
//!
//! ## Evaluation Pipeline ([`pipeline`])
//! - [`pipeline::candidate`]: Candidate argument decoding
//! - [`pipeline::dataset`]: Dataset strings, CSV and synthetic data
//! - [`pipeline::metric`]: Result metrics and score sanitizing
//! - [`pipeline::evaluator`]: Selection, training and scoring phases
//! - [`pipeline::run`]: Outer supervised evaluation run
//!
//! ## Components ([`components`])
//! - [`components::adapter`]: Learner and attribute-selection traits
//! - [`components::registry`]: Name to factory lookup
//! - [`components::builtins`]: Bundled learners and rankers
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::verdict`]: Phase outcome classification
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured evaluation events
//! - [`observability::metrics`]: Prometheus metrics export
//!
//! ## Configuration ([`config`])
//! - [`config::config`]: Configuration loading
//! - [`config::validator`]: Range and consistency checks
//! - [`config::properties`]: `key=value:key=value` property strings
//! - [`config::types`]: Shared types and the closed status taxonomy
//!
//! # Design Principles
//!
//! 1. **Every run gets an answer** - Worst score and elapsed time beat a hang
//! 2. **Cooperate first** - Interrupt at the budget, abandon only past the hard limit
//! 3. **CPU time is the budget** - Wall clock only where sleeping must count
//! 4. **Minimal unsafe** - Thin wrappers with explicit preconditions

// Kernel Primitives
pub mod kernel;

// Process Isolation
pub mod exec;

// Supervision core
pub mod core;

// Evaluation Pipeline
pub mod pipeline;

// Learners and attribute selection
pub mod components;

// Verdict
pub mod verdict;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// Misbehaving components for tests and demos
pub mod testing;

// Child process entry point
pub mod wrapper;

// CLI entrypoint wiring
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
