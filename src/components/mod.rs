//! Pluggable components.
//!
//! The evaluation pipeline stays component-agnostic. Adapters define the
//! learner and attribute-selection contracts; the registry maps candidate
//! names onto factories.

pub mod adapter;
pub mod builtins;
pub mod registry;
