//! Configuration and shared types
//!
//! Config loading, validation, property strings and the closed result taxonomy.

pub mod config;
pub mod properties;
pub mod types;
pub mod validator;
