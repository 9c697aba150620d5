//! Out-of-process execution
//!
//! Command construction, child teardown guard, and the isolation boundary
//! that turns a child run into a score and a time.

pub mod boundary;
pub mod command;
pub mod guard;
