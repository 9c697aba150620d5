//! In-process supervision core.
//!
//! Core owns the worker-thread model and the escalation from cooperative
//! interrupt to abandoning a worker. What the work does lives in
//! `pipeline` and `components`.

pub mod supervisor;
pub mod types;
