//! Background workers
//!
//! Long-running tasks spawned by the app runner: the bus worker drains hub
//! events into the orchestrator and the health worker drives periodic checks.

pub mod bus;
pub mod health;
