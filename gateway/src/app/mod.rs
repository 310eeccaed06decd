//! Application wiring
//!
//! Options, shared state, and the run loop that spawns the workers and the
//! HTTP server and drives ordered shutdown.

pub mod options;
pub mod run;
pub mod state;
