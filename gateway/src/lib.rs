//! LensGate Library
//!
//! Core modules for the LensGate camera fleet gateway.

pub mod app;
pub mod device;
pub mod errors;
pub mod filesys;
pub mod fleet;
pub mod health;
pub mod hub;
pub mod logs;
pub mod pipeline;
pub mod provision;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod twin;
pub mod utils;
pub mod workers;
