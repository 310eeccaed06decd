//! HTTP control plane
//!
//! A small axum server exposing the fleet operations (create/delete camera,
//! push telemetry and inferences) plus health and version endpoints.

pub mod handlers;
pub mod serve;
pub mod state;

pub use serve::serve;
pub use state::ServerState;
