//! Server state

use std::sync::Arc;

use crate::fleet::FleetOrchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<FleetOrchestrator>,
}

impl ServerState {
    pub fn new(orchestrator: Arc<FleetOrchestrator>) -> Self {
        Self { orchestrator }
    }
}
