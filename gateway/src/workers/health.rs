//! Health worker for periodic gateway checks

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::fleet::FleetOrchestrator;

/// Health worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Interval between checks
    pub check_interval: Duration,

    /// Initial delay before the first check
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(15),
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Run the health worker
pub async fn run<S, F>(
    options: &Options,
    orchestrator: Arc<FleetOrchestrator>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Health worker starting...");

    // Initial delay
    sleep_fn(options.initial_delay).await;

    loop {
        // Check for shutdown
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health worker shutting down...");
                return;
            }
            _ = sleep_fn(options.check_interval) => {
                // Continue with the check
            }
        }

        let state = orchestrator.check_health().await;
        debug!("Health check complete: {}", state.name());
    }
}
