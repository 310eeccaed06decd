//! Bus worker draining hub events from the module channel

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::info;

use crate::fleet::FleetOrchestrator;
use crate::hub::ModuleChannel;

/// Run the bus worker
///
/// Feeds desired-property patches, direct methods, routed messages, and
/// connection errors from the module channel into the orchestrator. Exits
/// when the channel closes or the shutdown signal fires.
pub async fn run(
    channel: Arc<dyn ModuleChannel>,
    orchestrator: Arc<FleetOrchestrator>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Bus worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Bus worker shutting down...");
                return;
            }
            event = channel.recv() => {
                match event {
                    Some(event) => orchestrator.clone().handle_event(event).await,
                    None => {
                        info!("Module channel closed, bus worker exiting");
                        return;
                    }
                }
            }
        }
    }
}
