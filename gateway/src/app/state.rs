//! Application state management

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::app::options::AppOptions;
use crate::errors::GatewayError;
use crate::fleet::FleetOrchestrator;
use crate::hub::mqtt::MqttHubTransport;
use crate::hub::ModuleChannel;
use crate::provision::identity::IdentityClient;
use crate::storage::StateStore;
use crate::telemetry::SysinfoProbe;

/// Main application state
pub struct AppState {
    /// Fleet orchestrator
    pub orchestrator: Arc<FleetOrchestrator>,

    /// Connected module channel, drained by the bus worker
    pub module_channel: Arc<dyn ModuleChannel>,
}

impl AppState {
    /// Initialize application state
    ///
    /// Builds the hub transport, the identity client, and the state store,
    /// then connects the module channel and announces the module.
    pub async fn init(
        options: &AppOptions,
        restart_tx: mpsc::Sender<String>,
    ) -> Result<Self, GatewayError> {
        info!("Initializing application state...");

        let connection_string = options.module_connection_string.clone().ok_or_else(|| {
            GatewayError::ConfigError("Module connection string is not configured".to_string())
        })?;

        options.layout.setup().await?;

        let transport = Arc::new(MqttHubTransport::new(options.hub.clone())?);
        let identity = Arc::new(IdentityClient::new()?);
        let store = Arc::new(StateStore::new(options.layout.state_dir()));
        let probe = Arc::new(SysinfoProbe);

        let orchestrator = FleetOrchestrator::new(
            options.fleet.clone(),
            transport,
            identity,
            store,
            probe,
            restart_tx,
        );

        let module_channel = orchestrator.connect_module(&connection_string).await?;

        Ok(Self {
            orchestrator,
            module_channel,
        })
    }
}
