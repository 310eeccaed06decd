//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::fleet::orchestrator::FleetOptions;
use crate::hub::mqtt;
use crate::storage::layout::StorageLayout;
use crate::workers::health;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Connection string for the module hub channel
    pub module_connection_string: Option<SecretString>,

    /// Enable the local HTTP server
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Fleet orchestrator options
    pub fleet: FleetOptions,

    /// MQTT hub transport options
    pub hub: mqtt::Options,

    /// Health worker options
    pub health_worker: health::Options,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            module_connection_string: None,
            enable_server: true,
            server: ServerOptions::default(),
            fleet: FleetOptions::default(),
            hub: mqtt::Options::default(),
            health_worker: health::Options::default(),
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9014,
        }
    }
}
