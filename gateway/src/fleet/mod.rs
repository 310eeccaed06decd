//! Fleet orchestration.
//!
//! The gateway runs as a single hub module identity and manages a fleet of
//! camera device identities behind it. This module owns the module-side wire
//! vocabulary, the device registry, the inbound message router, and the
//! orchestrator that ties provisioning, proxies, and the pipeline module
//! together.

pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod settings;

pub use orchestrator::{FleetOrchestrator, ProvisionResult};
pub use registry::DeviceRegistry;

/// Module twin settings (writable properties)
pub mod keys {
    pub const IDENTITY_SERVICE_HOST: &str = "wpIdentityServiceHost";
    pub const IDENTITY_SERVICE_API_TOKEN: &str = "wpIdentityServiceApiToken";
    pub const MASTER_PROVISION_KEY: &str = "wpMasterProvisionKey";
    pub const SCOPE_ID: &str = "wpScopeId";
    pub const GATEWAY_INSTANCE_ID: &str = "wpGatewayInstanceId";
    pub const GATEWAY_MODULE_ID: &str = "wpGatewayModuleId";
    pub const PIPELINE_MODULE_ID: &str = "wpPipelineModuleId";
    pub const DEBUG_TELEMETRY: &str = "wpDebugTelemetry";
    pub const DEBUG_ROUTED_MESSAGE: &str = "wpDebugRoutedMessage";
}

/// Module telemetry names
pub mod telemetry {
    pub use crate::device::telemetry::SYSTEM_HEARTBEAT;

    pub const FREE_MEMORY: &str = "tlFreeMemory";
    pub const CONNECTED_CAMERAS: &str = "tlConnectedCameras";
}

/// Module event names
pub mod events {
    pub const CREATE_CAMERA: &str = "evCreateCamera";
    pub const DELETE_CAMERA: &str = "evDeleteCamera";
    pub const MODULE_STARTED: &str = "evModuleStarted";
    pub const MODULE_STOPPED: &str = "evModuleStopped";
    pub const MODULE_RESTART: &str = "evModuleRestart";
}

/// Module state names and values
pub mod states {
    pub use crate::device::states::{ACTIVE, CONNECTED, DISCONNECTED, HUB_CLIENT_STATE, INACTIVE};

    pub const MODULE_STATE: &str = "stModuleState";
}

/// Module direct method names
pub mod commands {
    pub const ADD_CAMERA: &str = "cmAddCamera";
    pub const DELETE_CAMERA: &str = "cmDeleteCamera";
    pub const RESTART_GATEWAY: &str = "cmRestartGateway";
}

/// Module reported identity properties
pub mod props {
    pub const OS_NAME: &str = "rpOsName";
    pub const PROCESSOR_ARCHITECTURE: &str = "rpProcessorArchitecture";
    pub const TOTAL_MEMORY: &str = "rpTotalMemory";
    pub const SW_VERSION: &str = "rpSwVersion";
}

/// Named module inputs fed by edge bus routes
pub mod inputs {
    pub const CAMERA_COMMANDS: &str = "camera-commands";
    pub const PIPELINE_TELEMETRY: &str = "pipeline-telemetry";
    pub const PIPELINE_OPERATIONAL: &str = "pipeline-operational";
    pub const PIPELINE_DIAGNOSTICS: &str = "pipeline-diagnostics";
}
