//! Fleet orchestrator.
//!
//! Owns the module hub channel, the module settings table, and the device
//! registry. Every way a camera enters or leaves the fleet (HTTP, module
//! direct method, bus command, recovery scan) funnels through
//! [`FleetOrchestrator::create_camera`] and
//! [`FleetOrchestrator::delete_camera`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::device::{self, build_camera_device, CameraInfo, DetectionType, DeviceContext};
use crate::errors::GatewayError;
use crate::filesys::dir::Dir;
use crate::fleet::registry::DeviceRegistry;
use crate::fleet::router::{
    camera_commands, camera_id_from_subject, CameraCommand, DeleteCommandData,
    InferencesCommandData, TelemetryCommandData, SUBJECT_PROPERTY,
};
use crate::fleet::settings::{module_settings, ProvisioningSettings};
use crate::fleet::{commands, events, inputs, keys, props, states, telemetry};
use crate::health::HealthState;
use crate::hub::{HubEvent, HubTransport, MethodInvocation, ModuleChannel, RoutedMessage};
use crate::pipeline::graph::PipelineGraph;
use crate::pipeline::PipelineModuleRpc;
use crate::provision::identity::IdentityApi;
use crate::provision::{self, ProvisionRequest};
use crate::storage::StateStore;
use crate::telemetry::SystemProbe;
use crate::twin::reconcile::SettingsTable;
use crate::utils;

/// State-store scope holding module state
const STATE_SCOPE: &str = "state";

/// Dotted path of the stashed hub identity properties
const HUB_PROPERTIES_PATH: &str = "hub.properties";

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct FleetOptions {
    /// Directory holding the graph template documents
    pub content_dir: PathBuf,

    /// How long a camera connect waits for its first settings pass
    pub first_sync_timeout: Duration,

    /// Consecutive non-Good health ticks before a restart is triggered
    pub health_check_retries: u32,

    /// Grace period between the restart events and the restart signal
    pub restart_grace: Duration,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("content"),
            first_sync_timeout: Duration::from_secs(60),
            health_check_retries: 3,
            restart_grace: Duration::from_secs(10),
        }
    }
}

/// Outcome of onboarding one camera.
///
/// Creation has two failure stages: provisioning (nothing to clean up) and
/// connection (the cloud identity exists but the proxy never came up). The
/// flags record which stage was reached.
#[derive(Debug)]
pub struct ProvisionResult {
    pub provisioned: bool,
    pub provision_message: String,
    pub connection_string: Option<SecretString>,
    pub connected: bool,
    pub connection_message: String,
}

impl ProvisionResult {
    fn config_error(message: String) -> Self {
        Self {
            provisioned: false,
            provision_message: message,
            connection_string: None,
            connected: false,
            connection_message: String::new(),
        }
    }

    /// The message for the stage that failed (or the connect message when
    /// everything succeeded).
    pub fn message(&self) -> &str {
        if self.provisioned {
            &self.connection_message
        } else {
            &self.provision_message
        }
    }
}

pub struct FleetOrchestrator {
    options: FleetOptions,
    content_dir: Dir,
    transport: Arc<dyn HubTransport>,
    identity: Arc<dyn IdentityApi>,
    store: Arc<StateStore>,
    probe: Arc<dyn SystemProbe>,
    rpc: Arc<PipelineModuleRpc>,
    registry: DeviceRegistry,
    module_channel: RwLock<Option<Arc<dyn ModuleChannel>>>,
    module_settings: Mutex<SettingsTable>,
    health_state: AtomicU8,
    failure_streak: AtomicU32,
    transport_error: AtomicBool,
    restart_requested: AtomicBool,
    restart_tx: mpsc::Sender<String>,
    first_sync: watch::Sender<bool>,
}

impl FleetOrchestrator {
    pub fn new(
        options: FleetOptions,
        transport: Arc<dyn HubTransport>,
        identity: Arc<dyn IdentityApi>,
        store: Arc<StateStore>,
        probe: Arc<dyn SystemProbe>,
        restart_tx: mpsc::Sender<String>,
    ) -> Arc<Self> {
        let (first_sync, _) = watch::channel(false);
        Arc::new(Self {
            content_dir: Dir::new(options.content_dir.clone()),
            options,
            transport,
            identity,
            store,
            probe,
            rpc: Arc::new(PipelineModuleRpc::new()),
            registry: DeviceRegistry::new(),
            module_channel: RwLock::new(None),
            module_settings: Mutex::new(module_settings()),
            health_state: AtomicU8::new(HealthState::Good.value()),
            failure_streak: AtomicU32::new(0),
            transport_error: AtomicBool::new(false),
            restart_requested: AtomicBool::new(false),
            restart_tx,
            first_sync,
        })
    }

    /// Aggregate gateway health as of the last tick.
    pub fn health_state(&self) -> HealthState {
        HealthState::from_value(self.health_state.load(Ordering::SeqCst))
    }

    pub async fn camera_count(&self) -> usize {
        self.registry.count().await
    }

    pub async fn camera_ids(&self) -> Vec<String> {
        self.registry.camera_ids().await
    }

    /// Open the module hub channel and announce the module.
    ///
    /// Returns the channel so the caller can drive its event loop.
    pub async fn connect_module(
        &self,
        connection_string: &SecretString,
    ) -> Result<Arc<dyn ModuleChannel>, GatewayError> {
        let channel = self
            .transport
            .connect_module(connection_string.expose_secret())
            .await?;
        *self.module_channel.write().await = Some(channel.clone());
        self.rpc.set_channel(channel.clone()).await;

        self.report_module_identity().await;

        self.send_module_measurement(json!({ (states::HUB_CLIENT_STATE): states::CONNECTED }))
            .await;
        self.send_module_measurement(json!({ (states::MODULE_STATE): states::ACTIVE }))
            .await;
        self.send_module_measurement(json!({ (events::MODULE_STARTED): "Module started" }))
            .await;

        info!("Module channel connected");
        Ok(channel)
    }

    /// Block until the first module settings pass has been applied.
    pub async fn await_first_sync(&self, timeout: Duration) -> Result<(), GatewayError> {
        let mut synced = self.first_sync.subscribe();
        let result = match tokio::time::timeout(timeout, synced.wait_for(|seen| *seen)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(GatewayError::HubError(
                "Settings watch closed".to_string(),
            )),
            Err(_) => Err(GatewayError::HubError(
                "Timed out waiting for the module settings sync".to_string(),
            )),
        };
        result
    }

    /// Dispatch one inbound module event. Driven by the bus worker loop.
    pub async fn handle_event(self: Arc<Self>, event: HubEvent) {
        match event {
            HubEvent::DesiredProperties(patch) => {
                let first = self.handle_module_desired(patch).await;
                if first {
                    let orchestrator = self.clone();
                    tokio::spawn(async move {
                        orchestrator.recovery_scan().await;
                    });
                }
            }
            HubEvent::DirectMethod(invocation) => {
                self.handle_module_method(invocation).await;
            }
            HubEvent::InputMessage(message) => {
                self.route_message(message).await;
            }
            HubEvent::ConnectionError(message) => {
                error!("Module channel error: {}", message);
                self.transport_error.store(true, Ordering::SeqCst);
                self.health_state
                    .store(HealthState::Critical.value(), Ordering::SeqCst);
            }
        }
    }

    /// Onboard one camera end to end.
    pub async fn create_camera(&self, info: CameraInfo) -> ProvisionResult {
        info!(
            "Creating camera {} ({} detector)",
            info.camera_id, info.detection_type
        );

        if let Err(e) = info.validate() {
            return ProvisionResult::config_error(e.to_string());
        }

        let provisioning = {
            let settings = self.module_settings.lock().await;
            ProvisioningSettings::from_table(&settings)
        };
        let provisioning = match provisioning {
            Ok(provisioning) => provisioning,
            Err(e) => return ProvisionResult::config_error(e.to_string()),
        };

        if let Err(e) = self.registry.reserve(&info.camera_id).await {
            return ProvisionResult::config_error(e.to_string());
        }

        let graph = match PipelineGraph::load(
            &self.content_dir,
            info.detection_type.template_stem(),
            &info.camera_id,
        )
        .await
        {
            Ok(graph) => graph,
            Err(e) => {
                self.registry.abort(&info.camera_id).await;
                return ProvisionResult::config_error(format!("Graph templates: {}", e));
            }
        };

        let request = ProvisionRequest {
            identity_host: &provisioning.identity_host,
            scope_id: &provisioning.scope_id,
            master_key: &provisioning.master_key,
            camera_id: &info.camera_id,
            model_id: info.detection_type.model_id(),
            gateway_instance_id: &provisioning.gateway_instance_id,
            gateway_module_id: &provisioning.gateway_module_id,
        };
        let identity = match provision::provision_camera(self.identity.as_ref(), &request).await {
            Ok(identity) => identity,
            Err(e) => {
                self.registry.abort(&info.camera_id).await;
                warn!("Provisioning camera {} failed: {}", info.camera_id, e);
                return ProvisionResult {
                    provisioned: false,
                    provision_message: e.to_string(),
                    connection_string: None,
                    connected: false,
                    connection_message: String::new(),
                };
            }
        };

        let context = DeviceContext {
            transport: self.transport.clone(),
            rpc: self.rpc.clone(),
            scope_id: provisioning.scope_id.clone(),
            gateway_instance_id: provisioning.gateway_instance_id.clone(),
            first_sync_timeout: self.options.first_sync_timeout,
        };
        let device = build_camera_device(context, info.clone(), graph);

        let connect = device.client().connect(&identity.connection_string).await;
        if !connect.connected {
            self.registry.abort(&info.camera_id).await;
            // The cloud identity stays behind; the recovery scan picks the
            // camera up on the next start.
            warn!(
                "Camera {} provisioned but failed to connect: {}",
                info.camera_id, connect.message
            );
            return ProvisionResult {
                provisioned: true,
                provision_message: format!("Camera {} provisioned", info.camera_id),
                connection_string: Some(identity.connection_string),
                connected: false,
                connection_message: connect.message,
            };
        }

        self.registry.commit(&info.camera_id, device).await;
        self.send_module_measurement(json!({ (events::CREATE_CAMERA): &info.camera_id }))
            .await;
        info!("Camera {} created", info.camera_id);

        ProvisionResult {
            provisioned: true,
            provision_message: format!("Camera {} provisioned", info.camera_id),
            connection_string: Some(identity.connection_string),
            connected: true,
            connection_message: connect.message,
        }
    }

    /// Remove a camera from the fleet.
    ///
    /// The proxy teardown and the identity-service deletion are best-effort;
    /// only an absent id is an error.
    pub async fn delete_camera(&self, camera_id: &str) -> Result<(), GatewayError> {
        let device = self.registry.remove(camera_id).await?;
        device.client().delete_device().await;

        let provisioning = {
            let settings = self.module_settings.lock().await;
            ProvisioningSettings::from_table(&settings)
        };
        match provisioning {
            Ok(provisioning) => {
                if let Err(e) = self
                    .identity
                    .delete_device(
                        &provisioning.identity_host,
                        &provisioning.api_token,
                        camera_id,
                    )
                    .await
                {
                    warn!("Identity cleanup for camera {} failed: {}", camera_id, e);
                }
            }
            Err(e) => warn!("Skipping identity cleanup for camera {}: {}", camera_id, e),
        }

        self.send_module_measurement(json!({ (events::DELETE_CAMERA): camera_id }))
            .await;
        info!("Camera {} deleted", camera_id);
        Ok(())
    }

    pub async fn send_camera_telemetry(
        &self,
        camera_id: &str,
        payload: Value,
    ) -> Result<(), GatewayError> {
        let device = self.registry.get(camera_id).await?;
        device.client().send_telemetry(payload).await;
        Ok(())
    }

    pub async fn send_camera_inferences(
        &self,
        camera_id: &str,
        inferences: &[Value],
    ) -> Result<(), GatewayError> {
        let device = self.registry.get(camera_id).await?;
        device.client().ingest_inferences(inferences).await
    }

    /// Route one message delivered on a module input.
    ///
    /// Delivery is at-least-once; the message is acknowledged before any
    /// processing so a processing failure never wedges redelivery.
    pub async fn route_message(&self, message: RoutedMessage) {
        let channel = self.module_channel.read().await.clone();
        if let Some(channel) = channel {
            if let Err(e) = channel.complete(&message).await {
                warn!("Acknowledging message on {} failed: {}", message.input, e);
            }
        }

        if message.body.is_empty() {
            return;
        }

        let body: Value = match serde_json::from_slice(&message.body) {
            Ok(body) => body,
            Err(e) => {
                debug!("Dropping unparseable message on {}: {}", message.input, e);
                return;
            }
        };

        if self.debug_routed_messages().await {
            info!("Routed message on {}: {}", message.input, body);
        }

        match message.input.as_str() {
            inputs::CAMERA_COMMANDS => self.handle_camera_command(body).await,
            inputs::PIPELINE_TELEMETRY => self.handle_pipeline_telemetry(&message, body).await,
            inputs::PIPELINE_OPERATIONAL | inputs::PIPELINE_DIAGNOSTICS => {
                info!("Pipeline {} message received", message.input);
            }
            other => warn!("Message on unknown input {}", other),
        }
    }

    /// Run one health tick: probe, publish, escalate.
    pub async fn check_health(&self) -> HealthState {
        let properties = self.probe.collect();

        let mut state = if properties.free_memory_kb == 0 {
            HealthState::Critical
        } else {
            HealthState::Good
        };
        if self.transport_error.swap(false, Ordering::SeqCst) {
            state = HealthState::Critical;
        }

        self.send_module_measurement(
            json!({ (telemetry::FREE_MEMORY): properties.free_memory_kb }),
        )
        .await;
        self.send_module_measurement(
            json!({ (telemetry::CONNECTED_CAMERAS): self.registry.count().await }),
        )
        .await;
        self.send_module_measurement(json!({ (telemetry::SYSTEM_HEARTBEAT): state.value() }))
            .await;

        if state < HealthState::Good {
            let streak = self.failure_streak.fetch_add(1, Ordering::SeqCst) + 1;
            warn!("Gateway health degraded, {} consecutive ticks", streak);
            if streak >= self.options.health_check_retries {
                self.restart_gateway(self.options.restart_grace, "Gateway health failed")
                    .await;
            }
        } else {
            self.failure_streak.store(0, Ordering::SeqCst);
        }

        self.health_state.store(state.value(), Ordering::SeqCst);

        // Device heartbeats fan out without blocking the tick.
        for device in self.registry.devices().await {
            tokio::spawn(async move {
                device.client().get_health().await;
            });
        }

        state
    }

    /// Announce a restart, wait out the grace period, then signal the app
    /// runner. Repeated triggers signal once.
    pub async fn restart_gateway(&self, grace: Duration, reason: &str) {
        if self.restart_requested.swap(true, Ordering::SeqCst) {
            debug!("Restart already in flight");
            return;
        }
        error!("Restarting gateway: {}", reason);

        self.send_module_measurement(json!({ (events::MODULE_RESTART): reason }))
            .await;
        self.send_module_measurement(json!({ (states::MODULE_STATE): states::INACTIVE }))
            .await;
        self.send_module_measurement(json!({ (events::MODULE_STOPPED): "Module stopped" }))
            .await;

        tokio::time::sleep(grace).await;

        if self.restart_tx.send(reason.to_string()).await.is_err() {
            error!("Restart signal dropped, app runner is gone");
        }
    }

    /// Send the module farewell and close the channel.
    ///
    /// A restart already announced the stop, so only the hub client state is
    /// sent again on that path.
    pub async fn shutdown(&self) {
        if !self.restart_requested.load(Ordering::SeqCst) {
            self.send_module_measurement(json!({ (events::MODULE_STOPPED): "Module stopped" }))
                .await;
            self.send_module_measurement(json!({ (states::MODULE_STATE): states::INACTIVE }))
                .await;
        }
        self.send_module_measurement(
            json!({ (states::HUB_CLIENT_STATE): states::DISCONNECTED }),
        )
        .await;

        let channel = self.module_channel.write().await.take();
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                warn!("Module channel close failed: {}", e);
            }
        }
    }

    /// Re-create cameras this gateway provisioned in a previous run.
    ///
    /// Lists the identity service's devices and re-onboards every one whose
    /// reported fleet tag names this gateway instance. Runs detached after
    /// the first settings sync; failures are logged and skipped.
    pub async fn recovery_scan(&self) {
        let provisioning = {
            let settings = self.module_settings.lock().await;
            ProvisioningSettings::from_table(&settings)
        };
        let provisioning = match provisioning {
            Ok(provisioning) => provisioning,
            Err(e) => {
                warn!("Skipping camera recovery: {}", e);
                return;
            }
        };

        info!("Scanning for cameras to recover");
        let records = match self
            .identity
            .list_devices(&provisioning.identity_host, &provisioning.api_token)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!("Camera recovery listing failed: {}", e);
                return;
            }
        };

        let expected_tag = format!(
            "{}:{}",
            provisioning.gateway_instance_id,
            device::FLEET_DEVICE_TAG_VALUE
        );

        for record in records {
            if self.registry.contains(&record.id).await {
                continue;
            }

            let properties = match self
                .identity
                .device_properties(&provisioning.identity_host, &provisioning.api_token, &record.id)
                .await
            {
                Ok(properties) => properties,
                Err(e) => {
                    warn!("Reading properties of device {} failed: {}", record.id, e);
                    continue;
                }
            };

            let tag = properties
                .get(device::props::FLEET_DEVICE_TAG)
                .and_then(Value::as_str);
            if tag != Some(expected_tag.as_str()) {
                continue;
            }

            let Some(detection_type) = properties
                .get(device::props::DETECTION_TYPE)
                .cloned()
                .and_then(|value| serde_json::from_value::<DetectionType>(value).ok())
            else {
                warn!("Skipping device {}: no usable detection type", record.id);
                continue;
            };

            let rtsp_url = str_prop(&properties, device::props::RTSP_URL);
            if rtsp_url.trim().is_empty() {
                warn!("Skipping device {}: no RTSP url in reported properties", record.id);
                continue;
            }

            let mut camera_name = str_prop(&properties, device::props::CAMERA_NAME);
            if camera_name.is_empty() {
                camera_name = record.display_name.clone().unwrap_or_default();
            }

            let info = CameraInfo {
                camera_id: record.id.clone(),
                camera_name,
                rtsp_url,
                rtsp_auth_username: str_prop(&properties, device::props::RTSP_AUTH_USERNAME),
                rtsp_auth_password: str_prop(&properties, device::props::RTSP_AUTH_PASSWORD),
                detection_type,
            };

            info!("Recovering camera {}", record.id);
            let result = self.create_camera(info).await;
            if !result.connected {
                warn!("Recovery of camera {} failed: {}", record.id, result.message());
            }
        }
    }

    /// Apply one desired-property patch to the module table.
    ///
    /// Returns true when this was the first pass since startup.
    async fn handle_module_desired(&self, patch: Value) -> bool {
        debug!("Module desired properties: {}", patch);

        let channel = self.module_channel.read().await.clone();

        // Lock held across the pass and the report send; passes never
        // interleave.
        let mut settings = self.module_settings.lock().await;
        let outcome = settings.reconcile(&patch);
        for key in &outcome.unknown {
            debug!("Ignoring unknown module setting {}", key);
        }

        if !outcome.report.is_empty() {
            if let Some(channel) = &channel {
                if let Err(e) = channel
                    .update_reported(Value::Object(outcome.report))
                    .await
                {
                    error!("Reporting module settings failed: {}", e);
                }
            }
        }

        let instance_id = settings.get_str(keys::GATEWAY_INSTANCE_ID);
        let pipeline_module = settings.get_str(keys::PIPELINE_MODULE_ID);
        drop(settings);

        if !instance_id.is_empty() && !pipeline_module.is_empty() {
            self.rpc.set_target(&instance_id, &pipeline_module).await;
        }

        !self.first_sync.send_replace(true)
    }

    /// Handle a module direct method: ack 202 first, then run the operation.
    async fn handle_module_method(self: Arc<Self>, invocation: MethodInvocation) {
        let name = invocation.name.clone();
        let payload = invocation.payload.clone();
        info!("Module direct method {}", name);

        match name.as_str() {
            commands::ADD_CAMERA => {
                invocation.respond(202, json!({ "message": "Accepted" }));
                match serde_json::from_value::<CameraInfo>(payload) {
                    Ok(info) => {
                        let orchestrator = self.clone();
                        tokio::spawn(async move {
                            let result = orchestrator.create_camera(info).await;
                            if !result.connected {
                                warn!("{} failed: {}", commands::ADD_CAMERA, result.message());
                            }
                        });
                    }
                    Err(e) => warn!("Malformed {} payload: {}", commands::ADD_CAMERA, e),
                }
            }
            commands::DELETE_CAMERA => {
                invocation.respond(202, json!({ "message": "Accepted" }));
                let camera_id = payload
                    .get("cameraId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if camera_id.is_empty() {
                    warn!("{} without a cameraId", commands::DELETE_CAMERA);
                } else {
                    let orchestrator = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = orchestrator.delete_camera(&camera_id).await {
                            warn!("{} failed: {}", commands::DELETE_CAMERA, e);
                        }
                    });
                }
            }
            commands::RESTART_GATEWAY => {
                invocation.respond(202, json!({ "message": "Accepted" }));
                let grace = payload
                    .get("timeoutSeconds")
                    .and_then(Value::as_u64)
                    .map(Duration::from_secs)
                    .unwrap_or(self.options.restart_grace);
                let orchestrator = self.clone();
                tokio::spawn(async move {
                    orchestrator
                        .restart_gateway(grace, "Restart requested by operator")
                        .await;
                });
            }
            other => {
                warn!("Unknown module method {}", other);
                invocation.respond(400, json!({ "message": format!("Unknown method {}", other) }));
            }
        }
    }

    async fn handle_camera_command(&self, body: Value) {
        let command: CameraCommand = match serde_json::from_value(body) {
            Ok(command) => command,
            Err(e) => {
                warn!("Malformed camera command: {}", e);
                return;
            }
        };

        match command.command.as_str() {
            camera_commands::CREATE => match serde_json::from_value::<CameraInfo>(command.data) {
                Ok(info) => {
                    let result = self.create_camera(info).await;
                    if !result.connected {
                        warn!("Camera create over the bus failed: {}", result.message());
                    }
                }
                Err(e) => warn!("Malformed create command: {}", e),
            },
            camera_commands::DELETE => {
                match serde_json::from_value::<DeleteCommandData>(command.data) {
                    Ok(data) => {
                        if let Err(e) = self.delete_camera(&data.camera_id).await {
                            warn!("Camera delete over the bus failed: {}", e);
                        }
                    }
                    Err(e) => warn!("Malformed delete command: {}", e),
                }
            }
            camera_commands::SEND_TELEMETRY => {
                match serde_json::from_value::<TelemetryCommandData>(command.data) {
                    Ok(data) => {
                        if let Err(e) = self
                            .send_camera_telemetry(&data.camera_id, data.telemetry)
                            .await
                        {
                            warn!("Telemetry relay over the bus failed: {}", e);
                        }
                    }
                    Err(e) => warn!("Malformed send-telemetry command: {}", e),
                }
            }
            camera_commands::SEND_INFERENCES => {
                match serde_json::from_value::<InferencesCommandData>(command.data) {
                    Ok(data) => {
                        if let Err(e) = self
                            .send_camera_inferences(&data.camera_id, &data.inferences)
                            .await
                        {
                            warn!("Inference relay over the bus failed: {}", e);
                        }
                    }
                    Err(e) => warn!("Malformed send-inferences command: {}", e),
                }
            }
            other => warn!("Unknown camera command {}", other),
        }
    }

    async fn handle_pipeline_telemetry(&self, message: &RoutedMessage, body: Value) {
        let Some(subject) = message.property(SUBJECT_PROPERTY) else {
            error!("Pipeline telemetry without a subject property");
            return;
        };
        let Some(camera_id) = camera_id_from_subject(subject) else {
            error!("Pipeline telemetry subject {} is not routable", subject);
            return;
        };

        let inferences: Vec<Value> = body
            .get("inferences")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if inferences.is_empty() {
            debug!("Pipeline telemetry for {} carried no inferences", camera_id);
            return;
        }

        match self.registry.get(&camera_id).await {
            Ok(device) => {
                if let Err(e) = device.client().ingest_inferences(&inferences).await {
                    error!("Inference ingest for camera {} failed: {}", camera_id, e);
                }
            }
            Err(_) => error!("Pipeline telemetry for unregistered camera {}", camera_id),
        }
    }

    /// Report OS and build identity on the module twin, merged with any
    /// properties stashed by earlier runs.
    async fn report_module_identity(&self) {
        let properties = self.probe.collect();
        let reported = json!({
            (props::OS_NAME): properties.os_name,
            (props::PROCESSOR_ARCHITECTURE): std::env::consts::ARCH,
            (props::TOTAL_MEMORY): properties.total_memory_kb,
            (props::SW_VERSION): utils::version_info().version,
        });

        let stashed = match self.store.get(STATE_SCOPE, HUB_PROPERTIES_PATH).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Reading stashed hub properties failed: {}", e);
                Value::Null
            }
        };
        let merged = merge_objects(stashed, reported);

        if let Err(e) = self
            .store
            .set(STATE_SCOPE, HUB_PROPERTIES_PATH, merged.clone())
            .await
        {
            warn!("Persisting hub properties failed: {}", e);
        }

        let channel = self.module_channel.read().await.clone();
        if let Some(channel) = channel {
            if let Err(e) = channel.update_reported(merged).await {
                error!("Reporting module identity failed: {}", e);
            }
        }
    }

    async fn send_module_measurement(&self, body: Value) {
        let channel = match self.module_channel.read().await.clone() {
            Some(channel) => channel,
            None => {
                debug!("Module channel not open, dropping measurement");
                return;
            }
        };

        if self
            .module_settings
            .lock()
            .await
            .get_bool(keys::DEBUG_TELEMETRY)
        {
            info!("Module telemetry: {}", body);
        }

        if let Err(e) = channel.send_event(body).await {
            error!("Module telemetry send failed: {}", e);
        }
    }

    async fn debug_routed_messages(&self) -> bool {
        self.module_settings
            .lock()
            .await
            .get_bool(keys::DEBUG_ROUTED_MESSAGE)
    }
}

fn str_prop(properties: &Value, key: &str) -> String {
    properties
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Shallow object merge; overlay entries win, non-objects yield the overlay.
fn merge_objects(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}
