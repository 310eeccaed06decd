//! Shared device connection core

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::device::{
    commands, events, keys, props, states, telemetry, CameraDevice, CameraInfo,
    FLEET_DEVICE_TAG_VALUE,
};
use crate::errors::GatewayError;
use crate::health::HealthState;
use crate::hub::{DeviceChannel, HubEvent, HubTransport, MethodInvocation};
use crate::pipeline::graph::PipelineGraph;
use crate::pipeline::GraphRpc;
use crate::twin::reconcile::SettingsTable;
use crate::utils;

const INFERENCE_TICK_INTERVAL: Duration = Duration::from_secs(3);

/// Dependencies a device proxy borrows from the orchestrator
#[derive(Clone)]
pub struct DeviceContext {
    pub transport: Arc<dyn HubTransport>,
    pub rpc: Arc<dyn GraphRpc>,

    /// Fleet scope id, used in asset names.
    pub scope_id: String,

    /// Edge box device id, used in the fleet tag.
    pub gateway_instance_id: String,

    /// How long connect waits for the first settings pass.
    pub first_sync_timeout: Duration,
}

/// Outcome of a connect attempt
#[derive(Debug, Clone)]
pub struct ConnectResult {
    pub connected: bool,
    pub message: String,
}

/// Connection machinery shared by every camera variant.
///
/// A variant struct owns one of these and is itself owned by an
/// `Arc<dyn CameraDevice>`; the back-reference held here lets background
/// tasks reach the variant hooks without keeping the proxy alive.
pub struct DeviceClient {
    info: CameraInfo,
    context: DeviceContext,
    graph: Mutex<PipelineGraph>,
    settings: Mutex<SettingsTable>,
    channel: Mutex<Option<Arc<dyn DeviceChannel>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    owner: OnceLock<Weak<dyn CameraDevice>>,
    health: AtomicU8,
    pipeline_active: AtomicBool,
    last_inference: Mutex<Option<tokio::time::Instant>>,
    sync_seen: watch::Sender<bool>,
}

impl DeviceClient {
    pub fn new(
        context: DeviceContext,
        info: CameraInfo,
        graph: PipelineGraph,
        settings: SettingsTable,
    ) -> Self {
        let (sync_seen, _) = watch::channel(false);
        Self {
            info,
            context,
            graph: Mutex::new(graph),
            settings: Mutex::new(settings),
            channel: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            owner: OnceLock::new(),
            health: AtomicU8::new(HealthState::Good.value()),
            pipeline_active: AtomicBool::new(false),
            last_inference: Mutex::new(None),
            sync_seen,
        }
    }

    /// Settings rows common to every camera variant.
    pub fn base_settings() -> SettingsTable {
        SettingsTable::new()
            .with_str(keys::VIDEO_PLAYBACK_HOST, "localhost:8094")
            .with_bool(keys::AUTO_START, false)
            .with_bool(keys::DEBUG_TELEMETRY, false)
    }

    /// Install the back-reference to the owning variant. Called once by the
    /// factory right after construction.
    pub fn bind(&self, owner: Weak<dyn CameraDevice>) {
        let _ = self.owner.set(owner);
    }

    pub fn info(&self) -> &CameraInfo {
        &self.info
    }

    pub fn camera_id(&self) -> &str {
        &self.info.camera_id
    }

    fn owner_device(&self) -> Result<Arc<dyn CameraDevice>, GatewayError> {
        self.owner
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| GatewayError::Internal("Device proxy is unbound".to_string()))
    }

    pub fn health(&self) -> HealthState {
        HealthState::from_value(self.health.load(Ordering::SeqCst))
    }

    pub fn set_health(&self, health: HealthState) {
        self.health.store(health.value(), Ordering::SeqCst);
    }

    pub async fn setting_str(&self, key: &str) -> String {
        self.settings.lock().await.get_str(key)
    }

    pub async fn setting_bool(&self, key: &str) -> bool {
        self.settings.lock().await.get_bool(key)
    }

    /// Open the hub connection and bring the proxy to its ready state.
    /// Never panics; failures come back as `connected: false`.
    pub async fn connect(&self, connection_string: &SecretString) -> ConnectResult {
        match self.try_connect(connection_string).await {
            Ok(()) => ConnectResult {
                connected: true,
                message: format!("Camera {} connected", self.info.camera_id),
            },
            Err(e) => {
                error!("Connect for camera {} failed: {}", self.info.camera_id, e);
                ConnectResult {
                    connected: false,
                    message: e.to_string(),
                }
            }
        }
    }

    async fn try_connect(&self, connection_string: &SecretString) -> Result<(), GatewayError> {
        // Reconnect-safe: drop whatever a previous attempt left behind.
        self.close_channel().await;
        self.abort_tasks().await;

        let owner = self
            .owner
            .get()
            .cloned()
            .ok_or_else(|| GatewayError::Internal("Device proxy is unbound".to_string()))?;

        let channel = self
            .context
            .transport
            .connect_device(connection_string.expose_secret())
            .await?;
        *self.channel.lock().await = Some(channel.clone());

        let pump = tokio::spawn(Self::pump(
            self.info.camera_id.clone(),
            owner.clone(),
            channel,
        ));
        self.tasks.lock().await.push(pump);

        self.report_properties(self.identity_properties()).await?;

        self.send_measurement(json!({ (states::HUB_CLIENT_STATE): states::CONNECTED }))
            .await;
        self.send_measurement(json!({ (states::CAMERA_STATE): states::INACTIVE }))
            .await;

        self.await_first_sync().await?;

        let device = self.owner_device()?;
        let ready = device.ready_properties().await;
        if !ready.is_null() {
            self.report_properties(ready).await?;
        }

        let tick = tokio::spawn(Self::tick(owner));
        self.tasks.lock().await.push(tick);

        info!("Camera {} is ready", self.info.camera_id);

        if self.setting_bool(keys::AUTO_START).await {
            if let Err(e) = self.start_pipeline(true).await {
                warn!("Auto-start for camera {} failed: {}", self.info.camera_id, e);
            }
        }

        Ok(())
    }

    /// Forward a raw telemetry object from the control plane.
    pub async fn send_telemetry(&self, payload: Value) {
        self.send_measurement(payload).await;
    }

    /// Publish one telemetry measurement; failures are logged, never fatal.
    pub async fn send_measurement(&self, body: Value) {
        let channel = match self.channel.lock().await.clone() {
            Some(channel) => channel,
            None => {
                debug!(
                    "Dropping measurement for disconnected camera {}",
                    self.info.camera_id
                );
                return;
            }
        };

        if self.setting_bool(keys::DEBUG_TELEMETRY).await {
            info!("Telemetry for {}: {}", self.info.camera_id, body);
        }

        if let Err(e) = channel.send_event(body).await {
            error!("Telemetry send for {} failed: {}", self.info.camera_id, e);
        }
    }

    /// Patch reported twin properties.
    pub async fn report_properties(&self, patch: Value) -> Result<(), GatewayError> {
        let channel = self.channel.lock().await.clone().ok_or_else(|| {
            GatewayError::HubError(format!("Camera {} is not connected", self.info.camera_id))
        })?;
        channel.update_reported(patch).await
    }

    /// Report health and emit the device heartbeat.
    pub async fn get_health(&self) -> HealthState {
        let health = self.health();
        self.send_measurement(json!({ (telemetry::SYSTEM_HEARTBEAT): health.value() }))
            .await;
        health
    }

    /// Hand a batch of pipeline inferences to the variant; accepted ones
    /// roll up into `tlInferenceCount`.
    pub async fn ingest_inferences(&self, inferences: &[Value]) -> Result<(), GatewayError> {
        if inferences.is_empty() {
            return Ok(());
        }

        let device = self.owner_device()?;
        let accepted = device.process_inferences(inferences).await?;

        if accepted > 0 {
            *self.last_inference.lock().await = Some(tokio::time::Instant::now());
            self.send_measurement(json!({ (telemetry::INFERENCE_COUNT): accepted }))
                .await;
        }

        Ok(())
    }

    /// Age of the most recent accepted inference.
    pub async fn last_inference_age(&self) -> Option<Duration> {
        self.last_inference
            .lock()
            .await
            .map(|instant| instant.elapsed())
    }

    /// Start the camera's pipeline: apply graph parameters, then drive the
    /// descriptor. The resulting camera state is reported either way.
    pub async fn start_pipeline(&self, auto: bool) -> Result<(), GatewayError> {
        if auto {
            info!("Auto-starting pipeline for camera {}", self.info.camera_id);
        }
        self.send_measurement(json!({
            (events::START_PIPELINE_COMMAND_RECEIVED): self.info.camera_id
        }))
        .await;

        let device = self.owner_device()?;
        let parameters = device.graph_parameters().await;

        let result = self.apply_and_start(parameters).await;
        if result.is_ok() {
            self.pipeline_active.store(true, Ordering::SeqCst);
        }
        self.report_camera_state().await;
        result
    }

    async fn apply_and_start(
        &self,
        parameters: Vec<(String, Value)>,
    ) -> Result<(), GatewayError> {
        let mut graph = self.graph.lock().await;
        for (name, value) in parameters {
            graph.set_param(&name, value)?;
        }
        if self.setting_bool(keys::DEBUG_TELEMETRY).await {
            debug!(
                "Graph for {}: instance {} on topology {}",
                self.info.camera_id,
                graph.instance_name(),
                graph.topology_name()
            );
        }
        graph.start(self.context.rpc.as_ref()).await
    }

    /// Stop the camera's pipeline and report the resulting state.
    pub async fn stop_pipeline(&self) -> Result<(), GatewayError> {
        self.send_measurement(json!({
            (events::STOP_PIPELINE_COMMAND_RECEIVED): self.info.camera_id
        }))
        .await;

        let graph = self.graph.lock().await;
        let result = graph.stop(self.context.rpc.as_ref()).await;
        drop(graph);

        if result.is_ok() {
            self.pipeline_active.store(false, Ordering::SeqCst);
        }
        self.report_camera_state().await;
        result
    }

    async fn report_camera_state(&self) {
        let state = if self.pipeline_active.load(Ordering::SeqCst) {
            states::ACTIVE
        } else {
            states::INACTIVE
        };
        self.send_measurement(json!({ (states::CAMERA_STATE): state }))
            .await;
    }

    /// Tear everything down. Every step is attempted; every error is logged
    /// and swallowed.
    pub async fn delete_device(&self) {
        info!("Deleting camera device {}", self.info.camera_id);

        let graph = self.graph.lock().await;
        graph.teardown(self.context.rpc.as_ref()).await;
        drop(graph);

        self.pipeline_active.store(false, Ordering::SeqCst);
        self.send_measurement(json!({ (states::CAMERA_STATE): states::INACTIVE }))
            .await;

        self.close_channel().await;
        self.abort_tasks().await;
    }

    async fn close_channel(&self) {
        let channel = self.channel.lock().await.take();
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                warn!("Channel close for {} failed: {}", self.info.camera_id, e);
            }
        }
    }

    async fn abort_tasks(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    fn identity_properties(&self) -> Value {
        // TODO: probe the camera over ONVIF for real manufacturer, model,
        // and firmware values instead of these placeholders.
        json!({
            (props::CAMERA_NAME): self.info.camera_name,
            (props::RTSP_URL): self.info.rtsp_url,
            (props::RTSP_AUTH_USERNAME): self.info.rtsp_auth_username,
            (props::RTSP_AUTH_PASSWORD): self.info.rtsp_auth_password,
            (props::DETECTION_TYPE): self.info.detection_type,
            (props::FLEET_DEVICE_TAG): format!(
                "{}:{}",
                self.context.gateway_instance_id, FLEET_DEVICE_TAG_VALUE
            ),
            (props::MANUFACTURER): "LensGate",
            (props::MODEL): "Fleet Camera",
            (props::FIRMWARE_VERSION): "1.0",
        })
    }

    /// Playback URL surfaced to operators alongside variant tuning.
    pub async fn playback_url(&self) -> String {
        let host = self.setting_str(keys::VIDEO_PLAYBACK_HOST).await;
        format!("https://{}/{}", host, self.info.camera_id)
    }

    /// Parameters every variant injects ahead of a pipeline start.
    pub fn common_graph_parameters(&self) -> Vec<(String, Value)> {
        let asset_name = format!(
            "{}-{}-{}",
            self.context.scope_id,
            self.info.camera_id,
            utils::compact_utc_timestamp()
        );
        vec![
            ("rtspUrl".to_string(), json!(self.info.rtsp_url)),
            (
                "rtspAuthUsername".to_string(),
                json!(self.info.rtsp_auth_username),
            ),
            (
                "rtspAuthPassword".to_string(),
                json!(self.info.rtsp_auth_password),
            ),
            ("assetName".to_string(), json!(asset_name)),
        ]
    }

    async fn await_first_sync(&self) -> Result<(), GatewayError> {
        let mut synced = self.sync_seen.subscribe();
        let result = match tokio::time::timeout(
            self.context.first_sync_timeout,
            synced.wait_for(|seen| *seen),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            _ => Err(GatewayError::HubError(format!(
                "Timed out waiting for the first settings pass for camera {}",
                self.info.camera_id
            ))),
        };
        result
    }

    /// Reconcile a desired-property patch. The settings lock is held across
    /// the pass including the reported-property send, so passes never
    /// interleave.
    pub async fn handle_desired(&self, patch: Value) {
        let mut settings = self.settings.lock().await;
        let outcome = settings.reconcile(&patch);
        for key in &outcome.unknown {
            debug!(
                "Ignoring unknown setting {} for camera {}",
                key, self.info.camera_id
            );
        }
        if !outcome.report.is_empty() {
            if let Err(e) = self.report_properties(Value::Object(outcome.report)).await {
                error!(
                    "Settings report for camera {} failed: {}",
                    self.info.camera_id, e
                );
            }
        }
        drop(settings);

        self.sync_seen.send_replace(true);
    }

    /// Dispatch a direct method: acknowledge with 202 immediately, run the
    /// operation afterwards, and record its outcome in a reported property.
    pub async fn handle_method(&self, device: Arc<dyn CameraDevice>, invocation: MethodInvocation) {
        let name = invocation.name.clone();
        info!("Direct method {} for camera {}", name, self.info.camera_id);

        match name.as_str() {
            commands::START_PIPELINE | commands::STOP_PIPELINE => {
                let start = name == commands::START_PIPELINE;
                invocation.respond(202, json!({ "message": "Accepted" }));

                tokio::spawn(async move {
                    let client = device.client();
                    let (property, result) = if start {
                        (props::START_PIPELINE_RESULT, client.start_pipeline(false).await)
                    } else {
                        (props::STOP_PIPELINE_RESULT, client.stop_pipeline().await)
                    };
                    client.record_outcome(property, result).await;
                });
            }
            other => {
                warn!(
                    "Unknown direct method {} for camera {}",
                    other, self.info.camera_id
                );
                invocation.respond(400, json!({ "message": "Unknown method" }));
            }
        }
    }

    async fn record_outcome(&self, property: &str, result: Result<(), GatewayError>) {
        let message = match &result {
            Ok(()) => "succeeded".to_string(),
            Err(e) => format!("failed: {}", e),
        };

        let mut patch = serde_json::Map::new();
        patch.insert(property.to_string(), json!(message));
        if let Err(e) = self.report_properties(Value::Object(patch)).await {
            error!(
                "Outcome report for camera {} failed: {}",
                self.info.camera_id, e
            );
        }
    }

    async fn pump(camera_id: String, owner: Weak<dyn CameraDevice>, channel: Arc<dyn DeviceChannel>) {
        loop {
            let event = match channel.recv().await {
                Some(event) => event,
                None => break,
            };
            let device = match owner.upgrade() {
                Some(device) => device,
                None => break,
            };

            match event {
                HubEvent::DesiredProperties(patch) => {
                    device.client().handle_desired(patch).await;
                }
                HubEvent::DirectMethod(invocation) => {
                    device.client().handle_method(device.clone(), invocation).await;
                }
                HubEvent::ConnectionError(message) => {
                    error!("Hub connection error for camera {}: {}", camera_id, message);
                    device.client().set_health(HealthState::Critical);
                }
                HubEvent::InputMessage(_) => {
                    // Leaf devices have no routed inputs.
                }
            }
        }

        debug!("Event pump for camera {} ended", camera_id);
    }

    async fn tick(owner: Weak<dyn CameraDevice>) {
        loop {
            tokio::time::sleep(INFERENCE_TICK_INTERVAL).await;
            match owner.upgrade() {
                Some(device) => device.inference_tick().await,
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::device::test_support;
    use crate::device::DetectionType;

    fn test_client() -> DeviceClient {
        DeviceClient::new(
            test_support::context(),
            test_support::camera(DetectionType::Motion),
            test_support::graph(),
            DeviceClient::base_settings(),
        )
    }

    #[tokio::test]
    async fn base_settings_carry_documented_defaults() {
        let client = test_client();

        assert_eq!(
            client.setting_str(keys::VIDEO_PLAYBACK_HOST).await,
            "localhost:8094"
        );
        assert!(!client.setting_bool(keys::AUTO_START).await);
        assert!(!client.setting_bool(keys::DEBUG_TELEMETRY).await);
    }

    #[test]
    fn identity_properties_carry_the_fleet_tag() {
        let client = test_client();

        let properties = client.identity_properties();

        assert_eq!(
            properties[props::FLEET_DEVICE_TAG],
            "edge-box-1:FleetCameraDevice.v1"
        );
        assert_eq!(properties[props::CAMERA_NAME], "Dock east");
        assert_eq!(properties[props::DETECTION_TYPE], "motion");
    }

    #[test]
    fn common_graph_parameters_include_the_asset_name() {
        let client = test_client();

        let parameters = client.common_graph_parameters();

        let names: Vec<&str> = parameters.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec!["rtspUrl", "rtspAuthUsername", "rtspAuthPassword", "assetName"]
        );
        let asset = parameters[3].1.as_str().unwrap();
        assert!(asset.starts_with("scope1-cam1-"));
    }
}
