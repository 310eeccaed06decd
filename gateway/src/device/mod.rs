//! Per-camera device proxies
//!
//! Each onboarded camera gets its own hub connection, settings table, and
//! pipeline descriptor, driven by a proxy built from the [`CameraDevice`]
//! factory. The shared connection machinery lives in [`proxy::DeviceClient`];
//! the motion and object variants add detection-specific behavior on top.

pub mod motion;
pub mod object;
pub mod proxy;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::pipeline::graph::PipelineGraph;

pub use proxy::{ConnectResult, DeviceClient, DeviceContext};

/// Device-level settings, reconciled from desired properties.
pub mod keys {
    pub const VIDEO_PLAYBACK_HOST: &str = "wpVideoPlaybackHost";
    pub const AUTO_START: &str = "wpAutoStart";
    pub const DEBUG_TELEMETRY: &str = "wpDebugTelemetry";
    pub const SENSITIVITY: &str = "wpSensitivity";
    pub const DETECTION_CLASSES: &str = "wpDetectionClasses";
}

/// Telemetry measurement names.
pub mod telemetry {
    pub const SYSTEM_HEARTBEAT: &str = "tlSystemHeartbeat";
    pub const INFERENCE: &str = "tlInference";
    pub const INFERENCE_COUNT: &str = "tlInferenceCount";
}

/// State-change measurement names and their values.
pub mod states {
    pub const HUB_CLIENT_STATE: &str = "stHubClientState";
    pub const CAMERA_STATE: &str = "stCameraState";

    pub const CONNECTED: &str = "connected";
    pub const DISCONNECTED: &str = "disconnected";
    pub const ACTIVE: &str = "active";
    pub const INACTIVE: &str = "inactive";
}

/// Event measurement names.
pub mod events {
    pub const START_PIPELINE_COMMAND_RECEIVED: &str = "evStartPipelineCommandReceived";
    pub const STOP_PIPELINE_COMMAND_RECEIVED: &str = "evStopPipelineCommandReceived";
}

/// Direct-method names handled by a device proxy.
pub mod commands {
    pub const START_PIPELINE: &str = "cmStartPipeline";
    pub const STOP_PIPELINE: &str = "cmStopPipeline";
}

/// Reported-property names.
pub mod props {
    pub const CAMERA_NAME: &str = "rpCameraName";
    pub const RTSP_URL: &str = "rpRtspUrl";
    pub const RTSP_AUTH_USERNAME: &str = "rpRtspAuthUsername";
    pub const RTSP_AUTH_PASSWORD: &str = "rpRtspAuthPassword";
    pub const DETECTION_TYPE: &str = "rpDetectionType";
    pub const FLEET_DEVICE_TAG: &str = "rpFleetDeviceTag";
    pub const MANUFACTURER: &str = "rpManufacturer";
    pub const MODEL: &str = "rpModel";
    pub const FIRMWARE_VERSION: &str = "rpFirmwareVersion";
    pub const VIDEO_PLAYBACK_URL: &str = "rpVideoPlaybackUrl";
    pub const START_PIPELINE_RESULT: &str = "rpStartPipelineResult";
    pub const STOP_PIPELINE_RESULT: &str = "rpStopPipelineResult";
}

/// Suffix of the fleet tag every camera reports; the full tag is
/// `<gatewayInstanceId>:FleetCameraDevice.v1`.
pub const FLEET_DEVICE_TAG_VALUE: &str = "FleetCameraDevice.v1";

/// Onboarding document for one camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    pub camera_id: String,
    #[serde(default)]
    pub camera_name: String,
    pub rtsp_url: String,
    #[serde(default)]
    pub rtsp_auth_username: String,
    #[serde(default)]
    pub rtsp_auth_password: String,
    pub detection_type: DetectionType,
}

impl CameraInfo {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.camera_id.trim().is_empty() {
            return Err(GatewayError::ValidationError(
                "cameraId is required".to_string(),
            ));
        }
        if self.rtsp_url.trim().is_empty() {
            return Err(GatewayError::ValidationError(
                "rtspUrl is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which detector pipeline a camera runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionType {
    Motion,
    Object,
}

impl DetectionType {
    /// Capability model the camera registers under.
    pub fn model_id(&self) -> &'static str {
        match self {
            DetectionType::Motion => "urn:lensgate:MotionDetectorDevice:1",
            DetectionType::Object => "urn:lensgate:ObjectDetectorDevice:1",
        }
    }

    /// File-name stem of the graph templates in the content directory.
    pub fn template_stem(&self) -> &'static str {
        match self {
            DetectionType::Motion => "motion",
            DetectionType::Object => "object",
        }
    }
}

impl fmt::Display for DetectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template_stem())
    }
}

/// Capability surface of one camera's device proxy.
///
/// The connection lifecycle, settings handling, and command plumbing are
/// shared through [`DeviceClient`]; the trait methods below are the points
/// where the motion and object detectors differ.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// The shared connection core.
    fn client(&self) -> &DeviceClient;

    /// Detector tuning reported once the first settings pass lands.
    async fn ready_properties(&self) -> serde_json::Value;

    /// Parameters applied to the graph instance ahead of a start.
    async fn graph_parameters(&self) -> Vec<(String, serde_json::Value)>;

    /// Interpret one batch of pipeline inferences; returns how many were
    /// accepted (each accepted one is sent as `tlInference`).
    async fn process_inferences(
        &self,
        inferences: &[serde_json::Value],
    ) -> Result<u32, GatewayError>;

    /// Periodic per-device maintenance, every few seconds while connected.
    async fn inference_tick(&self);
}

impl fmt::Debug for dyn CameraDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraDevice")
            .field("camera_id", &self.client().info().camera_id)
            .finish()
    }
}

/// Build the proxy variant for a camera's detection type.
pub fn build_camera_device(
    context: DeviceContext,
    info: CameraInfo,
    graph: PipelineGraph,
) -> Arc<dyn CameraDevice> {
    match info.detection_type {
        DetectionType::Motion => motion::MotionDetectorDevice::new(context, info, graph),
        DetectionType::Object => object::ObjectDetectorDevice::new(context, info, graph),
    }
}
