//! Object detector camera variant

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::device::{
    keys, props, telemetry, CameraDevice, CameraInfo, DeviceClient, DeviceContext,
};
use crate::errors::GatewayError;
use crate::pipeline::graph::PipelineGraph;

/// No accepted detection for this long clears the activity flag.
const STALE_INFERENCE_WINDOW: Duration = Duration::from_secs(10);

/// Camera proxy running the object-detection pipeline.
///
/// Detections are filtered against the comma-separated class list in
/// `wpDetectionClasses`; only matching classes are forwarded.
pub struct ObjectDetectorDevice {
    client: DeviceClient,
    active_inference: AtomicBool,
}

impl ObjectDetectorDevice {
    pub fn new(context: DeviceContext, info: CameraInfo, graph: PipelineGraph) -> Arc<Self> {
        let settings = DeviceClient::base_settings().with_str(keys::DETECTION_CLASSES, "person");
        let device = Arc::new(Self {
            client: DeviceClient::new(context, info, graph, settings),
            active_inference: AtomicBool::new(false),
        });
        let owner: Weak<dyn CameraDevice> = Arc::<Self>::downgrade(&device);
        device.client.bind(owner);
        device
    }

    /// Whether an accepted detection arrived within the stale window.
    pub fn inference_active(&self) -> bool {
        self.active_inference.load(Ordering::SeqCst)
    }

    async fn wanted_classes(&self) -> Vec<String> {
        self.client
            .setting_str(keys::DETECTION_CLASSES)
            .await
            .split(',')
            .map(|class| class.trim().to_ascii_lowercase())
            .filter(|class| !class.is_empty())
            .collect()
    }
}

#[async_trait]
impl CameraDevice for ObjectDetectorDevice {
    fn client(&self) -> &DeviceClient {
        &self.client
    }

    async fn ready_properties(&self) -> Value {
        json!({
            (props::VIDEO_PLAYBACK_URL): self.client.playback_url().await,
            (keys::DETECTION_CLASSES): self.client.setting_str(keys::DETECTION_CLASSES).await,
        })
    }

    async fn graph_parameters(&self) -> Vec<(String, Value)> {
        let mut parameters = self.client.common_graph_parameters();
        let classes = self.client.setting_str(keys::DETECTION_CLASSES).await;
        parameters.push(("detectionClasses".to_string(), json!(classes)));
        parameters
    }

    async fn process_inferences(&self, inferences: &[Value]) -> Result<u32, GatewayError> {
        let wanted = self.wanted_classes().await;

        let mut accepted = 0;
        for inference in inferences {
            let tag = inference
                .pointer("/entity/tag/value")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !wanted.contains(&tag.to_ascii_lowercase()) {
                continue;
            }

            accepted += 1;
            self.active_inference.store(true, Ordering::SeqCst);
            self.client
                .send_measurement(json!({ (telemetry::INFERENCE): inference }))
                .await;
        }

        Ok(accepted)
    }

    async fn inference_tick(&self) {
        if !self.active_inference.load(Ordering::SeqCst) {
            return;
        }

        let stale = match self.client.last_inference_age().await {
            Some(age) => age >= STALE_INFERENCE_WINDOW,
            None => true,
        };
        if stale {
            self.active_inference.store(false, Ordering::SeqCst);
            debug!(
                "Inference activity for camera {} went quiet",
                self.client.camera_id()
            );
        }
    }
}
