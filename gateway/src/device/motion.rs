//! Motion detector camera variant

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::device::{
    keys, props, telemetry, CameraDevice, CameraInfo, DeviceClient, DeviceContext,
};
use crate::errors::GatewayError;
use crate::pipeline::graph::PipelineGraph;

/// Camera proxy running the motion-detection pipeline.
///
/// Motion inferences carry no class information, so every inference in a
/// batch is accepted and forwarded.
pub struct MotionDetectorDevice {
    client: DeviceClient,
}

impl MotionDetectorDevice {
    pub fn new(context: DeviceContext, info: CameraInfo, graph: PipelineGraph) -> Arc<Self> {
        let settings = DeviceClient::base_settings().with_str(keys::SENSITIVITY, "medium");
        let device = Arc::new(Self {
            client: DeviceClient::new(context, info, graph, settings),
        });
        let owner: Weak<dyn CameraDevice> = Arc::<Self>::downgrade(&device);
        device.client.bind(owner);
        device
    }
}

#[async_trait]
impl CameraDevice for MotionDetectorDevice {
    fn client(&self) -> &DeviceClient {
        &self.client
    }

    async fn ready_properties(&self) -> Value {
        json!({
            (props::VIDEO_PLAYBACK_URL): self.client.playback_url().await,
            (keys::SENSITIVITY): self.client.setting_str(keys::SENSITIVITY).await,
        })
    }

    async fn graph_parameters(&self) -> Vec<(String, Value)> {
        let mut parameters = self.client.common_graph_parameters();
        let sensitivity = self.client.setting_str(keys::SENSITIVITY).await;
        parameters.push(("motionSensitivity".to_string(), json!(sensitivity)));
        parameters
    }

    async fn process_inferences(&self, inferences: &[Value]) -> Result<u32, GatewayError> {
        let mut accepted = 0;
        for inference in inferences {
            accepted += 1;
            self.client
                .send_measurement(json!({ (telemetry::INFERENCE): inference }))
                .await;
        }
        Ok(accepted)
    }

    async fn inference_tick(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::device::{test_support, DetectionType};

    fn device() -> Arc<MotionDetectorDevice> {
        MotionDetectorDevice::new(
            test_support::context(),
            test_support::camera(DetectionType::Motion),
            test_support::graph(),
        )
    }

    #[tokio::test]
    async fn accepts_every_inference() {
        let device = device();
        let batch = vec![json!({ "motion": true }), json!({ "motion": true })];

        let accepted = device.process_inferences(&batch).await.unwrap();

        assert_eq!(accepted, 2);
    }

    #[tokio::test]
    async fn graph_parameters_carry_the_sensitivity() {
        let device = device();

        let parameters = device.graph_parameters().await;

        let tuning = parameters
            .iter()
            .find(|(name, _)| name == "motionSensitivity")
            .unwrap();
        assert_eq!(tuning.1, json!("medium"));
    }

    #[tokio::test]
    async fn ready_properties_echo_tuning_and_playback() {
        let device = device();

        let ready = device.ready_properties().await;

        assert_eq!(ready[keys::SENSITIVITY], "medium");
        assert_eq!(ready[props::VIDEO_PLAYBACK_URL], "https://localhost:8094/cam1");
    }
}
