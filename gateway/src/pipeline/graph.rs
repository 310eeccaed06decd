//! Graph documents for one camera's pipeline

use serde_json::Value;
use tracing::{info, warn};

use pipeline_api::models::{methods, GraphParameter, GraphReference};

use crate::errors::GatewayError;
use crate::filesys::Dir;
use crate::pipeline::GraphRpc;

/// Token replaced with the camera id when templates are loaded.
pub const CAMERA_ID_TOKEN: &str = "###CameraId";

/// Prefix of per-camera graph instance names.
pub const INSTANCE_PREFIX: &str = "det-";

/// The topology and instance documents for one camera's detection pipeline.
///
/// Both documents are rendered from on-disk templates with every
/// [`CAMERA_ID_TOKEN`] replaced by the camera id, so instance and source
/// names stay unique across a fleet.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    topology: Value,
    instance: Value,
    topology_name: String,
    instance_name: String,
    api_version: String,
}

impl PipelineGraph {
    /// Load the graph pair for a template stem, e.g. `motion` loads
    /// `motionGraphTopology.json` and `motionGraphInstance.json`.
    pub async fn load(
        content_dir: &Dir,
        stem: &str,
        camera_id: &str,
    ) -> Result<Self, GatewayError> {
        let topology_raw = content_dir
            .file(&format!("{stem}GraphTopology.json"))
            .read_string()
            .await?;
        let instance_raw = content_dir
            .file(&format!("{stem}GraphInstance.json"))
            .read_string()
            .await?;
        Self::from_templates(&topology_raw, &instance_raw, camera_id)
    }

    pub fn from_templates(
        topology_template: &str,
        instance_template: &str,
        camera_id: &str,
    ) -> Result<Self, GatewayError> {
        let topology: Value =
            serde_json::from_str(&topology_template.replace(CAMERA_ID_TOKEN, camera_id))?;
        let instance: Value =
            serde_json::from_str(&instance_template.replace(CAMERA_ID_TOKEN, camera_id))?;

        let topology_name = document_name(&topology, "topology")?;
        let instance_name = document_name(&instance, "instance")?;
        let api_version = instance
            .get("@apiVersion")
            .and_then(Value::as_str)
            .unwrap_or("1.0")
            .to_string();

        Ok(Self {
            topology,
            instance,
            topology_name,
            instance_name,
            api_version,
        })
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn topology_name(&self) -> &str {
        &self.topology_name
    }

    /// Set a graph instance parameter, overwriting the first entry with the
    /// same name or appending a new one.
    pub fn set_param(&mut self, name: &str, value: Value) -> Result<(), GatewayError> {
        if name.is_empty() {
            return Err(GatewayError::ValidationError(
                "Graph parameter name is empty".to_string(),
            ));
        }

        let parameters = self
            .instance
            .get_mut("properties")
            .and_then(|properties| properties.get_mut("parameters"))
            .and_then(Value::as_array_mut)
            .ok_or_else(|| {
                GatewayError::PipelineError(format!(
                    "Graph instance {} has no parameters section",
                    self.instance_name
                ))
            })?;

        if let Some(existing) = parameters
            .iter_mut()
            .find(|entry| entry.get("name").and_then(Value::as_str) == Some(name))
        {
            if let Some(entry) = existing.as_object_mut() {
                entry.insert("value".to_string(), value);
            }
            return Ok(());
        }

        parameters.push(serde_json::to_value(GraphParameter {
            name: name.to_string(),
            value,
        })?);
        Ok(())
    }

    /// Bring the pipeline up: set the topology, set the instance, activate.
    /// The first failing step aborts and surfaces its error.
    pub async fn start(&self, rpc: &dyn GraphRpc) -> Result<(), GatewayError> {
        info!(
            "Starting pipeline instance {} on topology {}",
            self.instance_name, self.topology_name
        );

        rpc.invoke(methods::GRAPH_TOPOLOGY_SET, self.topology.clone())
            .await?;
        rpc.invoke(methods::GRAPH_INSTANCE_SET, self.instance.clone())
            .await?;
        rpc.invoke(methods::GRAPH_INSTANCE_ACTIVATE, self.instance_reference()?)
            .await?;

        Ok(())
    }

    /// Deactivate the instance, leaving its documents in place for a restart.
    pub async fn stop(&self, rpc: &dyn GraphRpc) -> Result<(), GatewayError> {
        info!("Stopping pipeline instance {}", self.instance_name);

        rpc.invoke(
            methods::GRAPH_INSTANCE_DEACTIVATE,
            self.instance_reference()?,
        )
        .await?;

        Ok(())
    }

    /// Remove the pipeline entirely. Every step runs even when an earlier
    /// one fails; a deactivate on an already-stopped instance is expected
    /// to error.
    pub async fn teardown(&self, rpc: &dyn GraphRpc) {
        info!("Tearing down pipeline instance {}", self.instance_name);

        let steps = [
            (methods::GRAPH_INSTANCE_DEACTIVATE, self.instance_reference()),
            (methods::GRAPH_INSTANCE_DELETE, self.instance_reference()),
            (methods::GRAPH_TOPOLOGY_DELETE, self.topology_reference()),
        ];

        for (method, payload) in steps {
            let payload = match payload {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Skipping teardown step {}: {}", method, e);
                    continue;
                }
            };
            if let Err(e) = rpc.invoke(method, payload).await {
                warn!(
                    "Teardown step {} for {} failed: {}",
                    method, self.instance_name, e
                );
            }
        }
    }

    fn instance_reference(&self) -> Result<Value, GatewayError> {
        Ok(serde_json::to_value(GraphReference {
            api_version: self.api_version.clone(),
            name: self.instance_name.clone(),
        })?)
    }

    fn topology_reference(&self) -> Result<Value, GatewayError> {
        Ok(serde_json::to_value(GraphReference {
            api_version: self.api_version.clone(),
            name: self.topology_name.clone(),
        })?)
    }
}

fn document_name(document: &Value, kind: &str) -> Result<String, GatewayError> {
    document
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            GatewayError::PipelineError(format!("Graph {} template has no name", kind))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;

    const TOPOLOGY: &str = r#"{
        "name": "MotionDetection",
        "@apiVersion": "1.0",
        "properties": {
            "sources": [ { "name": "rtspSource-###CameraId" } ]
        }
    }"#;

    const INSTANCE: &str = r#"{
        "name": "det-###CameraId",
        "@apiVersion": "1.0",
        "properties": {
            "topologyName": "MotionDetection",
            "parameters": [
                { "name": "rtspUrl", "value": "" },
                { "name": "motionSensitivity", "value": "medium" }
            ]
        }
    }"#;

    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GraphRpc for Recorder {
        async fn invoke(&self, method: &str, _payload: Value) -> Result<Value, GatewayError> {
            self.calls.lock().unwrap().push(method.to_string());
            if self.fail_on == Some(method) {
                return Err(GatewayError::PipelineError("Injected failure".to_string()));
            }
            Ok(Value::Null)
        }
    }

    fn graph() -> PipelineGraph {
        PipelineGraph::from_templates(TOPOLOGY, INSTANCE, "cam1").unwrap()
    }

    #[test]
    fn templates_substitute_the_camera_id() {
        let graph = graph();

        assert_eq!(graph.instance_name(), "det-cam1");
        assert_eq!(graph.topology_name(), "MotionDetection");
        let sources = graph.topology["properties"]["sources"].clone();
        assert_eq!(sources[0]["name"], "rtspSource-cam1");
    }

    #[test]
    fn set_param_overwrites_the_first_match() {
        let mut graph = graph();

        graph
            .set_param("rtspUrl", Value::String("rtsp://cam1/live".to_string()))
            .unwrap();

        let parameters = graph.instance["properties"]["parameters"]
            .as_array()
            .unwrap();
        assert_eq!(parameters.len(), 2);
        assert_eq!(parameters[0]["value"], "rtsp://cam1/live");
    }

    #[test]
    fn set_param_appends_unknown_names() {
        let mut graph = graph();

        graph
            .set_param("assetName", Value::String("scope-cam1".to_string()))
            .unwrap();

        let parameters = graph.instance["properties"]["parameters"]
            .as_array()
            .unwrap();
        assert_eq!(parameters.len(), 3);
        assert_eq!(parameters[2]["name"], "assetName");
    }

    #[test]
    fn set_param_rejects_an_empty_name() {
        let mut graph = graph();

        let err = graph.set_param("", Value::Null).unwrap_err();

        assert!(matches!(err, GatewayError::ValidationError(_)));
    }

    #[tokio::test]
    async fn start_runs_the_three_steps_in_order() {
        let rpc = Recorder::new(None);

        graph().start(&rpc).await.unwrap();

        assert_eq!(
            rpc.calls(),
            vec![
                methods::GRAPH_TOPOLOGY_SET,
                methods::GRAPH_INSTANCE_SET,
                methods::GRAPH_INSTANCE_ACTIVATE,
            ]
        );
    }

    #[tokio::test]
    async fn start_aborts_on_the_first_failure() {
        let rpc = Recorder::new(Some(methods::GRAPH_INSTANCE_SET));

        let err = graph().start(&rpc).await.unwrap_err();

        assert!(matches!(err, GatewayError::PipelineError(_)));
        assert_eq!(
            rpc.calls(),
            vec![methods::GRAPH_TOPOLOGY_SET, methods::GRAPH_INSTANCE_SET]
        );
    }

    #[tokio::test]
    async fn teardown_attempts_every_step() {
        let rpc = Recorder::new(Some(methods::GRAPH_INSTANCE_DEACTIVATE));

        graph().teardown(&rpc).await;

        assert_eq!(
            rpc.calls(),
            vec![
                methods::GRAPH_INSTANCE_DEACTIVATE,
                methods::GRAPH_INSTANCE_DELETE,
                methods::GRAPH_TOPOLOGY_DELETE,
            ]
        );
    }
}
