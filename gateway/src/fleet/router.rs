//! Inbound bus message parsing.
//!
//! Edge bus routes deliver messages onto named module inputs. This module
//! holds the wire shapes of those messages plus the subject parsing that maps
//! a pipeline message back to the camera it came from. The routing decisions
//! themselves live on the orchestrator.

use serde::Deserialize;
use serde_json::Value;

use crate::pipeline::graph::INSTANCE_PREFIX;

/// Message property carrying the pipeline graph source.
pub const SUBJECT_PROPERTY: &str = "subject";

/// Subject path segment that marks a graph-instance source.
const GRAPH_SOURCE_MARKER: &str = "graphInstances";

/// Commands accepted on the `camera-commands` input
pub mod camera_commands {
    pub const CREATE: &str = "create";
    pub const DELETE: &str = "delete";
    pub const SEND_TELEMETRY: &str = "send-telemetry";
    pub const SEND_INFERENCES: &str = "send-inferences";
}

/// Envelope of a `camera-commands` message
#[derive(Debug, Deserialize)]
pub struct CameraCommand {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

/// Payload of a `delete` camera command
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCommandData {
    pub camera_id: String,
}

/// Payload of a `send-telemetry` camera command
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryCommandData {
    pub camera_id: String,
    #[serde(default)]
    pub telemetry: Value,
}

/// Payload of a `send-inferences` camera command
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferencesCommandData {
    pub camera_id: String,
    #[serde(default)]
    pub inferences: Vec<Value>,
}

/// Map a pipeline message subject back to a camera id.
///
/// Subjects look like `/graphInstances/det-cam1/processor`; the second
/// segment must be the graph-instance marker and the third carries the
/// instance name. Instance names without the expected prefix are returned
/// whole so externally created graphs still route somewhere visible.
pub fn camera_id_from_subject(subject: &str) -> Option<String> {
    let segments: Vec<&str> = subject.split('/').collect();
    if segments.len() < 3 || segments[1] != GRAPH_SOURCE_MARKER {
        return None;
    }

    let instance = segments[2];
    if instance.is_empty() {
        return None;
    }

    let camera_id = instance.strip_prefix(INSTANCE_PREFIX).unwrap_or(instance);
    Some(camera_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subject_maps_to_camera_id() {
        assert_eq!(
            camera_id_from_subject("/graphInstances/det-cam123/foo"),
            Some("cam123".to_string())
        );
    }

    #[test]
    fn test_subject_without_prefix_keeps_full_instance_name() {
        assert_eq!(
            camera_id_from_subject("/graphInstances/external-graph/sink"),
            Some("external-graph".to_string())
        );
    }

    #[test]
    fn test_short_or_foreign_subjects_do_not_route() {
        assert_eq!(camera_id_from_subject("/graphInstances"), None);
        assert_eq!(camera_id_from_subject("/graphTopologies/det-cam1/x"), None);
        assert_eq!(camera_id_from_subject("/graphInstances//x"), None);
        assert_eq!(camera_id_from_subject(""), None);
    }

    #[test]
    fn test_unanchored_subject_does_not_route() {
        // Without the leading slash the marker lands in the wrong segment.
        assert_eq!(camera_id_from_subject("graphInstances/det-cam1/x"), None);
    }

    #[test]
    fn test_camera_command_envelope_parses() {
        let command: CameraCommand = serde_json::from_value(json!({
            "command": "create",
            "data": { "cameraId": "cam1" },
        }))
        .unwrap();

        assert_eq!(command.command, camera_commands::CREATE);
        assert_eq!(command.data["cameraId"], "cam1");
    }

    #[test]
    fn test_command_data_defaults_to_null() {
        let command: CameraCommand =
            serde_json::from_value(json!({ "command": "delete" })).unwrap();

        assert!(command.data.is_null());
    }

    #[test]
    fn test_inferences_command_data_parses() {
        let data: InferencesCommandData = serde_json::from_value(json!({
            "cameraId": "cam9",
            "inferences": [ { "type": "motion" } ],
        }))
        .unwrap();

        assert_eq!(data.camera_id, "cam9");
        assert_eq!(data.inferences.len(), 1);
    }
}
