//! Pipeline module RPC models

use serde::{Deserialize, Serialize};

/// Direct-method names exposed by the video pipeline module.
pub mod methods {
    pub const GRAPH_TOPOLOGY_SET: &str = "GraphTopologySet";
    pub const GRAPH_TOPOLOGY_DELETE: &str = "GraphTopologyDelete";
    pub const GRAPH_INSTANCE_SET: &str = "GraphInstanceSet";
    pub const GRAPH_INSTANCE_ACTIVATE: &str = "GraphInstanceActivate";
    pub const GRAPH_INSTANCE_DEACTIVATE: &str = "GraphInstanceDeactivate";
    pub const GRAPH_INSTANCE_DELETE: &str = "GraphInstanceDelete";
}

/// Connect timeout applied to every pipeline method invocation, in seconds.
pub const CONNECT_TIMEOUT_SECONDS: u32 = 30;

/// Response timeout applied to every pipeline method invocation, in seconds.
pub const RESPONSE_TIMEOUT_SECONDS: u32 = 30;

/// Envelope for a direct-method invocation on the pipeline module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodParams {
    pub method_name: String,
    pub payload: serde_json::Value,
    pub connect_timeout_in_seconds: u32,
    pub response_timeout_in_seconds: u32,
}

impl MethodParams {
    pub fn new(method_name: &str, payload: serde_json::Value) -> Self {
        Self {
            method_name: method_name.to_string(),
            payload,
            connect_timeout_in_seconds: CONNECT_TIMEOUT_SECONDS,
            response_timeout_in_seconds: RESPONSE_TIMEOUT_SECONDS,
        }
    }
}

/// Name-only payload addressing a graph document by api version and name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphReference {
    #[serde(rename = "@apiVersion")]
    pub api_version: String,
    pub name: String,
}

/// A single entry of a graph instance's parameters array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphParameter {
    pub name: String,
    pub value: serde_json::Value,
}

/// Response payload of a pipeline method invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodResult {
    pub status: u16,
    #[serde(default)]
    pub payload: serde_json::Value,
}
