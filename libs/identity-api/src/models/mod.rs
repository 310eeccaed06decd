//! Identity service API models

use serde::{Deserialize, Serialize};

/// Group-enrollment registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub registration_id: String,
    pub payload: RegistrationPayload,
}

/// Provisioning payload carried with a registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPayload {
    pub model_id: String,
    pub gateway: GatewayBinding,
}

/// Gateway instance a registered device is bound to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayBinding {
    pub instance_id: String,
    pub module_id: String,
}

/// Registration response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceResponse {
    pub status: String,
    pub registration_state: Option<RegistrationState>,
}

/// Assignment outcome of a registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationState {
    pub assigned_hub: Option<String>,
    pub device_id: Option<String>,
    pub status: Option<String>,
    pub error_message: Option<String>,
}

/// Device record returned by the device API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    pub display_name: Option<String>,
}

/// One page of the device list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub value: Vec<DeviceRecord>,
}

/// Error payload returned by the identity service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}
