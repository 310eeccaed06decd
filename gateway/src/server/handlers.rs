//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::device::CameraInfo;
use crate::errors::GatewayError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub connected_cameras: usize,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: state.orchestrator.health_state().name().to_string(),
        service: "lensgate".to_string(),
        version: version.version,
        connected_cameras: state.orchestrator.camera_count().await,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Camera creation response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCameraResponse {
    pub camera_id: String,
    pub provisioned: bool,
    pub connected: bool,
    pub message: String,
}

/// Camera creation handler
pub async fn create_camera_handler(
    State(state): State<Arc<ServerState>>,
    Json(info): Json<CameraInfo>,
) -> impl IntoResponse {
    if let Err(e) = info.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(CreateCameraResponse {
                camera_id: info.camera_id,
                provisioned: false,
                connected: false,
                message: e.to_string(),
            }),
        );
    }

    let camera_id = info.camera_id.clone();
    let result = state.orchestrator.create_camera(info).await;
    let status = if result.connected {
        StatusCode::CREATED
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (
        status,
        Json(CreateCameraResponse {
            camera_id,
            provisioned: result.provisioned,
            connected: result.connected,
            message: result.message().to_string(),
        }),
    )
}

/// Camera deletion handler
pub async fn delete_camera_handler(
    State(state): State<Arc<ServerState>>,
    Path(camera_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    match state.orchestrator.delete_camera(&camera_id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(GatewayError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Camera telemetry handler
pub async fn camera_telemetry_handler(
    State(state): State<Arc<ServerState>>,
    Path(camera_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, StatusCode> {
    match state
        .orchestrator
        .send_camera_telemetry(&camera_id, payload)
        .await
    {
        Ok(()) => Ok(StatusCode::CREATED),
        Err(GatewayError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Camera inference ingestion handler
pub async fn camera_inferences_handler(
    State(state): State<Arc<ServerState>>,
    Path(camera_id): Path<String>,
    Json(inferences): Json<Vec<Value>>,
) -> Result<impl IntoResponse, StatusCode> {
    match state
        .orchestrator
        .send_camera_inferences(&camera_id, &inferences)
        .await
    {
        Ok(()) => Ok(StatusCode::CREATED),
        Err(GatewayError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
