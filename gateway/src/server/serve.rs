//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::GatewayError;
use crate::server::handlers::{
    camera_inferences_handler, camera_telemetry_handler, create_camera_handler,
    delete_camera_handler, health_handler, version_handler,
};
use crate::server::state::ServerState;

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), GatewayError>>, GatewayError> {
    let app = Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Fleet
        .route("/api/v1/fleet/camera", post(create_camera_handler))
        .route(
            "/api/v1/fleet/camera/{cameraId}",
            delete(delete_camera_handler),
        )
        .route(
            "/api/v1/fleet/camera/{cameraId}/telemetry",
            post(camera_telemetry_handler),
        )
        .route(
            "/api/v1/fleet/camera/{cameraId}/inferences",
            post(camera_inferences_handler),
        )
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| GatewayError::ServerError(e.to_string()))
    });

    Ok(handle)
}
