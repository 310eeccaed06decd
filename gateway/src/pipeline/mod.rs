//! Video pipeline control
//!
//! Drives the on-box video pipeline module through hub direct methods. The
//! [`GraphRpc`] seam keeps the graph logic testable without a live hub.

pub mod graph;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use pipeline_api::models::{MethodParams, MethodResult};

use crate::errors::GatewayError;
use crate::hub::ModuleChannel;

/// Invokes one pipeline method and returns its payload
#[async_trait]
pub trait GraphRpc: Send + Sync {
    async fn invoke(
        &self,
        method: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError>;
}

/// [`GraphRpc`] implementation that calls the pipeline module over the hub.
///
/// The channel and the target module come in after startup (the channel once
/// the module connects, the target once settings first sync), so both live
/// behind slots.
pub struct PipelineModuleRpc {
    channel: RwLock<Option<Arc<dyn ModuleChannel>>>,
    target: RwLock<Option<(String, String)>>,
}

impl PipelineModuleRpc {
    pub fn new() -> Self {
        Self {
            channel: RwLock::new(None),
            target: RwLock::new(None),
        }
    }

    pub async fn set_channel(&self, channel: Arc<dyn ModuleChannel>) {
        *self.channel.write().await = Some(channel);
    }

    pub async fn set_target(&self, device_id: &str, module_id: &str) {
        debug!("Pipeline module target: {}/{}", device_id, module_id);
        *self.target.write().await = Some((device_id.to_string(), module_id.to_string()));
    }
}

impl Default for PipelineModuleRpc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphRpc for PipelineModuleRpc {
    async fn invoke(
        &self,
        method: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        let (device_id, module_id) = self.target.read().await.clone().ok_or_else(|| {
            GatewayError::PipelineError("Pipeline module target is not configured".to_string())
        })?;
        let channel = self.channel.read().await.clone().ok_or_else(|| {
            GatewayError::PipelineError("Hub channel is not open".to_string())
        })?;

        let params = MethodParams::new(method, payload);
        let raw = channel
            .invoke_module_method(&device_id, &module_id, &params)
            .await?;

        let result: MethodResult = serde_json::from_value(raw).map_err(|e| {
            GatewayError::PipelineError(format!("Malformed response to {}: {}", method, e))
        })?;
        if result.status >= 300 {
            return Err(GatewayError::PipelineError(format!(
                "{} returned status {}",
                method, result.status
            )));
        }

        Ok(result.payload)
    }
}
