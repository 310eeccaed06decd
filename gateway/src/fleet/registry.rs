//! Device registry.
//!
//! Tracks the live camera proxies plus the ids whose provisioning is still
//! in flight. Reserving an id before provisioning starts makes concurrent
//! creates race-free without holding a lock across the whole onboarding
//! sequence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::device::CameraDevice;
use crate::errors::GatewayError;

pub struct DeviceRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    live: HashMap<String, Arc<dyn CameraDevice>>,
    pending: HashSet<String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Reserve a camera id ahead of provisioning.
    ///
    /// Rejects ids that are already live or already being provisioned.
    pub async fn reserve(&self, camera_id: &str) -> Result<(), GatewayError> {
        let mut inner = self.inner.write().await;
        if inner.live.contains_key(camera_id) || !inner.pending.insert(camera_id.to_string()) {
            return Err(GatewayError::ValidationError(format!(
                "Camera {} already exists",
                camera_id
            )));
        }
        Ok(())
    }

    /// Turn a reservation into a live entry.
    pub async fn commit(&self, camera_id: &str, device: Arc<dyn CameraDevice>) {
        let mut inner = self.inner.write().await;
        inner.pending.remove(camera_id);
        inner.live.insert(camera_id.to_string(), device);
    }

    /// Release a reservation after a failed create.
    pub async fn abort(&self, camera_id: &str) {
        self.inner.write().await.pending.remove(camera_id);
    }

    /// Remove and return a live entry.
    pub async fn remove(&self, camera_id: &str) -> Result<Arc<dyn CameraDevice>, GatewayError> {
        self.inner
            .write()
            .await
            .live
            .remove(camera_id)
            .ok_or_else(|| not_found(camera_id))
    }

    pub async fn get(&self, camera_id: &str) -> Result<Arc<dyn CameraDevice>, GatewayError> {
        self.inner
            .read()
            .await
            .live
            .get(camera_id)
            .cloned()
            .ok_or_else(|| not_found(camera_id))
    }

    /// True when the id is live or reserved.
    pub async fn contains(&self, camera_id: &str) -> bool {
        let inner = self.inner.read().await;
        inner.live.contains_key(camera_id) || inner.pending.contains(camera_id)
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.live.len()
    }

    /// Snapshot of every live proxy.
    pub async fn devices(&self) -> Vec<Arc<dyn CameraDevice>> {
        self.inner.read().await.live.values().cloned().collect()
    }

    pub async fn camera_ids(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut ids: Vec<String> = inner.live.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(camera_id: &str) -> GatewayError {
    GatewayError::NotFound(format!("Camera {} is not registered", camera_id))
}
