//! Hub transport layer.
//!
//! The gateway talks to the cloud hub through the narrow channel traits in
//! this module. Core logic (fleet orchestrator, device proxies) only sees
//! these traits; the MQTT implementation lives in [`mqtt`].

pub mod auth;
pub mod mqtt;
pub mod topics;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::warn;

use crate::errors::GatewayError;

/// Inbound event delivered by a hub channel
#[derive(Debug)]
pub enum HubEvent {
    /// Desired-property patch for the twin (includes the initial twin fetch)
    DesiredProperties(serde_json::Value),

    /// Direct-method invocation awaiting a response
    DirectMethod(MethodInvocation),

    /// Message routed into one of the module's input channels
    InputMessage(RoutedMessage),

    /// Transport-level failure; the channel keeps retrying underneath
    ConnectionError(String),
}

/// Response to a direct-method invocation
#[derive(Debug, Clone)]
pub struct MethodResponse {
    pub status: u16,
    pub payload: serde_json::Value,
}

/// A direct-method call; the handler must consume it with [`respond`].
///
/// [`respond`]: MethodInvocation::respond
#[derive(Debug)]
pub struct MethodInvocation {
    pub name: String,
    pub payload: serde_json::Value,
    responder: oneshot::Sender<MethodResponse>,
}

impl MethodInvocation {
    pub fn new(
        name: String,
        payload: serde_json::Value,
    ) -> (Self, oneshot::Receiver<MethodResponse>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                name,
                payload,
                responder: tx,
            },
            rx,
        )
    }

    /// Send the method response back to the transport.
    pub fn respond(self, status: u16, payload: serde_json::Value) {
        let name = self.name;
        if self
            .responder
            .send(MethodResponse { status, payload })
            .is_err()
        {
            warn!("Method response for {} dropped, transport went away", name);
        }
    }
}

/// Message routed into an input channel of the module
#[derive(Debug, Clone)]
pub struct RoutedMessage {
    /// Input channel name
    pub input: String,

    /// Raw message body
    pub body: Vec<u8>,

    /// Application properties attached to the message
    pub properties: HashMap<String, String>,

    /// Transport delivery handle used for acknowledgement
    pub delivery_id: u64,
}

impl RoutedMessage {
    /// Application property lookup.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Outbound operations shared by device and module channels
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    /// Publish a telemetry event.
    async fn send_event(&self, body: serde_json::Value) -> Result<(), GatewayError>;

    /// Patch reported twin properties.
    async fn update_reported(&self, patch: serde_json::Value) -> Result<(), GatewayError>;

    /// Next inbound event; `None` once the channel is closed.
    async fn recv(&self) -> Option<HubEvent>;

    /// Disconnect and stop the event pump.
    async fn close(&self) -> Result<(), GatewayError>;
}

/// Module-scoped channel: everything a device channel does, plus routed
/// inputs and method invocation on sibling modules.
#[async_trait]
pub trait ModuleChannel: DeviceChannel {
    /// Invoke a direct method on another module through the edge hub.
    async fn invoke_module_method(
        &self,
        target_device: &str,
        target_module: &str,
        params: &pipeline_api::models::MethodParams,
    ) -> Result<serde_json::Value, GatewayError>;

    /// Acknowledge a routed message (at-least-once delivery).
    async fn complete(&self, message: &RoutedMessage) -> Result<(), GatewayError>;
}

/// Opens hub connections from connection strings
#[async_trait]
pub trait HubTransport: Send + Sync {
    async fn connect_device(
        &self,
        connection_string: &str,
    ) -> Result<Arc<dyn DeviceChannel>, GatewayError>;

    async fn connect_module(
        &self,
        connection_string: &str,
    ) -> Result<Arc<dyn ModuleChannel>, GatewayError>;
}
