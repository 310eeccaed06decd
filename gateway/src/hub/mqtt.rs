//! MQTT implementation of the hub channels

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::errors::GatewayError;
use crate::hub::auth::{self, ConnectionString};
use crate::hub::topics::{Topics, DESIRED_PATCH_FILTER, METHODS_FILTER, TWIN_RESPONSE_FILTER};
use crate::hub::{
    DeviceChannel, HubEvent, HubTransport, MethodInvocation, MethodResponse, ModuleChannel,
    RoutedMessage,
};

/// MQTT hub transport options
#[derive(Debug, Clone)]
pub struct Options {
    /// Broker port
    pub port: u16,

    /// MQTT keep-alive interval
    pub keep_alive: Duration,

    /// Handshake timeout when opening a channel
    pub connect_timeout: Duration,

    /// Lifetime of generated SAS tokens
    pub sas_ttl_secs: i64,

    /// Hub API version sent in the username and REST calls
    pub api_version: String,

    /// Optional path to a PEM-encoded CA certificate for hub verification.
    /// When `None`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            port: 8883,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            sas_ttl_secs: 3600,
            api_version: "2021-04-12".to_string(),
            ca_cert_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelKind {
    Device,
    Module,
}

/// Hub transport over MQTT with rustls
pub struct MqttHubTransport {
    options: Options,
    http: reqwest::Client,
}

impl MqttHubTransport {
    pub fn new(options: Options) -> Result<Self, GatewayError> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(90));
        if let Some(ref ca_path) = options.ca_cert_path {
            let pem = std::fs::read(ca_path).map_err(|e| {
                GatewayError::ConfigError(format!("Failed to read CA cert {ca_path}: {e}"))
            })?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }
        let http = builder.build()?;

        Ok(Self { options, http })
    }
}

#[async_trait]
impl HubTransport for MqttHubTransport {
    async fn connect_device(
        &self,
        connection_string: &str,
    ) -> Result<Arc<dyn DeviceChannel>, GatewayError> {
        let connection = ConnectionString::parse(connection_string)?;
        let channel = MqttChannel::open(
            &self.options,
            self.http.clone(),
            connection,
            ChannelKind::Device,
        )
        .await?;
        Ok(Arc::new(channel))
    }

    async fn connect_module(
        &self,
        connection_string: &str,
    ) -> Result<Arc<dyn ModuleChannel>, GatewayError> {
        let connection = ConnectionString::parse(connection_string)?;
        if connection.module_id.is_none() {
            return Err(GatewayError::ConfigError(
                "Module connection string missing ModuleId".to_string(),
            ));
        }
        let channel = MqttChannel::open(
            &self.options,
            self.http.clone(),
            connection,
            ChannelKind::Module,
        )
        .await?;
        Ok(Arc::new(channel))
    }
}

/// One MQTT session against the hub, for a leaf device or for this module
struct MqttChannel {
    kind: ChannelKind,
    connection: ConnectionString,
    options: Options,
    client: AsyncClient,
    http: reqwest::Client,
    events: Mutex<mpsc::Receiver<HubEvent>>,
    request_seq: AtomicU64,
    deliveries: Arc<Mutex<HashMap<u64, rumqttc::Publish>>>,
    closed: Arc<AtomicBool>,
}

impl MqttChannel {
    async fn open(
        options: &Options,
        http: reqwest::Client,
        connection: ConnectionString,
        kind: ChannelKind,
    ) -> Result<Self, GatewayError> {
        let client_id = match (kind, &connection.module_id) {
            (ChannelKind::Module, Some(module_id)) => {
                format!("{}/{}", connection.device_id, module_id)
            }
            _ => connection.device_id.clone(),
        };
        let username = format!(
            "{}/{}/?api-version={}",
            connection.host_name, client_id, options.api_version
        );
        let resource = sas_resource(&connection, kind);
        let password =
            auth::generate_sas_token(&resource, &connection.shared_access_key, options.sas_ttl_secs)?;

        // A module on an edge box talks to the local edge hub, not upstream.
        let broker_host = connection
            .gateway_host_name
            .clone()
            .unwrap_or_else(|| connection.host_name.clone());

        let mut mqtt_options = MqttOptions::new(&client_id, &broker_host, options.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_credentials(&username, &password);
        if kind == ChannelKind::Module {
            // Inputs are acked explicitly after handoff to the router.
            mqtt_options.set_manual_acks(true);
        }

        {
            use rumqttc::{TlsConfiguration, Transport};
            use rustls::ClientConfig;

            let mut root_cert_store = rustls::RootCertStore::empty();

            if let Some(ref ca_path) = options.ca_cert_path {
                let ca_pem = std::fs::read(ca_path).map_err(|e| {
                    GatewayError::MqttError(format!("Failed to read CA cert {ca_path}: {e}"))
                })?;
                let mut cursor = std::io::Cursor::new(ca_pem);
                for cert in rustls_pemfile::certs(&mut cursor).flatten() {
                    let _ = root_cert_store.add(cert);
                }
            } else {
                for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
                    let _ = root_cert_store.add(cert);
                }
            }

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            mqtt_options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(client_config),
            )));
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, 10);

        let (event_tx, event_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let deliveries = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let expected_twin_rid = Arc::new(Mutex::new(None));

        let pump = Pump {
            client: client.clone(),
            events: event_tx,
            deliveries: deliveries.clone(),
            closed: closed.clone(),
            expected_twin_rid: expected_twin_rid.clone(),
            delivery_seq: AtomicU64::new(1),
            label: client_id.clone(),
        };
        tokio::spawn(pump.run(eventloop, ready_tx));

        match tokio::time::timeout(options.connect_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                return Err(GatewayError::HubError(format!(
                    "Hub handshake failed for {}: {}",
                    client_id, e
                )));
            }
            Ok(Err(_)) => {
                return Err(GatewayError::HubError(format!(
                    "Hub connection closed during handshake for {}",
                    client_id
                )));
            }
            Err(_) => {
                closed.store(true, Ordering::SeqCst);
                let _ = client.disconnect().await;
                return Err(GatewayError::HubError(format!(
                    "Timed out connecting to hub at {}",
                    broker_host
                )));
            }
        }

        client
            .subscribe(DESIRED_PATCH_FILTER, QoS::AtMostOnce)
            .await
            .map_err(|e| GatewayError::MqttError(e.to_string()))?;
        client
            .subscribe(TWIN_RESPONSE_FILTER, QoS::AtMostOnce)
            .await
            .map_err(|e| GatewayError::MqttError(e.to_string()))?;
        client
            .subscribe(METHODS_FILTER, QoS::AtLeastOnce)
            .await
            .map_err(|e| GatewayError::MqttError(e.to_string()))?;
        if kind == ChannelKind::Module {
            if let Some(ref module_id) = connection.module_id {
                let filter = Topics::module_inputs_filter(&connection.device_id, module_id);
                client
                    .subscribe(&filter, QoS::AtLeastOnce)
                    .await
                    .map_err(|e| GatewayError::MqttError(e.to_string()))?;
                info!("Subscribed to: {}", filter);
            }
        }

        // Request the twin; the response surfaces as the first desired patch.
        *expected_twin_rid.lock().await = Some("1".to_string());
        client
            .publish(Topics::twin_get(1), QoS::AtMostOnce, false, Vec::new())
            .await
            .map_err(|e| GatewayError::MqttError(e.to_string()))?;

        Ok(Self {
            kind,
            connection,
            options: options.clone(),
            client,
            http,
            events: Mutex::new(event_rx),
            request_seq: AtomicU64::new(2),
            deliveries,
            closed,
        })
    }

    fn events_topic(&self) -> String {
        match (self.kind, &self.connection.module_id) {
            (ChannelKind::Module, Some(module_id)) => {
                Topics::module_events(&self.connection.device_id, module_id)
            }
            _ => Topics::device_events(&self.connection.device_id),
        }
    }
}

fn sas_resource(connection: &ConnectionString, kind: ChannelKind) -> String {
    match (kind, &connection.module_id) {
        (ChannelKind::Module, Some(module_id)) => format!(
            "{}/devices/{}/modules/{}",
            connection.host_name, connection.device_id, module_id
        ),
        _ => format!("{}/devices/{}", connection.host_name, connection.device_id),
    }
}

#[async_trait]
impl DeviceChannel for MqttChannel {
    async fn send_event(&self, body: serde_json::Value) -> Result<(), GatewayError> {
        let payload = serde_json::to_vec(&body)?;
        self.client
            .publish(self.events_topic(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| GatewayError::MqttError(e.to_string()))?;
        Ok(())
    }

    async fn update_reported(&self, patch: serde_json::Value) -> Result<(), GatewayError> {
        let request_id = self.request_seq.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_vec(&patch)?;
        self.client
            .publish(
                Topics::twin_reported(request_id),
                QoS::AtMostOnce,
                false,
                payload,
            )
            .await
            .map_err(|e| GatewayError::MqttError(e.to_string()))?;
        Ok(())
    }

    async fn recv(&self) -> Option<HubEvent> {
        self.events.lock().await.recv().await
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.closed.store(true, Ordering::SeqCst);
        self.client
            .disconnect()
            .await
            .map_err(|e| GatewayError::MqttError(e.to_string()))?;
        debug!("Hub channel for {} closed", self.connection.device_id);
        Ok(())
    }
}

#[async_trait]
impl ModuleChannel for MqttChannel {
    async fn invoke_module_method(
        &self,
        target_device: &str,
        target_module: &str,
        params: &pipeline_api::models::MethodParams,
    ) -> Result<serde_json::Value, GatewayError> {
        let module_id = self
            .connection
            .module_id
            .as_deref()
            .ok_or_else(|| GatewayError::HubError("Not a module channel".to_string()))?;

        let resource = format!(
            "{}/devices/{}/modules/{}",
            self.connection.host_name, self.connection.device_id, module_id
        );
        let token = auth::generate_sas_token(
            &resource,
            &self.connection.shared_access_key,
            self.options.sas_ttl_secs,
        )?;

        let gateway_host = self
            .connection
            .gateway_host_name
            .as_deref()
            .unwrap_or(&self.connection.host_name);
        let url = format!(
            "https://{}/twins/{}/modules/{}/methods?api-version={}",
            gateway_host, target_device, target_module, self.options.api_version
        );
        let timeout = Duration::from_secs(
            (params.connect_timeout_in_seconds + params.response_timeout_in_seconds) as u64,
        );

        debug!(
            "Invoking {} on {}/{}",
            params.method_name, target_device, target_module
        );

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, token)
            .timeout(timeout)
            .json(params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GatewayError::PipelineError(format!(
                "Method {} returned {}: {}",
                params.method_name, status, body
            )));
        }

        Ok(serde_json::from_str(&body).unwrap_or(serde_json::Value::Null))
    }

    async fn complete(&self, message: &RoutedMessage) -> Result<(), GatewayError> {
        let publish = self.deliveries.lock().await.remove(&message.delivery_id);
        if let Some(publish) = publish {
            self.client
                .ack(&publish)
                .await
                .map_err(|e| GatewayError::MqttError(e.to_string()))?;
        }
        Ok(())
    }
}

/// Drives the rumqttc event loop and translates packets into [`HubEvent`]s
struct Pump {
    client: AsyncClient,
    events: mpsc::Sender<HubEvent>,
    deliveries: Arc<Mutex<HashMap<u64, rumqttc::Publish>>>,
    closed: Arc<AtomicBool>,
    expected_twin_rid: Arc<Mutex<Option<String>>>,
    delivery_seq: AtomicU64,
    label: String,
}

impl Pump {
    async fn run(self, mut eventloop: EventLoop, ready: oneshot::Sender<Result<(), String>>) {
        let mut ready = Some(ready);

        loop {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }

            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Hub connection established for {}", self.label);
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if self.handle_publish(publish).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    if self.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    // Before the first ConnAck a failure means the open fails.
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(e.to_string()));
                        break;
                    }
                    warn!("Hub connection error for {}: {}", self.label, e);
                    if self
                        .events
                        .send(HubEvent::ConnectionError(e.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        debug!("Hub event pump for {} stopped", self.label);
    }

    async fn handle_publish(&self, publish: rumqttc::Publish) -> Result<(), ()> {
        let topic = publish.topic.clone();

        if Topics::is_desired_patch(&topic) {
            match serde_json::from_slice(&publish.payload) {
                Ok(patch) => self.send(HubEvent::DesiredProperties(patch)).await?,
                Err(e) => debug!("Discarding malformed desired patch for {}: {}", self.label, e),
            }
            return Ok(());
        }

        if let Some((status, request_id)) = Topics::parse_twin_response(&topic) {
            let mut expected = self.expected_twin_rid.lock().await;
            if expected.as_deref() == Some(request_id.as_str()) {
                expected.take();
                drop(expected);

                if status < 300 {
                    let desired = serde_json::from_slice::<serde_json::Value>(&publish.payload)
                        .ok()
                        .and_then(|twin| twin.get("desired").cloned())
                        .unwrap_or(serde_json::Value::Null);
                    self.send(HubEvent::DesiredProperties(desired)).await?;
                } else {
                    warn!("Twin fetch for {} failed with status {}", self.label, status);
                    self.send(HubEvent::DesiredProperties(serde_json::Value::Null))
                        .await?;
                }
            }
            return Ok(());
        }

        if let Some((name, request_id)) = Topics::parse_method(&topic) {
            let payload =
                serde_json::from_slice(&publish.payload).unwrap_or(serde_json::Value::Null);
            let (invocation, response_rx) = MethodInvocation::new(name, payload);

            let client = self.client.clone();
            tokio::spawn(async move {
                let response = response_rx.await.unwrap_or(MethodResponse {
                    status: 500,
                    payload: serde_json::json!({ "message": "Handler went away" }),
                });
                let topic = Topics::method_response(&request_id, response.status);
                let body = serde_json::to_vec(&response.payload).unwrap_or_default();
                if let Err(e) = client.publish(topic, QoS::AtMostOnce, false, body).await {
                    warn!("Failed to publish method response: {}", e);
                }
            });

            self.send(HubEvent::DirectMethod(invocation)).await?;
            return Ok(());
        }

        if let Some((input, properties)) = Topics::parse_module_input(&topic) {
            let delivery_id = self.delivery_seq.fetch_add(1, Ordering::SeqCst);
            self.deliveries
                .lock()
                .await
                .insert(delivery_id, publish.clone());
            let message = RoutedMessage {
                input,
                body: publish.payload.to_vec(),
                properties,
                delivery_id,
            };
            self.send(HubEvent::InputMessage(message)).await?;
            return Ok(());
        }

        debug!("Ignoring message on unexpected topic: {}", topic);
        Ok(())
    }

    async fn send(&self, event: HubEvent) -> Result<(), ()> {
        self.events.send(event).await.map_err(|_| ())
    }
}
