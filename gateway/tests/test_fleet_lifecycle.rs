//! Fleet lifecycle tests
//!
//! Drives the orchestrator end to end against in-memory hub and identity
//! doubles: onboarding, inference routing, pipeline methods, teardown, and
//! the module farewell.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use identity_api::models::{
    DeviceRecord, RegisterDeviceResponse, RegistrationPayload, RegistrationState,
};
use pipeline_api::models::{methods, MethodParams};

use lensgate::device::{
    commands as device_commands, events as device_events, keys as device_keys, props, states,
    telemetry, CameraInfo, DetectionType,
};
use lensgate::errors::GatewayError;
use lensgate::filesys::Dir;
use lensgate::fleet::orchestrator::{FleetOptions, FleetOrchestrator};
use lensgate::fleet::router::SUBJECT_PROPERTY;
use lensgate::fleet::{events, inputs, keys, states as module_states};
use lensgate::hub::{
    DeviceChannel, HubEvent, HubTransport, MethodInvocation, ModuleChannel, RoutedMessage,
};
use lensgate::provision::identity::IdentityApi;
use lensgate::storage::StateStore;
use lensgate::telemetry::{SystemProbe, SystemProperties};

const MODULE_CONNECTION: &str =
    "HostName=hub.test.local;DeviceId=edge-box-1;ModuleId=lensgate;SharedAccessKey=bW9kdWxlLWtleQ==";

/// In-memory channel recording everything the gateway sends through it.
///
/// The feeder half of the inbox stays inside the struct, so `recv` pends
/// instead of reporting a closed channel once the queue drains.
struct FakeChannel {
    sent: Mutex<Vec<Value>>,
    reported: Mutex<Vec<Value>>,
    invocations: Mutex<Vec<String>>,
    completed: Mutex<Vec<u64>>,
    closed: AtomicBool,
    inbox: tokio::sync::Mutex<mpsc::Receiver<HubEvent>>,
    feeder: mpsc::Sender<HubEvent>,
}

impl FakeChannel {
    fn new() -> Arc<Self> {
        let (feeder, inbox) = mpsc::channel(16);
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            reported: Mutex::new(Vec::new()),
            invocations: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            inbox: tokio::sync::Mutex::new(inbox),
            feeder,
        })
    }

    async fn feed(&self, event: HubEvent) {
        self.feeder.send(event).await.unwrap();
    }

    /// Values sent under `key`, in send order.
    fn sent_key(&self, key: &str) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|body| body.get(key).cloned())
            .collect()
    }

    /// First reported patch carrying `key`.
    fn reported_with(&self, key: &str) -> Option<Value> {
        self.reported
            .lock()
            .unwrap()
            .iter()
            .find(|patch| patch.get(key).is_some())
            .cloned()
    }

    fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }

    fn completed(&self) -> Vec<u64> {
        self.completed.lock().unwrap().clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceChannel for FakeChannel {
    async fn send_event(&self, body: Value) -> Result<(), GatewayError> {
        self.sent.lock().unwrap().push(body);
        Ok(())
    }

    async fn update_reported(&self, patch: Value) -> Result<(), GatewayError> {
        self.reported.lock().unwrap().push(patch);
        Ok(())
    }

    async fn recv(&self) -> Option<HubEvent> {
        self.inbox.lock().await.recv().await
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ModuleChannel for FakeChannel {
    async fn invoke_module_method(
        &self,
        _target_device: &str,
        _target_module: &str,
        params: &MethodParams,
    ) -> Result<Value, GatewayError> {
        self.invocations
            .lock()
            .unwrap()
            .push(params.method_name.clone());
        Ok(json!({ "status": 200, "payload": {} }))
    }

    async fn complete(&self, message: &RoutedMessage) -> Result<(), GatewayError> {
        self.completed.lock().unwrap().push(message.delivery_id);
        Ok(())
    }
}

/// Transport handing out fake channels. Device channels come pre-seeded with
/// one empty desired patch, so a proxy's first settings pass completes.
struct FakeHub {
    module: Mutex<Option<Arc<FakeChannel>>>,
    devices: Mutex<Vec<Arc<FakeChannel>>>,
}

impl FakeHub {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            module: Mutex::new(None),
            devices: Mutex::new(Vec::new()),
        })
    }

    fn module_channel(&self) -> Arc<FakeChannel> {
        self.module.lock().unwrap().clone().unwrap()
    }

    fn device_channel(&self, index: usize) -> Arc<FakeChannel> {
        self.devices.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl HubTransport for FakeHub {
    async fn connect_device(
        &self,
        _connection_string: &str,
    ) -> Result<Arc<dyn DeviceChannel>, GatewayError> {
        let channel = FakeChannel::new();
        channel
            .feed(HubEvent::DesiredProperties(json!({ "$version": 1 })))
            .await;
        self.devices.lock().unwrap().push(channel.clone());
        Ok(channel)
    }

    async fn connect_module(
        &self,
        _connection_string: &str,
    ) -> Result<Arc<dyn ModuleChannel>, GatewayError> {
        let channel = FakeChannel::new();
        *self.module.lock().unwrap() = Some(channel.clone());
        Ok(channel)
    }
}

/// Identity service double assigning every registration to a fixed hub.
struct FakeIdentity {
    registered: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeIdentity {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            registered: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        })
    }

    fn registered(&self) -> Vec<String> {
        self.registered.lock().unwrap().clone()
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityApi for FakeIdentity {
    async fn register(
        &self,
        _host: &str,
        _scope_id: &str,
        registration_id: &str,
        _derived_key: &SecretString,
        _payload: &RegistrationPayload,
    ) -> Result<RegisterDeviceResponse, GatewayError> {
        self.registered
            .lock()
            .unwrap()
            .push(registration_id.to_string());
        Ok(RegisterDeviceResponse {
            status: "assigned".to_string(),
            registration_state: Some(RegistrationState {
                assigned_hub: Some("hub.test.local".to_string()),
                device_id: Some(registration_id.to_string()),
                status: Some("assigned".to_string()),
                error_message: None,
            }),
        })
    }

    async fn list_devices(
        &self,
        _host: &str,
        _token: &SecretString,
    ) -> Result<Vec<DeviceRecord>, GatewayError> {
        Ok(Vec::new())
    }

    async fn device_properties(
        &self,
        _host: &str,
        _token: &SecretString,
        _device_id: &str,
    ) -> Result<Value, GatewayError> {
        Ok(Value::Null)
    }

    async fn delete_device(
        &self,
        _host: &str,
        _token: &SecretString,
        device_id: &str,
    ) -> Result<(), GatewayError> {
        self.deleted.lock().unwrap().push(device_id.to_string());
        Ok(())
    }
}

struct FakeProbe;

impl SystemProbe for FakeProbe {
    fn collect(&self) -> SystemProperties {
        SystemProperties {
            cpu_model: "test-cpu".to_string(),
            cpu_cores: 4,
            cpu_usage: 12.0,
            os_name: "linux".to_string(),
            total_memory_kb: 8192,
            free_memory_kb: 4096,
            hostname: "edge-box".to_string(),
        }
    }
}

struct Fixture {
    orchestrator: Arc<FleetOrchestrator>,
    hub: Arc<FakeHub>,
    identity: Arc<FakeIdentity>,
    module: Arc<FakeChannel>,
    _restart_rx: mpsc::Receiver<String>,
    dir: Dir,
}

/// Bring up an orchestrator with a connected module and synced settings.
async fn fixture() -> Fixture {
    let dir = Dir::create_temp_dir("lensgate-lifecycle-test").await.unwrap();
    dir.file("motionGraphTopology.json")
        .write_string(r#"{ "name": "MotionDetection", "@apiVersion": "1.0", "properties": {} }"#)
        .await
        .unwrap();
    dir.file("motionGraphInstance.json")
        .write_string(
            r#"{ "name": "det-###CameraId", "@apiVersion": "1.0", "properties": { "parameters": [] } }"#,
        )
        .await
        .unwrap();

    let hub = FakeHub::new();
    let identity = FakeIdentity::new();
    let (restart_tx, restart_rx) = mpsc::channel(4);
    let options = FleetOptions {
        content_dir: dir.path().to_path_buf(),
        first_sync_timeout: Duration::from_secs(1),
        health_check_retries: 3,
        restart_grace: Duration::ZERO,
    };
    let orchestrator = FleetOrchestrator::new(
        options,
        hub.clone(),
        identity.clone(),
        Arc::new(StateStore::new(dir.clone())),
        Arc::new(FakeProbe),
        restart_tx,
    );

    orchestrator
        .connect_module(&SecretString::from(MODULE_CONNECTION.to_string()))
        .await
        .unwrap();
    orchestrator
        .clone()
        .handle_event(HubEvent::DesiredProperties(module_settings_patch()))
        .await;
    orchestrator
        .await_first_sync(Duration::from_secs(1))
        .await
        .unwrap();

    let module = hub.module_channel();
    Fixture {
        orchestrator,
        hub,
        identity,
        module,
        _restart_rx: restart_rx,
        dir,
    }
}

fn module_settings_patch() -> Value {
    json!({
        (keys::IDENTITY_SERVICE_HOST): { "value": "identity.test.local" },
        (keys::IDENTITY_SERVICE_API_TOKEN): { "value": "token-1" },
        (keys::MASTER_PROVISION_KEY): { "value": "bWFzdGVyLWtleQ==" },
        (keys::SCOPE_ID): { "value": "0ne000FLEET" },
        (keys::GATEWAY_INSTANCE_ID): { "value": "edge-box-1" },
        (keys::GATEWAY_MODULE_ID): { "value": "lensgate" },
        (keys::PIPELINE_MODULE_ID): { "value": "pipeline" },
        "$version": 1,
    })
}

fn camera(camera_id: &str, detection_type: DetectionType) -> CameraInfo {
    CameraInfo {
        camera_id: camera_id.to_string(),
        camera_name: "Dock east".to_string(),
        rtsp_url: "rtsp://10.0.0.5/live".to_string(),
        rtsp_auth_username: "viewer".to_string(),
        rtsp_auth_password: "secret".to_string(),
        detection_type,
    }
}

fn telemetry_message(delivery_id: u64, subject: &str, inferences: Value) -> RoutedMessage {
    RoutedMessage {
        input: inputs::PIPELINE_TELEMETRY.to_string(),
        body: serde_json::to_vec(&json!({ "inferences": inferences })).unwrap(),
        properties: HashMap::from([(SUBJECT_PROPERTY.to_string(), subject.to_string())]),
        delivery_id,
    }
}

async fn wait_until(what: &str, check: impl Fn() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting until {}", what);
}

#[tokio::test]
async fn test_create_camera_provisions_and_connects() {
    let fx = fixture().await;

    let result = fx
        .orchestrator
        .create_camera(camera("cam1", DetectionType::Motion))
        .await;

    assert!(result.provisioned, "{}", result.provision_message);
    assert!(result.connected, "{}", result.connection_message);
    assert!(result.connection_string.is_some());
    assert_eq!(fx.orchestrator.camera_count().await, 1);
    assert_eq!(fx.orchestrator.camera_ids().await, vec!["cam1".to_string()]);
    assert_eq!(fx.identity.registered(), vec!["cam1".to_string()]);

    let device = fx.hub.device_channel(0);
    let identity_patch = device.reported_with(props::CAMERA_NAME).unwrap();
    assert_eq!(identity_patch[props::CAMERA_NAME], "Dock east");
    assert_eq!(
        identity_patch[props::FLEET_DEVICE_TAG],
        "edge-box-1:FleetCameraDevice.v1"
    );

    // The empty desired patch re-defaults and reports the known settings.
    let settings_patch = device.reported_with(device_keys::AUTO_START).unwrap();
    assert_eq!(settings_patch[device_keys::AUTO_START], false);

    let ready_patch = device.reported_with(props::VIDEO_PLAYBACK_URL).unwrap();
    assert_eq!(
        ready_patch[props::VIDEO_PLAYBACK_URL],
        "https://localhost:8094/cam1"
    );

    assert_eq!(
        device.sent_key(states::HUB_CLIENT_STATE),
        vec![json!(states::CONNECTED)]
    );
    assert_eq!(
        device.sent_key(states::CAMERA_STATE),
        vec![json!(states::INACTIVE)]
    );
    assert_eq!(fx.module.sent_key(events::CREATE_CAMERA), vec![json!("cam1")]);

    fx.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_camera_id_is_rejected_while_live() {
    let fx = fixture().await;

    let first = fx
        .orchestrator
        .create_camera(camera("cam1", DetectionType::Motion))
        .await;
    assert!(first.connected);

    let second = fx
        .orchestrator
        .create_camera(camera("cam1", DetectionType::Motion))
        .await;

    assert!(!second.provisioned);
    assert!(second.provision_message.contains("already exists"));
    assert_eq!(fx.orchestrator.camera_count().await, 1);

    fx.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_pipeline_telemetry_routes_to_the_owning_camera() {
    let fx = fixture().await;
    assert!(
        fx.orchestrator
            .create_camera(camera("cam1", DetectionType::Motion))
            .await
            .connected
    );
    let device = fx.hub.device_channel(0);

    fx.orchestrator
        .clone()
        .handle_event(HubEvent::InputMessage(telemetry_message(
            7,
            "/graphInstances/det-cam1/motionDetection",
            json!([{ "type": "motion", "motion": { "box": { "l": 0.2, "t": 0.3, "w": 0.1, "h": 0.2 } } }]),
        )))
        .await;

    assert_eq!(device.sent_key(telemetry::INFERENCE).len(), 1);
    assert_eq!(device.sent_key(telemetry::INFERENCE_COUNT), vec![json!(1)]);
    assert_eq!(fx.module.completed(), vec![7]);

    // A subject for a camera this gateway does not own is acknowledged and
    // dropped.
    fx.orchestrator
        .clone()
        .handle_event(HubEvent::InputMessage(telemetry_message(
            8,
            "/graphInstances/det-ghost/motionDetection",
            json!([{ "type": "motion" }]),
        )))
        .await;

    assert_eq!(device.sent_key(telemetry::INFERENCE).len(), 1);
    assert_eq!(fx.module.completed(), vec![7, 8]);

    fx.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_inference_relay_requires_a_registered_camera() {
    let fx = fixture().await;
    assert!(
        fx.orchestrator
            .create_camera(camera("cam1", DetectionType::Motion))
            .await
            .connected
    );
    let device = fx.hub.device_channel(0);

    fx.orchestrator
        .send_camera_inferences(
            "cam1",
            &[json!({ "type": "motion" }), json!({ "type": "motion" })],
        )
        .await
        .unwrap();

    assert_eq!(device.sent_key(telemetry::INFERENCE).len(), 2);
    assert_eq!(device.sent_key(telemetry::INFERENCE_COUNT), vec![json!(2)]);

    fx.orchestrator
        .send_camera_telemetry("cam1", json!({ "tlDoorOpened": 1 }))
        .await
        .unwrap();
    assert_eq!(device.sent_key("tlDoorOpened"), vec![json!(1)]);

    let error = fx
        .orchestrator
        .send_camera_inferences("ghost", &[json!({ "type": "motion" })])
        .await
        .unwrap_err();
    assert!(matches!(error, GatewayError::NotFound(_)));

    fx.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_start_pipeline_method_drives_the_graph() {
    let fx = fixture().await;
    assert!(
        fx.orchestrator
            .create_camera(camera("cam1", DetectionType::Motion))
            .await
            .connected
    );
    let device = fx.hub.device_channel(0);

    let (invocation, response_rx) =
        MethodInvocation::new(device_commands::START_PIPELINE.to_string(), json!({}));
    device.feed(HubEvent::DirectMethod(invocation)).await;

    let response = response_rx.await.unwrap();
    assert_eq!(response.status, 202);

    // The operation runs detached after the ack; its outcome lands in a
    // reported property last.
    wait_until("the start outcome is reported", || {
        device.reported_with(props::START_PIPELINE_RESULT).is_some()
    })
    .await;

    assert_eq!(
        fx.module.invocations(),
        vec![
            methods::GRAPH_TOPOLOGY_SET.to_string(),
            methods::GRAPH_INSTANCE_SET.to_string(),
            methods::GRAPH_INSTANCE_ACTIVATE.to_string(),
        ]
    );
    assert_eq!(
        device.sent_key(device_events::START_PIPELINE_COMMAND_RECEIVED),
        vec![json!("cam1")]
    );
    assert_eq!(
        device.sent_key(states::CAMERA_STATE),
        vec![json!(states::INACTIVE), json!(states::ACTIVE)]
    );
    let outcome = device.reported_with(props::START_PIPELINE_RESULT).unwrap();
    assert_eq!(outcome[props::START_PIPELINE_RESULT], "succeeded");

    fx.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_delete_camera_tears_down_identity_and_channel() {
    let fx = fixture().await;
    assert!(
        fx.orchestrator
            .create_camera(camera("cam1", DetectionType::Motion))
            .await
            .connected
    );
    let device = fx.hub.device_channel(0);

    fx.orchestrator.delete_camera("cam1").await.unwrap();

    assert_eq!(fx.orchestrator.camera_count().await, 0);
    assert_eq!(fx.identity.deleted(), vec!["cam1".to_string()]);
    assert_eq!(
        fx.module.invocations(),
        vec![
            methods::GRAPH_INSTANCE_DEACTIVATE.to_string(),
            methods::GRAPH_INSTANCE_DELETE.to_string(),
            methods::GRAPH_TOPOLOGY_DELETE.to_string(),
        ]
    );
    assert_eq!(fx.module.sent_key(events::DELETE_CAMERA), vec![json!("cam1")]);
    assert!(device.is_closed());
    assert_eq!(
        device.sent_key(states::CAMERA_STATE),
        vec![json!(states::INACTIVE), json!(states::INACTIVE)]
    );

    let error = fx.orchestrator.delete_camera("cam1").await.unwrap_err();
    assert!(matches!(error, GatewayError::NotFound(_)));

    fx.dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_module_shutdown_sends_the_farewell() {
    let fx = fixture().await;

    assert_eq!(
        fx.module.sent_key(events::MODULE_STARTED),
        vec![json!("Module started")]
    );
    assert_eq!(
        fx.module.sent_key(module_states::MODULE_STATE),
        vec![json!(states::ACTIVE)]
    );

    fx.orchestrator.shutdown().await;

    assert_eq!(
        fx.module.sent_key(events::MODULE_STOPPED),
        vec![json!("Module stopped")]
    );
    assert_eq!(
        fx.module.sent_key(module_states::MODULE_STATE),
        vec![json!(states::ACTIVE), json!(states::INACTIVE)]
    );
    assert_eq!(
        fx.module.sent_key(states::HUB_CLIENT_STATE),
        vec![json!(states::CONNECTED), json!(states::DISCONNECTED)]
    );
    assert!(fx.module.is_closed());

    fx.dir.delete().await.unwrap();
}
