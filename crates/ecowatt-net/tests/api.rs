//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Live subscriptions, alert topics, and the REST surface."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use ecowatt_model::{Anomaly, Device, PowerConsumption, Reading, SimulationResult};
use ecowatt_net::{
    AlertDispatcher, AlertTopics, ApiError, ApiServerBuilder, ApiServerHandle, IngestRequest,
    SubscriptionRegistry, TelemetryApi, WebSocketState,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

/// Fixed-answer implementation of the query surface.
struct StubApi {
    device: Device,
}

#[async_trait]
impl TelemetryApi for StubApi {
    async fn devices(&self) -> Result<Vec<Device>, ApiError> {
        Ok(vec![self.device.clone()])
    }

    async fn predict(&self, device_id: Uuid, lookback: Duration) -> Result<PowerConsumption, ApiError> {
        self.known(device_id)?;
        Ok(PowerConsumption {
            predicted_value: lookback.num_hours() as f64 * 100.0,
            timestamp: Utc::now(),
            confidence_interval: 1.0,
            prediction_method: PowerConsumption::SIMPLE_AVERAGE.into(),
        })
    }

    async fn simulate(
        &self,
        device_id: Uuid,
        parameters: BTreeMap<String, f64>,
    ) -> Result<SimulationResult, ApiError> {
        self.known(device_id)?;
        Ok(SimulationResult::no_data(parameters))
    }

    async fn detect(&self, device_id: Uuid, _lookback: Duration) -> Result<Vec<Anomaly>, ApiError> {
        self.known(device_id)?;
        Ok(vec![Anomaly::z_score(device_id, 9900.0, Utc::now())])
    }

    async fn ingest(&self, device_id: Uuid, request: IngestRequest) -> Result<Reading, ApiError> {
        self.known(device_id)?;
        Ok(request.into_reading(device_id, Utc::now()))
    }
}

impl StubApi {
    fn known(&self, device_id: Uuid) -> Result<(), ApiError> {
        if device_id == self.device.id {
            Ok(())
        } else {
            Err(ApiError::DeviceNotFound(device_id))
        }
    }
}

struct Harness {
    handle: ApiServerHandle,
    registry: Arc<SubscriptionRegistry>,
    topics: AlertTopics,
    device: Device,
}

async fn spawn() -> Harness {
    let device = Device::new(Uuid::new_v4(), "Line motor", "motor", "motor-01");
    let registry = Arc::new(SubscriptionRegistry::new());
    let topics = AlertTopics::new(16);
    let dispatcher = AlertDispatcher::new(topics.clone(), 3000.0);
    let handle = ApiServerBuilder::new(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(StubApi {
            device: device.clone(),
        }),
        dispatcher,
        WebSocketState::new(registry.clone(), topics.clone()),
    )
    .spawn()
    .await
    .unwrap();
    Harness {
        handle,
        registry,
        topics,
        device,
    }
}

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_json(socket: &mut Socket) -> Value {
    let message = timeout(std::time::Duration::from_secs(2), socket.next())
        .await
        .expect("message within deadline")
        .unwrap()
        .unwrap();
    match message {
        WsMessage::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn rest_routes_answer_and_validate() {
    let harness = spawn().await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", harness.handle.local_addr());
    let id = harness.device.id;

    let health: Value = client.get(format!("{base}/health")).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], json!("ok"));

    let devices: Vec<Device> = client
        .get(format!("{base}/api/devices"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(devices, vec![harness.device.clone()]);

    let prediction: Value = client
        .get(format!("{base}/api/devices/{id}/prediction?hours=6"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(prediction["predictedValue"], json!(600.0));

    let response = client
        .get(format!("{base}/api/devices/not-a-uuid/prediction"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = client
        .get(format!("{base}/api/devices/{}/anomalies", Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let response = client
        .get(format!("{base}/api/devices/{id}/anomalies?hours=0"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let simulation: Value = client
        .post(format!("{base}/api/devices/{id}/simulation"))
        .json(&json!({ "voltage": 10.0 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(simulation["parameters"]["voltage"], json!(10.0));

    let response = client
        .post(format!("{base}/api/devices/{id}/readings"))
        .json(&json!({ "voltage": 230.0, "current": 10.0, "temperature": 40.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    let reading: Reading = response.json().await.unwrap();
    assert_eq!(reading.power, 2300.0);

    harness.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn energy_stream_follows_subscriptions() {
    let harness = spawn().await;
    let url = format!("ws://{}/ws/energy", harness.handle.local_addr());
    let (mut socket, _response) = connect_async(&url).await.unwrap();

    assert_eq!(
        next_json(&mut socket).await,
        json!({"type": "connection", "status": "connected"})
    );

    socket
        .send(WsMessage::Text(json!({"type": "shout", "deviceId": "x"}).to_string()))
        .await
        .unwrap();
    let error = next_json(&mut socket).await;
    assert_eq!(error["type"], json!("error"));

    socket
        .send(WsMessage::Text(
            json!({"type": "subscribe", "deviceId": "dev-1"}).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(
        next_json(&mut socket).await,
        json!({"type": "subscribed", "deviceId": "dev-1"})
    );

    harness.registry.fan_out("dev-2", json!({"power": 1.0}));
    harness.registry.fan_out("dev-1", json!({"power": 3300.0}));
    assert_eq!(
        next_json(&mut socket).await,
        json!({"type": "energy_data", "deviceId": "dev-1", "data": {"power": 3300.0}})
    );

    socket
        .send(WsMessage::Text(
            json!({"type": "unsubscribe", "deviceId": "dev-1"}).to_string(),
        ))
        .await
        .unwrap();
    // Unsubscribe has no ack; wait until the registry reflects it.
    for _ in 0..50 {
        if harness.registry.subscribers("dev-1").is_empty() {
            break;
        }
        sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(harness.registry.fan_out("dev-1", json!({})).delivered, 0);
    assert!(timeout(std::time::Duration::from_millis(100), socket.next())
        .await
        .is_err());

    socket.close(None).await.unwrap();
    for _ in 0..50 {
        if harness.registry.connection_count() == 0 {
            break;
        }
        sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(harness.registry.connection_count(), 0);
    harness.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn system_messages_reach_topic_listeners() {
    let harness = spawn().await;
    let url = format!("ws://{}/ws/system", harness.handle.local_addr());
    let (mut socket, _response) = connect_async(&url).await.unwrap();
    for _ in 0..50 {
        if harness.topics.system.listener_count() > 0 {
            break;
        }
        sleep(std::time::Duration::from_millis(10)).await;
    }

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/api/system/messages", harness.handle.local_addr()))
        .json(&json!({ "message": "maintenance at noon" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    let alert = next_json(&mut socket).await;
    assert_eq!(alert["type"], json!("SYSTEM"));
    assert_eq!(alert["message"], json!("maintenance at noon"));
    assert!(alert.get("deviceId").is_none());

    let response = client
        .post(format!("http://{}/api/system/messages", harness.handle.local_addr()))
        .json(&json!({ "message": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    harness.handle.shutdown().await.unwrap();
}
