//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "REST query surface and API server lifecycle."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use ecowatt_model::{AlertNotification, Anomaly, Device, PowerConsumption, Reading, SimulationResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alerts::AlertDispatcher;
use crate::websocket::{self, WebSocketState};

const DEFAULT_WINDOW_HOURS: i64 = 24;
const MAX_WINDOW_HOURS: i64 = 24 * 366;

/// Electrical values submitted for ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    /// Volts.
    pub voltage: f64,
    /// Amperes.
    pub current: f64,
    /// Watts; derived from voltage and current when absent.
    #[serde(default)]
    pub power: Option<f64>,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Sample time; the receive time when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl IngestRequest {
    /// Turn the request into a reading for `device_id`, stamped `received_at` when untimed.
    pub fn into_reading(self, device_id: Uuid, received_at: DateTime<Utc>) -> Reading {
        Reading {
            device_id: device_id.to_string(),
            voltage: self.voltage,
            current: self.current,
            power: self.power.unwrap_or(self.voltage * self.current),
            temperature: self.temperature,
            timestamp: self.timestamp.unwrap_or(received_at),
        }
    }
}

/// Body of `POST /api/system/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMessageRequest {
    /// Text broadcast to every system topic listener.
    pub message: String,
}

/// Errors returned by [`TelemetryApi`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No device with this id exists.
    #[error("device {0} not found")]
    DeviceNotFound(Uuid),
    /// Path segment is not a UUID.
    #[error("invalid device id {0:?}")]
    InvalidDeviceId(String),
    /// Request body or query is unusable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A collaborator failed.
    #[error("upstream unavailable: {0}")]
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidDeviceId(_) | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// On-demand operations exposed over REST.
#[async_trait]
pub trait TelemetryApi: Send + Sync + 'static {
    /// Every known device.
    async fn devices(&self) -> Result<Vec<Device>, ApiError>;

    /// Forecast consumption from the last `lookback` of history.
    async fn predict(&self, device_id: Uuid, lookback: Duration) -> Result<PowerConsumption, ApiError>;

    /// Apply percentage adjustments to the latest reading.
    async fn simulate(
        &self,
        device_id: Uuid,
        parameters: BTreeMap<String, f64>,
    ) -> Result<SimulationResult, ApiError>;

    /// Run anomaly detection over the last `lookback` of history.
    async fn detect(&self, device_id: Uuid, lookback: Duration) -> Result<Vec<Anomaly>, ApiError>;

    /// Accept an externally measured reading.
    async fn ingest(&self, device_id: Uuid, request: IngestRequest) -> Result<Reading, ApiError>;
}

struct RestState {
    api: Arc<dyn TelemetryApi>,
    dispatcher: AlertDispatcher,
}

/// Builder used to configure and spawn the API server.
#[derive(Clone)]
pub struct ApiServerBuilder {
    listen: SocketAddr,
    api: Arc<dyn TelemetryApi>,
    dispatcher: AlertDispatcher,
    websocket: WebSocketState,
}

impl ApiServerBuilder {
    /// Construct a new builder from mandatory components.
    pub fn new(
        listen: SocketAddr,
        api: Arc<dyn TelemetryApi>,
        dispatcher: AlertDispatcher,
        websocket: WebSocketState,
    ) -> Self {
        Self {
            listen,
            api,
            dispatcher,
            websocket,
        }
    }

    /// The full router: REST routes plus the WebSocket streams.
    pub fn router(&self) -> Router {
        let state = Arc::new(RestState {
            api: self.api.clone(),
            dispatcher: self.dispatcher.clone(),
        });
        Router::new()
            .route("/health", get(get_health))
            .route("/api/devices", get(list_devices))
            .route("/api/devices/:id/prediction", get(get_prediction))
            .route("/api/devices/:id/simulation", post(post_simulation))
            .route("/api/devices/:id/anomalies", get(get_anomalies))
            .route("/api/devices/:id/readings", post(post_reading))
            .route("/api/system/messages", post(post_system_message))
            .with_state(state)
            .merge(websocket::router(self.websocket.clone()))
            .layer(TraceLayer::new_for_http())
    }

    /// Spawn the server and return a handle that can be awaited for shutdown.
    pub async fn spawn(self) -> anyhow::Result<ApiServerHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "api server listening");

        let router = self.router();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "api server exited with error");
            }
        });

        Ok(ApiServerHandle {
            address: local_addr,
            task,
            shutdown: shutdown_tx,
        })
    }
}

/// Handle returned from [`ApiServerBuilder::spawn`].
pub struct ApiServerHandle {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl ApiServerHandle {
    /// Retrieve the socket address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WindowQuery {
    hours: Option<i64>,
}

impl WindowQuery {
    fn lookback(&self) -> Result<Duration, ApiError> {
        let hours = self.hours.unwrap_or(DEFAULT_WINDOW_HOURS);
        if !(1..=MAX_WINDOW_HOURS).contains(&hours) {
            return Err(ApiError::InvalidRequest(format!(
                "hours must lie within 1..={MAX_WINDOW_HOURS}"
            )));
        }
        Ok(Duration::hours(hours))
    }
}

fn parse_device_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::InvalidDeviceId(raw.to_owned()))
}

async fn get_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_devices(State(state): State<Arc<RestState>>) -> Result<Json<Vec<Device>>, ApiError> {
    Ok(Json(state.api.devices().await?))
}

async fn get_prediction(
    State(state): State<Arc<RestState>>,
    Path(id): Path<String>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<PowerConsumption>, ApiError> {
    let device_id = parse_device_id(&id)?;
    let prediction = state.api.predict(device_id, window.lookback()?).await?;
    Ok(Json(prediction))
}

async fn post_simulation(
    State(state): State<Arc<RestState>>,
    Path(id): Path<String>,
    Json(parameters): Json<BTreeMap<String, f64>>,
) -> Result<Json<SimulationResult>, ApiError> {
    let device_id = parse_device_id(&id)?;
    Ok(Json(state.api.simulate(device_id, parameters).await?))
}

async fn get_anomalies(
    State(state): State<Arc<RestState>>,
    Path(id): Path<String>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<Vec<Anomaly>>, ApiError> {
    let device_id = parse_device_id(&id)?;
    Ok(Json(state.api.detect(device_id, window.lookback()?).await?))
}

async fn post_reading(
    State(state): State<Arc<RestState>>,
    Path(id): Path<String>,
    Json(request): Json<IngestRequest>,
) -> Result<(StatusCode, Json<Reading>), ApiError> {
    let device_id = parse_device_id(&id)?;
    let reading = state.api.ingest(device_id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(reading)))
}

async fn post_system_message(
    State(state): State<Arc<RestState>>,
    Json(request): Json<SystemMessageRequest>,
) -> Result<(StatusCode, Json<AlertNotification>), ApiError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(ApiError::InvalidRequest("message must not be empty".into()));
    }
    let alert = state.dispatcher.broadcast_system_message(message);
    Ok((StatusCode::ACCEPTED, Json(alert)))
}
