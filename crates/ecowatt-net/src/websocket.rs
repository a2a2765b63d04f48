//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "WebSocket streams for live readings and alert topics."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use ecowatt_metrics::PipelineMetrics;
use ecowatt_model::AlertNotification;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::alerts::{AlertTopics, TopicBroadcaster};
use crate::registry::{ClientMessage, ConnectionId, ServerMessage, SubscriptionRegistry};

const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Shared state for the WebSocket routes.
#[derive(Clone)]
pub struct WebSocketState {
    registry: Arc<SubscriptionRegistry>,
    topics: AlertTopics,
    queue_capacity: usize,
    metrics: Option<PipelineMetrics>,
}

impl WebSocketState {
    /// State over an existing registry and topic set.
    pub fn new(registry: Arc<SubscriptionRegistry>, topics: AlertTopics) -> Self {
        Self {
            registry,
            topics,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            metrics: None,
        }
    }

    /// Messages buffered per `/ws/energy` connection; a client that falls
    /// further behind misses readings until it catches up.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Track open connections in `metrics`.
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn opened(&self, stream: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.connection_opened(stream);
        }
    }

    fn closed(&self, stream: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.connection_closed(stream);
        }
    }
}

/// Routes `/ws/energy`, `/ws/alerts` and `/ws/system`.
pub fn router(state: WebSocketState) -> Router {
    Router::new()
        .route("/ws/energy", get(energy_upgrade))
        .route("/ws/alerts", get(alerts_upgrade))
        .route("/ws/system", get(system_upgrade))
        .with_state(Arc::new(state))
}

async fn energy_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WebSocketState>>,
) -> axum::response::Response {
    ws.on_upgrade(|socket| energy_loop(socket, state))
}

async fn alerts_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WebSocketState>>,
) -> axum::response::Response {
    let topic = state.topics.alerts.clone();
    ws.on_upgrade(move |socket| topic_loop(socket, state, topic))
}

async fn system_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WebSocketState>>,
) -> axum::response::Response {
    let topic = state.topics.system.clone();
    ws.on_upgrade(move |socket| topic_loop(socket, state, topic))
}

async fn energy_loop(mut socket: WebSocket, state: Arc<WebSocketState>) {
    let (tx, mut outbound) = mpsc::channel::<String>(state.queue_capacity);
    let connection = state.registry.connect(Arc::new(tx));
    state.opened("energy");

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(text) = queued else {
                    break;
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    break;
                };

                match message {
                    Message::Text(text) => handle_client_text(&state.registry, connection, &text),
                    Message::Binary(_) => reject(&state.registry, connection, "binary frames are not supported"),
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }

    state.registry.disconnect(connection);
    state.closed("energy");
}

fn handle_client_text(registry: &SubscriptionRegistry, connection: ConnectionId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe { device_id }) => {
            registry.subscribe(connection, &device_id);
        }
        Ok(ClientMessage::Unsubscribe { device_id }) => {
            registry.unsubscribe(connection, &device_id);
        }
        Err(err) => {
            warn!(connection, error = %err, "invalid subscription message");
            reject(registry, connection, &format!("invalid message: {err}"));
        }
    }
}

fn reject(registry: &SubscriptionRegistry, connection: ConnectionId, reason: &str) {
    let reply = ServerMessage::Error {
        message: reason.to_owned(),
    };
    if let Err(err) = registry.send_to(connection, &reply) {
        debug!(connection, error = %err, "could not deliver error reply");
    }
}

async fn topic_loop(mut socket: WebSocket, state: Arc<WebSocketState>, topic: TopicBroadcaster) {
    let mut alerts = topic.subscribe();
    state.opened(topic.name());

    loop {
        tokio::select! {
            alert = alerts.recv() => {
                let alert: AlertNotification = match alert {
                    Ok(alert) => alert,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = topic.name(), skipped, "topic listener lagged behind; dropping alerts");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let Ok(text) = serde_json::to_string(&alert) else {
                    warn!(topic = topic.name(), "failed to serialise alert");
                    continue;
                };

                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.closed(topic.name());
}
