//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-connection device subscriptions and reading fan-out."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Identifier handed out by [`SubscriptionRegistry::connect`].
pub type ConnectionId = u64;

/// Raised when a message cannot be queued for a connection.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The receiving side of the connection has gone away.
    #[error("connection closed")]
    Closed,
    /// The connection's queue is full; the message was dropped.
    #[error("connection queue full")]
    Lagged,
    /// The message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound half of a live connection. Implementations must not block.
pub trait ConnectionSink: Send + Sync {
    /// Queue a serialised message for delivery.
    fn deliver(&self, message: String) -> Result<(), DeliveryError>;
}

impl ConnectionSink for mpsc::Sender<String> {
    fn deliver(&self, message: String) -> Result<(), DeliveryError> {
        self.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Lagged,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Messages sent from the server to subscription clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the connection is registered.
    Connection {
        /// Always `connected`.
        status: String,
    },
    /// Acknowledges a subscription.
    Subscribed {
        /// Device now followed.
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    /// A reading for a followed device.
    EnergyData {
        /// Device the reading belongs to.
        #[serde(rename = "deviceId")]
        device_id: String,
        /// The reading itself.
        data: Value,
    },
    /// Rejection of a malformed client message.
    Error {
        /// Human readable reason.
        message: String,
    },
}

impl ServerMessage {
    fn encode(&self) -> Result<String, DeliveryError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages accepted from subscription clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Follow a device.
    Subscribe {
        /// Device to follow; unknown ids are accepted.
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    /// Stop following a device.
    Unsubscribe {
        /// Device to drop.
        #[serde(rename = "deviceId")]
        device_id: String,
    },
}

/// Outcome of one fan-out call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    /// Connections the message was queued for.
    pub delivered: usize,
    /// Subscribed connections whose queue rejected the message.
    pub failed: usize,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Arc<dyn ConnectionSink>>,
    subscriptions: HashMap<ConnectionId, HashSet<String>>,
}

/// Tracks live connections and the devices each one follows.
///
/// Both maps sit behind a single lock. Fan-out queues messages while holding
/// the read lock and disconnect takes the write lock, so once
/// [`disconnect`](Self::disconnect) returns the connection receives nothing
/// further.
#[derive(Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and greet it.
    pub fn connect(&self, sink: Arc<dyn ConnectionSink>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let greeting = ServerMessage::Connection {
            status: "connected".to_owned(),
        };
        {
            let mut state = self.state.write();
            state.connections.insert(id, sink.clone());
            state.subscriptions.insert(id, HashSet::new());
        }
        if let Err(err) = greeting.encode().and_then(|text| sink.deliver(text)) {
            warn!(connection = id, error = %err, "failed to greet connection");
        }
        debug!(connection = id, "subscription client connected");
        id
    }

    /// Follow `device_id` on behalf of `connection` and acknowledge it.
    ///
    /// Returns `false` when the connection is not registered.
    pub fn subscribe(&self, connection: ConnectionId, device_id: &str) -> bool {
        let sink = {
            let mut state = self.state.write();
            let Some(sink) = state.connections.get(&connection).cloned() else {
                return false;
            };
            state
                .subscriptions
                .entry(connection)
                .or_default()
                .insert(device_id.to_owned());
            sink
        };
        let ack = ServerMessage::Subscribed {
            device_id: device_id.to_owned(),
        };
        if let Err(err) = ack.encode().and_then(|text| sink.deliver(text)) {
            warn!(connection, device_id, error = %err, "failed to acknowledge subscription");
        }
        debug!(connection, device_id, "subscribed");
        true
    }

    /// Stop following `device_id`. Unknown pairs are ignored.
    pub fn unsubscribe(&self, connection: ConnectionId, device_id: &str) {
        if let Some(devices) = self.state.write().subscriptions.get_mut(&connection) {
            devices.remove(device_id);
        }
        debug!(connection, device_id, "unsubscribed");
    }

    /// Forget a connection and all of its subscriptions.
    pub fn disconnect(&self, connection: ConnectionId) {
        let mut state = self.state.write();
        state.connections.remove(&connection);
        state.subscriptions.remove(&connection);
        debug!(connection, "subscription client disconnected");
    }

    /// Queue `data` for every connection following `device_id`.
    ///
    /// A connection whose queue rejects the message is logged and skipped.
    pub fn fan_out(&self, device_id: &str, data: Value) -> FanOutReport {
        let message = ServerMessage::EnergyData {
            device_id: device_id.to_owned(),
            data,
        };
        let text = match message.encode() {
            Ok(text) => text,
            Err(err) => {
                warn!(device_id, error = %err, "failed to encode energy data");
                return FanOutReport::default();
            }
        };

        let mut report = FanOutReport::default();
        let state = self.state.read();
        for (connection, devices) in &state.subscriptions {
            if !devices.contains(device_id) {
                continue;
            }
            let Some(sink) = state.connections.get(connection) else {
                continue;
            };
            match sink.deliver(text.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(connection, device_id, error = %err, "delivery failed; skipping connection");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Queue a raw message for one connection.
    pub fn send_to(&self, connection: ConnectionId, message: &ServerMessage) -> Result<(), DeliveryError> {
        let sink = self
            .state
            .read()
            .connections
            .get(&connection)
            .cloned()
            .ok_or(DeliveryError::Closed)?;
        sink.deliver(message.encode()?)
    }

    /// Devices followed by `connection`.
    pub fn subscriptions(&self, connection: ConnectionId) -> HashSet<String> {
        self.state
            .read()
            .subscriptions
            .get(&connection)
            .cloned()
            .unwrap_or_default()
    }

    /// Connections following `device_id`.
    pub fn subscribers(&self, device_id: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .state
            .read()
            .subscriptions
            .iter()
            .filter(|(_, devices)| devices.contains(device_id))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }
}
