//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Live subscriptions, alert topics, and the REST surface."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Client-facing networking for EcoWatt.
//!
//! The [`registry`] decides which live connection receives which device's
//! readings, [`alerts`] turns analytics output into topic broadcasts, and
//! [`rest`] serves the on-demand queries plus the [`websocket`] streams from
//! one listener.
#![warn(missing_docs)]

pub mod alerts;
pub mod registry;
pub mod rest;
pub mod websocket;

pub use alerts::{
    AlertDispatcher, AlertTopics, TopicBroadcaster, ALERTS_TOPIC, DEFAULT_PREDICTION_THRESHOLD,
    SYSTEM_TOPIC,
};
pub use registry::{
    ClientMessage, ConnectionId, ConnectionSink, DeliveryError, FanOutReport, ServerMessage,
    SubscriptionRegistry,
};
pub use rest::{
    ApiError, ApiServerBuilder, ApiServerHandle, IngestRequest, SystemMessageRequest, TelemetryApi,
};
pub use websocket::WebSocketState;
