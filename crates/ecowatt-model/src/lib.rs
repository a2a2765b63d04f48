//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry data model shared by every pipeline stage."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Data model for the EcoWatt pipeline.
//!
//! Every type here serialises with camelCase field names, which is the shape
//! WebSocket subscribers and REST clients consume.
#![warn(missing_docs)]

pub mod alert;
pub mod analytics;
pub mod device;
pub mod telemetry;

pub use alert::{AlertNotification, AlertType, Severity};
pub use analytics::{Anomaly, PowerConsumption, SimulationResult, Z_SCORE_ANOMALY};
pub use device::{Device, DeviceStatus, DeviceThresholds};
pub use telemetry::{AnomalyKind, Reading};
