//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation module exports and shared types."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Synthetic telemetry for EcoWatt devices.
//!
//! [`baseline`] holds the per-type nominal operating point and the daily load
//! curve; [`generator`] turns those into noisy readings with the occasional
//! injected fault.

pub mod baseline;
pub mod generator;

pub use baseline::{baseline_for, daily_pattern, Baseline};
pub use generator::{GeneratedReading, GeneratorSettings, TelemetryGenerator};
