//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry data model shared by every pipeline stage."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One electrical sample for a device. Power is the analysed quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// Device identifier in string form (normally a UUID).
    pub device_id: String,
    /// Volts.
    pub voltage: f64,
    /// Amperes.
    pub current: f64,
    /// Watts.
    pub power: f64,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Sample time.
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Build a reading where power is derived as `voltage * current`.
    pub fn derived(
        device_id: impl Into<String>,
        voltage: f64,
        current: f64,
        temperature: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            voltage,
            current,
            power: voltage * current,
            temperature,
            timestamp,
        }
    }

    /// Build a reading that only carries a power value, as used by the analytics.
    pub fn power_only(device_id: impl Into<String>, power: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            voltage: 0.0,
            current: 0.0,
            power,
            temperature: 0.0,
            timestamp,
        }
    }

    /// Parse the device identifier as a UUID.
    pub fn device_uuid(&self) -> Result<Uuid, uuid::Error> {
        Uuid::parse_str(&self.device_id)
    }
}

/// Fault shapes the generator can inject into a synthetic reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    /// Current multiplied by 1.5.
    Spike,
    /// Voltage multiplied by 0.8.
    Sag,
    /// Temperature raised by 20 degrees.
    Overheat,
    /// Current forced to zero.
    Cutoff,
}

impl AnomalyKind {
    /// Every kind, in the order used for uniform selection.
    pub const ALL: [AnomalyKind; 4] = [
        AnomalyKind::Spike,
        AnomalyKind::Sag,
        AnomalyKind::Overheat,
        AnomalyKind::Cutoff,
    ];

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::Spike => "spike",
            AnomalyKind::Sag => "sag",
            AnomalyKind::Overheat => "overheat",
            AnomalyKind::Cutoff => "cutoff",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
