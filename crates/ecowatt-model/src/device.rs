//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry data model shared by every pipeline stage."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operational status reported by the device directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    /// Device is producing telemetry.
    #[default]
    Active,
    /// Device is switched off.
    Inactive,
    /// Device is under maintenance.
    Maintenance,
    /// Device is faulted.
    Error,
}

/// Optional operating limits attached to a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceThresholds {
    /// Lowest acceptable voltage.
    #[serde(default)]
    pub min_voltage: Option<f64>,
    /// Highest acceptable voltage.
    #[serde(default)]
    pub max_voltage: Option<f64>,
    /// Highest acceptable current.
    #[serde(default)]
    pub max_current: Option<f64>,
    /// Highest acceptable temperature.
    #[serde(default)]
    pub max_temperature: Option<f64>,
}

/// Device record owned by the device directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Stable identifier; readings carry it as `deviceId`.
    pub id: Uuid,
    /// Human readable name.
    pub name: String,
    /// Device type (motor, pump, compressor, ...), matched case-insensitively.
    #[serde(rename = "type")]
    pub device_type: String,
    /// Installation location.
    #[serde(default)]
    pub location: Option<String>,
    /// Current status; only `ACTIVE` devices are simulated.
    #[serde(default)]
    pub status: DeviceStatus,
    /// Label used by the upstream telemetry service.
    pub label: String,
    /// Operating limits.
    #[serde(default)]
    pub thresholds: DeviceThresholds,
}

impl Device {
    /// Build an active device with no thresholds.
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        device_type: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            device_type: device_type.into(),
            location: None,
            status: DeviceStatus::Active,
            label: label.into(),
            thresholds: DeviceThresholds::default(),
        }
    }

    /// Return a copy with a different status.
    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }

    /// True when the device should be simulated.
    pub fn is_active(&self) -> bool {
        self.status == DeviceStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialises_external_shape() {
        let device: Device = serde_json::from_value(json!({
            "id": "6f1c1f4e-5d0b-4a53-9b0e-0c8b1a9a0001",
            "name": "Cooling pump",
            "type": "pump",
            "label": "pump-01",
            "status": "MAINTENANCE",
            "thresholds": { "maxCurrent": 40.0 }
        }))
        .unwrap();
        assert_eq!(device.device_type, "pump");
        assert_eq!(device.status, DeviceStatus::Maintenance);
        assert!(!device.is_active());
        assert_eq!(device.thresholds.max_current, Some(40.0));
        assert_eq!(device.thresholds.min_voltage, None);
    }
}
