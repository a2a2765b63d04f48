//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Alert payloads published on the alert and system topics."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of an alert notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// Anomaly detected on a device.
    Anomaly,
    /// Prediction crossed the alert threshold.
    Prediction,
    /// Operator or platform broadcast.
    System,
    /// Informational message.
    Info,
}

/// Urgency attached to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// No action needed.
    Low,
    /// Worth a look.
    Medium,
    /// Act now.
    High,
}

/// Message delivered to alert and system topic subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertNotification {
    /// Device concerned, absent for system broadcasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Alert category.
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    /// Human readable message.
    pub message: String,
    /// Structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Urgency, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl AlertNotification {
    /// Build a notification stamped with the current time.
    pub fn new(alert_type: AlertType, message: impl Into<String>) -> Self {
        Self {
            device_id: None,
            alert_type,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
            severity: None,
        }
    }

    /// Attach the device identifier.
    pub fn for_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach a severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn system_alert_omits_device_and_data() {
        let alert = AlertNotification::new(AlertType::System, "maintenance at noon");
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["type"], json!("SYSTEM"));
        assert!(value.get("deviceId").is_none());
        assert!(value.get("data").is_none());
        assert!(value.get("severity").is_none());
    }

    #[test]
    fn device_alert_carries_payload() {
        let alert = AlertNotification::new(AlertType::Anomaly, "spike")
            .for_device("dev-1")
            .with_data(json!({ "value": 12.5 }))
            .with_severity(Severity::High);
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["deviceId"], json!("dev-1"));
        assert_eq!(value["data"]["value"], json!(12.5));
        assert_eq!(value["severity"], json!("HIGH"));
    }
}
