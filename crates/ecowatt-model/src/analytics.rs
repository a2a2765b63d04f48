//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Analytics results exchanged between the pipeline and its clients."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::telemetry::AnomalyKind;

/// Anomaly type recorded for statistical outliers.
pub const Z_SCORE_ANOMALY: &str = "Z-SCORE";

/// A flagged reading as persisted by the anomaly repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    /// Fresh identifier assigned on detection.
    pub id: Uuid,
    /// Owning device.
    pub device_id: Uuid,
    /// Detection method or fault label.
    #[serde(rename = "type")]
    pub anomaly_type: String,
    /// Offending power value.
    pub value: f64,
    /// When the anomaly was detected.
    pub detected_at: DateTime<Utc>,
}

impl Anomaly {
    /// Statistical outlier found by the Z-score detector.
    pub fn z_score(device_id: Uuid, value: f64, detected_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id,
            anomaly_type: Z_SCORE_ANOMALY.to_owned(),
            value,
            detected_at,
        }
    }

    /// Fault deliberately injected by the generator.
    pub fn injected(
        device_id: Uuid,
        kind: AnomalyKind,
        value: f64,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id,
            anomaly_type: kind.as_str().to_uppercase(),
            value,
            detected_at,
        }
    }
}

/// Forecast produced by the digital twin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerConsumption {
    /// Predicted power.
    pub predicted_value: f64,
    /// Instant the prediction targets.
    pub timestamp: DateTime<Utc>,
    /// Width of the confidence interval around the prediction.
    pub confidence_interval: f64,
    /// Method label.
    pub prediction_method: String,
}

impl PowerConsumption {
    /// Method label used when no history was available.
    pub const NO_DATA: &'static str = "No Data";
    /// Method label of the moving-average predictor.
    pub const SIMPLE_AVERAGE: &'static str = "SimpleAverage";

    /// Result returned for an empty history.
    pub fn no_data(timestamp: DateTime<Utc>) -> Self {
        Self {
            predicted_value: 0.0,
            timestamp,
            confidence_interval: 0.0,
            prediction_method: Self::NO_DATA.to_owned(),
        }
    }

    /// True when the prediction carries no information.
    pub fn is_no_data(&self) -> bool {
        self.prediction_method == Self::NO_DATA
    }
}

/// Outcome of a what-if scenario applied to the latest reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    /// Power of the latest reading.
    pub original_power: f64,
    /// Power after the adjustments.
    pub simulated_power: f64,
    /// Adjustments as submitted, keyed by parameter name.
    pub parameters: BTreeMap<String, f64>,
    /// Human readable description of the adjustments.
    pub scenario: String,
    /// Relative change in percent.
    pub impact: f64,
}

impl SimulationResult {
    /// Scenario label used when the device has no history.
    pub const NO_DATA: &'static str = "No Data";

    /// Result returned for an empty history.
    pub fn no_data(parameters: BTreeMap<String, f64>) -> Self {
        Self {
            original_power: 0.0,
            simulated_power: 0.0,
            parameters,
            scenario: Self::NO_DATA.to_owned(),
            impact: 0.0,
        }
    }
}
