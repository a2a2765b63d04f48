//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Z-score outlier detection over power readings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use ecowatt_model::{Anomaly, Reading};
use tracing::{debug, warn};

use crate::errors::{AnalyticsError, Result};
use crate::stats::summarize;

/// Flags readings whose power lies strictly more than `threshold` population
/// standard deviations from the window mean.
///
/// The window includes the candidate itself, so a lone outlier inflates the
/// deviation it is measured against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZScoreDetector {
    threshold: f64,
}

impl Default for ZScoreDetector {
    fn default() -> Self {
        Self { threshold: 2.0 }
    }
}

impl ZScoreDetector {
    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Positions of the flagged readings, in input order.
    pub fn outlier_indices(&self, readings: &[Reading]) -> Vec<usize> {
        let Some(summary) = summarize(readings.iter().map(|reading| reading.power)) else {
            return Vec::new();
        };
        if summary.std_dev == 0.0 {
            return Vec::new();
        }
        let limit = self.threshold * summary.std_dev;
        readings
            .iter()
            .enumerate()
            .filter(|(_, reading)| (reading.power - summary.mean).abs() > limit)
            .map(|(index, _)| index)
            .collect()
    }

    /// Anomalies for every flagged reading, stamped `detected_at`.
    ///
    /// Flagged readings with a malformed device id are dropped with a warning;
    /// the rest of the batch is unaffected.
    pub fn detect(&self, readings: &[Reading], detected_at: DateTime<Utc>) -> Vec<Anomaly> {
        if readings.is_empty() {
            warn!("no data provided for anomaly detection");
            return Vec::new();
        }
        let anomalies: Vec<Anomaly> = self
            .outlier_indices(readings)
            .into_iter()
            .filter_map(|index| match anomaly_for(&readings[index], detected_at) {
                Ok(anomaly) => Some(anomaly),
                Err(err) => {
                    warn!(error = %err, "dropping flagged reading");
                    None
                }
            })
            .collect();
        debug!(
            window = readings.len(),
            flagged = anomalies.len(),
            "z-score detection complete"
        );
        anomalies
    }
}

fn anomaly_for(reading: &Reading, detected_at: DateTime<Utc>) -> Result<Anomaly> {
    let device_id = reading
        .device_uuid()
        .map_err(|source| AnalyticsError::InvalidDeviceId {
            device_id: reading.device_id.clone(),
            source,
        })?;
    Ok(Anomaly::z_score(device_id, reading.power, detected_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecowatt_model::Z_SCORE_ANOMALY;
    use uuid::Uuid;

    fn window(device: &str, powers: &[f64]) -> Vec<Reading> {
        let start = Utc::now();
        powers
            .iter()
            .enumerate()
            .map(|(i, power)| {
                Reading::power_only(device, *power, start + chrono::Duration::seconds(i as i64))
            })
            .collect()
    }

    #[test]
    fn empty_window_yields_nothing() {
        assert!(ZScoreDetector::default().detect(&[], Utc::now()).is_empty());
    }

    #[test]
    fn constant_power_is_never_flagged() {
        let id = Uuid::new_v4().to_string();
        let readings = window(&id, &[42.0; 20]);
        assert!(ZScoreDetector::default().outlier_indices(&readings).is_empty());
    }

    #[test]
    fn exact_two_sigma_is_not_flagged() {
        let id = Uuid::new_v4().to_string();
        let readings = window(&id, &[10.0, 10.0, 10.0, 10.0, 100.0]);
        assert!(ZScoreDetector::default().detect(&readings, Utc::now()).is_empty());
    }

    #[test]
    fn lone_outlier_beyond_two_sigma_is_flagged() {
        let device = Uuid::new_v4();
        let readings = window(&device.to_string(), &[10.0, 10.0, 10.0, 10.0, 10.0, 100.0]);
        let detector = ZScoreDetector::default();
        assert_eq!(detector.outlier_indices(&readings), vec![5]);

        let anomalies = detector.detect(&readings, Utc::now());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].device_id, device);
        assert_eq!(anomalies[0].value, 100.0);
        assert_eq!(anomalies[0].anomaly_type, Z_SCORE_ANOMALY);
    }

    #[test]
    fn malformed_device_ids_are_dropped() {
        let good = Uuid::new_v4();
        let mut readings = window(&good.to_string(), &[10.0; 10]);
        readings.push(Reading::power_only("pump-01", 500.0, Utc::now()));
        readings.push(Reading::power_only(good.to_string(), 500.0, Utc::now()));

        let detector = ZScoreDetector::default();
        assert_eq!(detector.outlier_indices(&readings), vec![10, 11]);
        let anomalies = detector.detect(&readings, Utc::now());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].device_id, good);
    }

    #[test]
    fn detection_is_idempotent() {
        let id = Uuid::new_v4().to_string();
        let readings = window(&id, &[5.0, 5.0, 6.0, 5.0, 5.0, 5.0, 80.0, 5.0]);
        let detector = ZScoreDetector::default();
        let key = |anomalies: Vec<Anomaly>| {
            anomalies
                .into_iter()
                .map(|a| (a.device_id, a.anomaly_type, a.value))
                .collect::<Vec<_>>()
        };
        let first = key(detector.detect(&readings, Utc::now()));
        let second = key(detector.detect(&readings, Utc::now()));
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }
}
