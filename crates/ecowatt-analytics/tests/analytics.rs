//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Statistical analytics over device telemetry."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use ecowatt_analytics::{simulate, PowerPredictor, SimpleAveragePredictor, ZScoreDetector};
use ecowatt_model::Reading;
use serde_json::json;
use uuid::Uuid;

fn day_of_readings(device: Uuid) -> Vec<Reading> {
    let start = Utc::now() - Duration::hours(24);
    (0..48)
        .map(|i| {
            let current = if i == 40 { 45.0 } else { 15.0 + (i % 3) as f64 * 0.1 };
            Reading::derived(
                device.to_string(),
                220.0,
                current,
                45.0,
                start + Duration::minutes(30 * i),
            )
        })
        .collect()
}

#[test]
fn same_window_feeds_every_analysis() {
    let device = Uuid::new_v4();
    let readings = day_of_readings(device);
    let now = Utc::now();

    let anomalies = ZScoreDetector::default().detect(&readings, now);
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].value, 220.0 * 45.0);
    assert_eq!(anomalies[0].detected_at, now);

    let prediction = SimpleAveragePredictor.predict(&readings, now);
    assert!(prediction.predicted_value > 220.0 * 15.0);
    assert!(prediction.confidence_interval > 0.0);

    let parameters = BTreeMap::from([("voltage".to_owned(), -5.0)]);
    let result = simulate(readings.last(), parameters);
    assert!(result.impact < 0.0);
    assert_eq!(result.scenario, "voltage: -5%");
}

#[test]
fn results_serialise_camel_case() {
    let device = Uuid::new_v4();
    let readings = day_of_readings(device);
    let result = simulate(readings.last(), BTreeMap::new());
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["scenario"], json!("No change"));
    assert!(value.get("originalPower").is_some());
    assert!(value.get("simulatedPower").is_some());

    let anomalies = ZScoreDetector::default().detect(&readings, Utc::now());
    let value = serde_json::to_value(&anomalies[0]).unwrap();
    assert_eq!(value["deviceId"], json!(device.to_string()));
    assert_eq!(value["type"], json!("Z-SCORE"));
}
