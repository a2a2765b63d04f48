//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "On-demand prediction, scenario, detection, and ingestion."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use ecowatt_core::{AnalyticsService, ReadingPublisher};
use ecowatt_model::{AlertType, Device, Reading};
use ecowatt_net::{
    AlertDispatcher, AlertTopics, ApiError, IngestRequest, SubscriptionRegistry, TelemetryApi,
};
use ecowatt_upstream::{MemoryAnomalyRepository, MemoryDeviceDirectory, MemoryTelemetryStore};
use tokio::sync::mpsc;
use uuid::Uuid;

struct Fixture {
    service: AnalyticsService,
    store: Arc<MemoryTelemetryStore>,
    registry: Arc<SubscriptionRegistry>,
    topics: AlertTopics,
    device: Device,
}

fn fixture() -> Fixture {
    let device = Device::new(Uuid::new_v4(), "Press compressor", "compressor", "compressor-07");
    let directory = Arc::new(MemoryDeviceDirectory::new(vec![device.clone()]));
    let store = Arc::new(MemoryTelemetryStore::default());
    let registry = Arc::new(SubscriptionRegistry::new());
    let topics = AlertTopics::new(8);
    let dispatcher = AlertDispatcher::new(topics.clone(), 3000.0);
    let publisher = Arc::new(ReadingPublisher::new(
        store.clone(),
        registry.clone(),
        Arc::new(MemoryAnomalyRepository::new()),
        dispatcher.clone(),
    ));
    let service = AnalyticsService::new(directory, store.clone(), publisher, dispatcher);
    Fixture {
        service,
        store,
        registry,
        topics,
        device,
    }
}

impl Fixture {
    fn record_powers(&self, powers: &[f64]) {
        let count = powers.len() as i64;
        for (index, power) in powers.iter().enumerate() {
            let at = Utc::now() - Duration::minutes(count - index as i64);
            self.store.record(
                &self.device.label,
                Reading::power_only(self.device.id.to_string(), *power, at),
            );
        }
    }
}

#[tokio::test]
async fn predict_averages_history_and_alerts_above_threshold() {
    let fx = fixture();
    let mut alerts = fx.topics.alerts.subscribe();

    let empty = fx.service.predict(fx.device.id, Duration::hours(24)).await.unwrap();
    assert_eq!(empty.prediction_method, "No Data");
    assert_eq!(empty.predicted_value, 0.0);
    assert_eq!(empty.confidence_interval, 0.0);

    fx.record_powers(&[2000.0, 2200.0, 2400.0]);
    let quiet = fx.service.predict(fx.device.id, Duration::hours(24)).await.unwrap();
    assert_eq!(quiet.prediction_method, "SimpleAverage");
    assert!((quiet.predicted_value - 2200.0).abs() < 1e-9);
    assert!(alerts.try_recv().is_err());

    fx.record_powers(&[9000.0, 9000.0, 9000.0]);
    let loud = fx.service.predict(fx.device.id, Duration::hours(24)).await.unwrap();
    assert!(loud.predicted_value > 3000.0);
    let alert = alerts.recv().await.unwrap();
    assert_eq!(alert.alert_type, AlertType::Prediction);
    assert_eq!(alert.device_id, Some(fx.device.id.to_string()));
}

#[tokio::test]
async fn unknown_devices_are_not_found() {
    let fx = fixture();
    let missing = Uuid::new_v4();
    assert!(matches!(
        fx.service.predict(missing, Duration::hours(1)).await,
        Err(ApiError::DeviceNotFound(id)) if id == missing
    ));
    assert!(matches!(
        fx.service.simulate(missing, BTreeMap::new()).await,
        Err(ApiError::DeviceNotFound(_))
    ));
    assert!(matches!(
        fx.service.detect(missing, Duration::hours(1)).await,
        Err(ApiError::DeviceNotFound(_))
    ));
}

#[tokio::test]
async fn simulate_uses_latest_reading() {
    let fx = fixture();
    let params = BTreeMap::from([("voltage".to_owned(), 10.0)]);

    let none = fx.service.simulate(fx.device.id, params.clone()).await.unwrap();
    assert_eq!(none.scenario, "No Data");
    assert_eq!(none.impact, 0.0);
    assert_eq!(none.parameters, params);

    fx.store.record(
        &fx.device.label,
        Reading::derived(fx.device.id.to_string(), 200.0, 5.0, 40.0, Utc::now() - Duration::hours(2)),
    );
    fx.store.record(
        &fx.device.label,
        Reading::derived(fx.device.id.to_string(), 220.0, 15.0, 40.0, Utc::now() - Duration::minutes(1)),
    );
    let result = fx.service.simulate(fx.device.id, params).await.unwrap();
    assert_eq!(result.original_power, 3300.0);
    assert!((result.simulated_power - 3630.0).abs() < 1e-9);
    assert!((result.impact - 10.0).abs() < 1e-9);
    assert_eq!(result.scenario, "voltage: +10%");

    let unchanged = fx.service.simulate(fx.device.id, BTreeMap::new()).await.unwrap();
    assert_eq!(unchanged.scenario, "No change");
    assert_eq!(unchanged.impact, 0.0);
}

#[tokio::test]
async fn detect_flags_outliers_in_window() {
    let fx = fixture();
    fx.record_powers(&[10.0, 10.0, 10.0, 10.0, 10.0, 100.0]);
    let anomalies = fx.service.detect(fx.device.id, Duration::hours(1)).await.unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].value, 100.0);
    assert_eq!(anomalies[0].device_id, fx.device.id);

    let empty = fx.service.detect(fx.device.id, Duration::seconds(1)).await.unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn ingest_stores_and_fans_out() {
    let fx = fixture();
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let connection = fx.registry.connect(Arc::new(tx));
    fx.registry.subscribe(connection, &fx.device.id.to_string());
    while rx.try_recv().is_ok() {}

    let request = IngestRequest {
        voltage: 440.0,
        current: 30.0,
        power: None,
        temperature: 50.0,
        timestamp: None,
    };
    let reading = fx.service.ingest(fx.device.id, request.clone()).await.unwrap();
    assert_eq!(reading.power, 13_200.0);
    assert_eq!(fx.store.latest(&fx.device.label), Some(reading.clone()));

    let message: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
    assert_eq!(message["type"], "energy_data");
    assert_eq!(message["data"]["power"], 13_200.0);

    assert!(matches!(
        fx.service.ingest(Uuid::new_v4(), request).await,
        Err(ApiError::DeviceNotFound(_))
    ));
}
