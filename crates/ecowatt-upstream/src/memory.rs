//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "In-process adapters for telemetry, devices, and anomalies."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ecowatt_model::{Anomaly, Device, Reading};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{AnomalyRepository, DeviceDirectory, Result, TelemetrySink, TelemetrySource};

/// Telemetry sink and source keeping the newest `retention` readings per label.
#[derive(Debug)]
pub struct MemoryTelemetryStore {
    retention: usize,
    series: RwLock<HashMap<String, VecDeque<Reading>>>,
}

impl MemoryTelemetryStore {
    /// Store capped at `retention` readings per label (at least one).
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Append a reading, evicting the oldest once the cap is reached.
    pub fn record(&self, label: &str, reading: Reading) {
        let mut series = self.series.write();
        let entries = series.entry(label.to_owned()).or_default();
        if entries.len() == self.retention {
            entries.pop_front();
        }
        entries.push_back(reading);
    }

    /// Number of readings currently held for `label`.
    pub fn len(&self, label: &str) -> usize {
        self.series.read().get(label).map_or(0, VecDeque::len)
    }

    /// Newest reading held for `label`.
    pub fn latest(&self, label: &str) -> Option<Reading> {
        self.series
            .read()
            .get(label)
            .and_then(|entries| entries.back().cloned())
    }
}

impl Default for MemoryTelemetryStore {
    fn default() -> Self {
        Self::new(17_280)
    }
}

#[async_trait]
impl TelemetrySink for MemoryTelemetryStore {
    async fn send(&self, label: &str, reading: &Reading) -> Result<()> {
        self.record(label, reading.clone());
        Ok(())
    }
}

#[async_trait]
impl TelemetrySource for MemoryTelemetryStore {
    async fn fetch(&self, device: &Device, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Reading> {
        let mut readings: Vec<Reading> = self
            .series
            .read()
            .get(&device.label)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|reading| reading.timestamp >= from && reading.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        readings.sort_by_key(|reading| reading.timestamp);
        debug!(label = %device.label, count = readings.len(), "telemetry window fetched");
        readings
    }
}

/// Device directory seeded from configuration.
#[derive(Debug, Default)]
pub struct MemoryDeviceDirectory {
    devices: RwLock<Vec<Device>>,
}

impl MemoryDeviceDirectory {
    /// Directory holding `devices` in the given order.
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: RwLock::new(devices),
        }
    }

    /// Insert or replace a device by id.
    pub fn upsert(&self, device: Device) {
        let mut devices = self.devices.write();
        match devices.iter_mut().find(|existing| existing.id == device.id) {
            Some(existing) => *existing = device,
            None => devices.push(device),
        }
    }
}

#[async_trait]
impl DeviceDirectory for MemoryDeviceDirectory {
    async fn list(&self) -> Result<Vec<Device>> {
        Ok(self.devices.read().clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Device>> {
        Ok(self
            .devices
            .read()
            .iter()
            .find(|device| device.id == id)
            .cloned())
    }
}

/// Anomaly store kept in process memory, newest `retention` records overall.
#[derive(Debug)]
pub struct MemoryAnomalyRepository {
    retention: usize,
    anomalies: RwLock<VecDeque<Anomaly>>,
}

impl Default for MemoryAnomalyRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAnomalyRepository {
    /// Empty repository with the default cap.
    pub fn new() -> Self {
        Self::with_retention(10_000)
    }

    /// Empty repository holding at most `retention` anomalies (at least one).
    pub fn with_retention(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            anomalies: RwLock::new(VecDeque::new()),
        }
    }

    /// Total anomalies stored.
    pub fn len(&self) -> usize {
        self.anomalies.read().len()
    }

    /// True when nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.anomalies.read().is_empty()
    }
}

#[async_trait]
impl AnomalyRepository for MemoryAnomalyRepository {
    async fn save(&self, mut anomaly: Anomaly) -> Result<Anomaly> {
        if anomaly.id.is_nil() {
            anomaly.id = Uuid::new_v4();
        }
        let mut anomalies = self.anomalies.write();
        if anomalies.len() == self.retention {
            if let Some(evicted) = anomalies.pop_front() {
                debug!(anomaly_id = %evicted.id, "anomaly evicted by retention cap");
            }
        }
        anomalies.push_back(anomaly.clone());
        Ok(anomaly)
    }

    async fn list_for_device(&self, device_id: Uuid) -> Result<Vec<Anomaly>> {
        Ok(self
            .anomalies
            .read()
            .iter()
            .filter(|anomaly| anomaly.device_id == device_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ecowatt_model::DeviceStatus;

    fn device(label: &str) -> Device {
        Device::new(Uuid::new_v4(), label, "motor", label)
    }

    #[tokio::test]
    async fn retention_evicts_oldest() {
        let store = MemoryTelemetryStore::new(3);
        let motor = device("motor-01");
        let start = Utc::now();
        for i in 0..5 {
            let reading = Reading::power_only(motor.id.to_string(), i as f64, start + Duration::seconds(i));
            store.send(&motor.label, &reading).await.unwrap();
        }
        assert_eq!(store.len("motor-01"), 3);
        let window = store.fetch(&motor, start, start + Duration::seconds(10)).await;
        let powers: Vec<f64> = window.iter().map(|r| r.power).collect();
        assert_eq!(powers, vec![2.0, 3.0, 4.0]);
        assert_eq!(store.latest("motor-01").map(|r| r.power), Some(4.0));
    }

    #[tokio::test]
    async fn fetch_filters_window_and_label() {
        let store = MemoryTelemetryStore::new(10);
        let motor = device("motor-01");
        let pump = device("pump-01");
        let now = Utc::now();
        store.record("motor-01", Reading::power_only("m", 1.0, now - Duration::hours(30)));
        store.record("motor-01", Reading::power_only("m", 2.0, now - Duration::hours(1)));
        store.record("pump-01", Reading::power_only("p", 3.0, now));

        let window = store.fetch(&motor, now - Duration::hours(24), now).await;
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].power, 2.0);
        assert!(store.fetch(&pump, now - Duration::hours(24), now - Duration::hours(2)).await.is_empty());
    }

    #[tokio::test]
    async fn directory_filters_active_devices() {
        let active = device("a");
        let idle = device("b").with_status(DeviceStatus::Inactive);
        let directory = MemoryDeviceDirectory::new(vec![active.clone(), idle.clone()]);

        let listed = directory.list_active().await.unwrap();
        assert_eq!(listed, vec![active.clone()]);
        assert_eq!(directory.get(idle.id).await.unwrap(), Some(idle.clone()));
        assert_eq!(directory.get(Uuid::new_v4()).await.unwrap(), None);

        directory.upsert(idle.clone().with_status(DeviceStatus::Active));
        assert_eq!(directory.list_active().await.unwrap().len(), 2);
        assert!(directory.thresholds(active.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn repository_assigns_missing_ids() {
        let repository = MemoryAnomalyRepository::new();
        let device = Uuid::new_v4();
        let mut anomaly = Anomaly::z_score(device, 10.0, Utc::now());
        anomaly.id = Uuid::nil();

        let stored = repository.save(anomaly).await.unwrap();
        assert!(!stored.id.is_nil());
        repository.save(Anomaly::z_score(Uuid::new_v4(), 1.0, Utc::now())).await.unwrap();

        assert_eq!(repository.len(), 2);
        let listed = repository.list_for_device(device).await.unwrap();
        assert_eq!(listed, vec![stored]);
    }

    #[tokio::test]
    async fn repository_retention_drops_oldest() {
        let repository = MemoryAnomalyRepository::with_retention(2);
        let device = Uuid::new_v4();
        for value in [1.0, 2.0, 3.0] {
            repository.save(Anomaly::z_score(device, value, Utc::now())).await.unwrap();
        }

        assert_eq!(repository.len(), 2);
        let values: Vec<f64> = repository
            .list_for_device(device)
            .await
            .unwrap()
            .iter()
            .map(|anomaly| anomaly.value)
            .collect();
        assert_eq!(values, vec![2.0, 3.0]);
    }
}
