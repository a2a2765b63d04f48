//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Narrow interfaces to the collaborators around the pipeline."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Interfaces to the systems the pipeline talks to: the upstream telemetry
//! service, the device directory and the anomaly store. In-memory adapters
//! back tests and standalone runs; [`HttpTelemetryClient`] speaks to a
//! hosted telemetry service.
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ecowatt_model::{Anomaly, Device, DeviceThresholds, Reading};
use uuid::Uuid;

pub mod error;
pub mod http;
pub mod memory;

pub use error::{Result, UpstreamError};
pub use http::HttpTelemetryClient;
pub use memory::{MemoryAnomalyRepository, MemoryDeviceDirectory, MemoryTelemetryStore};

/// Outbound telemetry writes.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Store `reading` under the device's upstream `label`.
    async fn send(&self, label: &str, reading: &Reading) -> Result<()>;
}

/// Outbound telemetry reads.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Readings for `device` within `[from, to]`, oldest first.
    ///
    /// Returns an empty list when there is no data or the service fails;
    /// failures are logged here and never reach the caller.
    async fn fetch(&self, device: &Device, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Reading>;
}

/// Source of device records.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Every known device.
    async fn list(&self) -> Result<Vec<Device>>;

    /// Devices whose status is `ACTIVE`.
    async fn list_active(&self) -> Result<Vec<Device>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(Device::is_active)
            .collect())
    }

    /// Look up one device.
    async fn get(&self, id: Uuid) -> Result<Option<Device>>;

    /// Operating limits of one device.
    async fn thresholds(&self, id: Uuid) -> Result<Option<DeviceThresholds>> {
        Ok(self.get(id).await?.map(|device| device.thresholds))
    }
}

/// Persistence for detected anomalies.
#[async_trait]
pub trait AnomalyRepository: Send + Sync {
    /// Persist `anomaly`, assigning an id when it has none, and return the stored record.
    async fn save(&self, anomaly: Anomaly) -> Result<Anomaly>;

    /// Stored anomalies of one device, oldest first.
    async fn list_for_device(&self, device_id: Uuid) -> Result<Vec<Anomaly>>;
}
