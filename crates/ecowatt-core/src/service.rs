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

use async_trait::async_trait;
use chrono::{Duration, Utc};
use ecowatt_analytics::{PowerPredictor, SimpleAveragePredictor, ZScoreDetector};
use ecowatt_metrics::PipelineMetrics;
use ecowatt_model::{Anomaly, Device, PowerConsumption, Reading, SimulationResult};
use ecowatt_net::{AlertDispatcher, ApiError, IngestRequest, TelemetryApi};
use ecowatt_upstream::{DeviceDirectory, TelemetrySource, UpstreamError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::outbound::ReadingPublisher;

/// History consulted by the scenario simulator.
const SCENARIO_LOOKBACK_HOURS: i64 = 24;

/// Pull-based analytics over upstream history, plus reading ingestion.
pub struct AnalyticsService {
    directory: Arc<dyn DeviceDirectory>,
    source: Arc<dyn TelemetrySource>,
    publisher: Arc<ReadingPublisher>,
    dispatcher: AlertDispatcher,
    predictor: Arc<dyn PowerPredictor>,
    detector: ZScoreDetector,
    metrics: Option<PipelineMetrics>,
}

impl AnalyticsService {
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        source: Arc<dyn TelemetrySource>,
        publisher: Arc<ReadingPublisher>,
        dispatcher: AlertDispatcher,
    ) -> Self {
        Self {
            directory,
            source,
            publisher,
            dispatcher,
            predictor: Arc::new(SimpleAveragePredictor),
            detector: ZScoreDetector::default(),
            metrics: None,
        }
    }

    /// Replace the forecasting algorithm.
    pub fn with_predictor(mut self, predictor: Arc<dyn PowerPredictor>) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn device(&self, device_id: Uuid) -> Result<Device, ApiError> {
        match self.directory.get(device_id).await {
            Ok(Some(device)) => Ok(device),
            Ok(None) => Err(ApiError::DeviceNotFound(device_id)),
            Err(err) => Err(self.upstream(err)),
        }
    }

    async fn history(&self, device: &Device, lookback: Duration) -> Vec<Reading> {
        let to = Utc::now();
        self.source.fetch(device, to - lookback, to).await
    }

    fn upstream(&self, err: UpstreamError) -> ApiError {
        if let Some(metrics) = &self.metrics {
            metrics.record_upstream_failure("directory");
        }
        warn!(error = %err, "device directory unavailable");
        ApiError::Upstream(err.to_string())
    }
}

#[async_trait]
impl TelemetryApi for AnalyticsService {
    async fn devices(&self) -> Result<Vec<Device>, ApiError> {
        self.directory.list().await.map_err(|err| self.upstream(err))
    }

    async fn predict(&self, device_id: Uuid, lookback: Duration) -> Result<PowerConsumption, ApiError> {
        let device = self.device(device_id).await?;
        let history = self.history(&device, lookback).await;
        let prediction = self.predictor.predict(&history, Utc::now());
        info!(
            %device_id,
            samples = history.len(),
            predicted = prediction.predicted_value,
            method = %prediction.prediction_method,
            "prediction computed"
        );
        self.dispatcher
            .notify_prediction(&device_id.to_string(), &prediction);
        Ok(prediction)
    }

    async fn simulate(
        &self,
        device_id: Uuid,
        parameters: BTreeMap<String, f64>,
    ) -> Result<SimulationResult, ApiError> {
        let device = self.device(device_id).await?;
        let history = self
            .history(&device, Duration::hours(SCENARIO_LOOKBACK_HOURS))
            .await;
        let result = ecowatt_analytics::simulate(history.last(), parameters);
        info!(%device_id, scenario = %result.scenario, impact = result.impact, "scenario simulated");
        Ok(result)
    }

    async fn detect(&self, device_id: Uuid, lookback: Duration) -> Result<Vec<Anomaly>, ApiError> {
        let device = self.device(device_id).await?;
        let history = self.history(&device, lookback).await;
        let anomalies = self.detector.detect(&history, Utc::now());
        if let Some(metrics) = &self.metrics {
            for anomaly in &anomalies {
                metrics.record_anomaly(&anomaly.anomaly_type);
            }
        }
        info!(%device_id, window = history.len(), anomalies = anomalies.len(), "on-demand detection finished");
        Ok(anomalies)
    }

    async fn ingest(&self, device_id: Uuid, request: IngestRequest) -> Result<Reading, ApiError> {
        let device = self.device(device_id).await?;
        if !(request.voltage.is_finite() && request.current.is_finite() && request.temperature.is_finite()) {
            return Err(ApiError::InvalidRequest(
                "voltage, current and temperature must be finite".into(),
            ));
        }
        let reading = request.into_reading(device.id, Utc::now());
        if let Some(metrics) = &self.metrics {
            metrics.record_reading(&device.device_type, "ingested");
        }
        if let Err(err) = self.publisher.publish(&device.label, &reading).await {
            warn!(%device_id, error = %err, "ingested reading not forwarded upstream");
        }
        Ok(reading)
    }
}
