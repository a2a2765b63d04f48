//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-reading delivery to subscribers, live detection, and upstream."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use ecowatt_metrics::PipelineMetrics;
use ecowatt_model::{Anomaly, AnomalyKind, Reading};
use ecowatt_net::{AlertDispatcher, FanOutReport, SubscriptionRegistry};
use ecowatt_upstream::{AnomalyRepository, TelemetrySink};
use tokio::time::timeout;
use tracing::{trace, warn};

use crate::live::LiveDetector;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything that happens to a reading once it exists, whether generated or
/// ingested: fan-out to subscribers, live detection, and the upstream write.
pub struct ReadingPublisher {
    sink: Arc<dyn TelemetrySink>,
    registry: Arc<SubscriptionRegistry>,
    repository: Arc<dyn AnomalyRepository>,
    dispatcher: AlertDispatcher,
    live: Option<Arc<LiveDetector>>,
    call_timeout: Duration,
    metrics: Option<PipelineMetrics>,
}

impl ReadingPublisher {
    pub fn new(
        sink: Arc<dyn TelemetrySink>,
        registry: Arc<SubscriptionRegistry>,
        repository: Arc<dyn AnomalyRepository>,
        dispatcher: AlertDispatcher,
    ) -> Self {
        Self {
            sink,
            registry,
            repository,
            dispatcher,
            live: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_live_detection(mut self, live: Arc<LiveDetector>) -> Self {
        self.live = Some(live);
        self
    }

    /// Deadline applied separately to each sink write and repository save.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Deliver `reading` for the device labelled `label` everywhere it goes.
    pub async fn publish(&self, label: &str, reading: &Reading) -> Result<()> {
        self.fan_out(reading);
        let detected = self.observe(reading);
        self.settle(label, reading, detected, None).await
    }

    /// Queue `reading` for every connection following its device.
    pub fn fan_out(&self, reading: &Reading) -> FanOutReport {
        let payload = match serde_json::to_value(reading) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(device_id = %reading.device_id, error = %err, "failed to encode reading for subscribers");
                return FanOutReport::default();
            }
        };
        let report = self.registry.fan_out(&reading.device_id, payload);
        if let Some(metrics) = &self.metrics {
            metrics.record_fan_out(report.delivered, report.failed);
        }
        trace!(device_id = %reading.device_id, delivered = report.delivered, failed = report.failed, "reading fanned out");
        report
    }

    /// Feed `reading` to live detection, if enabled.
    pub fn observe(&self, reading: &Reading) -> Option<Anomaly> {
        self.live
            .as_ref()
            .and_then(|live| live.observe(reading, Utc::now()))
    }

    /// Upstream half of a reading's delivery.
    ///
    /// The sink write, the injected-fault record and the detected anomaly
    /// run concurrently, each under the call timeout, so a stuck repository
    /// never holds back the upstream copy.
    pub async fn settle(
        &self,
        label: &str,
        reading: &Reading,
        detected: Option<Anomaly>,
        injected: Option<AnomalyKind>,
    ) -> Result<()> {
        let injection = async {
            if let Some(kind) = injected {
                self.record_injection(reading, kind).await;
            }
        };
        let detection = async {
            if let Some(anomaly) = detected {
                self.report_anomaly(anomaly).await;
            }
        };
        let (sent, (), ()) = tokio::join!(self.forward(label, reading), injection, detection);
        sent
    }

    /// Persist a detected anomaly, count it and raise its alert.
    pub async fn report_anomaly(&self, anomaly: Anomaly) -> Anomaly {
        let anomaly = self.persist(anomaly).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_anomaly(&anomaly.anomaly_type);
        }
        self.dispatcher.notify_anomaly(&anomaly);
        anomaly
    }

    /// Store a record of a fault the generator injected into `reading`.
    pub async fn record_injection(&self, reading: &Reading, kind: AnomalyKind) -> Option<Anomaly> {
        let device_id = match reading.device_uuid() {
            Ok(id) => id,
            Err(err) => {
                warn!(device_id = %reading.device_id, error = %err, "cannot record injection for invalid device id");
                return None;
            }
        };
        let anomaly = Anomaly::injected(device_id, kind, reading.power, reading.timestamp);
        Some(self.persist(anomaly).await)
    }

    async fn forward(&self, label: &str, reading: &Reading) -> Result<()> {
        match timeout(self.call_timeout, self.sink.send(label, reading)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.failure("send");
                Err(err).with_context(|| format!("failed to forward reading for {label}"))
            }
            Err(_) => {
                self.failure("send");
                Err(anyhow!(
                    "forwarding reading for {label} timed out after {} ms",
                    self.call_timeout.as_millis()
                ))
            }
        }
    }

    /// Save `anomaly`; when the repository fails or stalls the unsaved anomaly is returned.
    async fn persist(&self, anomaly: Anomaly) -> Anomaly {
        match timeout(self.call_timeout, self.repository.save(anomaly.clone())).await {
            Ok(Ok(saved)) => saved,
            Ok(Err(err)) => {
                self.failure("save_anomaly");
                warn!(device_id = %anomaly.device_id, anomaly_type = %anomaly.anomaly_type, error = %err, "failed to persist anomaly");
                anomaly
            }
            Err(_) => {
                self.failure("save_anomaly");
                warn!(device_id = %anomaly.device_id, anomaly_type = %anomaly.anomaly_type, "anomaly repository timed out");
                anomaly
            }
        }
    }

    fn failure(&self, operation: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_upstream_failure(operation);
        }
    }
}
