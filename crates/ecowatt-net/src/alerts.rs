//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Alert envelopes and topic broadcasting."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use ecowatt_metrics::PipelineMetrics;
use ecowatt_model::{AlertNotification, AlertType, Anomaly, PowerConsumption, Severity};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Name of the topic carrying device alerts.
pub const ALERTS_TOPIC: &str = "alerts";
/// Name of the topic carrying platform-wide messages.
pub const SYSTEM_TOPIC: &str = "system";

/// Default prediction level above which an alert is raised.
pub const DEFAULT_PREDICTION_THRESHOLD: f64 = 3000.0;

/// Broadcasts alerts to every listener of one topic.
#[derive(Clone)]
pub struct TopicBroadcaster {
    name: &'static str,
    tx: broadcast::Sender<AlertNotification>,
}

impl TopicBroadcaster {
    /// Create a topic with the specified channel capacity.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { name, tx }
    }

    /// Topic name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Publish an alert. Returns the number of listeners reached; no listeners is not an error.
    pub fn publish(&self, alert: AlertNotification) -> usize {
        match self.tx.send(alert) {
            Ok(listeners) => listeners,
            Err(_) => {
                debug!(topic = self.name, "no listeners on topic");
                0
            }
        }
    }

    /// Receive every alert published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AlertNotification> {
        self.tx.subscribe()
    }

    /// Current listener count.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// The two topic channels shared by the dispatcher and the WebSocket layer.
#[derive(Clone)]
pub struct AlertTopics {
    /// Device alerts.
    pub alerts: TopicBroadcaster,
    /// Platform-wide messages.
    pub system: TopicBroadcaster,
}

impl AlertTopics {
    /// Both topics with the same capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: TopicBroadcaster::new(ALERTS_TOPIC, capacity),
            system: TopicBroadcaster::new(SYSTEM_TOPIC, capacity),
        }
    }
}

/// Wraps detector and predictor output into [`AlertNotification`]s.
#[derive(Clone)]
pub struct AlertDispatcher {
    topics: AlertTopics,
    prediction_threshold: f64,
    metrics: Option<PipelineMetrics>,
}

impl AlertDispatcher {
    /// Dispatcher publishing on `topics`.
    pub fn new(topics: AlertTopics, prediction_threshold: f64) -> Self {
        Self {
            topics,
            prediction_threshold,
            metrics: None,
        }
    }

    /// Count published alerts in `metrics`.
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Topics this dispatcher publishes on.
    pub fn topics(&self) -> &AlertTopics {
        &self.topics
    }

    /// Publish a HIGH severity alert for a detected anomaly.
    pub fn notify_anomaly(&self, anomaly: &Anomaly) -> AlertNotification {
        let alert = AlertNotification::new(
            AlertType::Anomaly,
            format!(
                "Anomaly detected: {} with value {:.2}",
                anomaly.anomaly_type, anomaly.value
            ),
        )
        .for_device(anomaly.device_id.to_string())
        .with_data(json!({
            "anomalyId": anomaly.id,
            "type": anomaly.anomaly_type,
            "value": anomaly.value,
            "detectedAt": anomaly.detected_at,
        }))
        .with_severity(Severity::High);
        info!(device_id = %anomaly.device_id, anomaly_type = %anomaly.anomaly_type, value = anomaly.value, "anomaly alert raised");
        self.publish(&self.topics.alerts, alert)
    }

    /// Publish a MEDIUM severity alert when the prediction exceeds the threshold.
    pub fn notify_prediction(
        &self,
        device_id: &str,
        prediction: &PowerConsumption,
    ) -> Option<AlertNotification> {
        if prediction.predicted_value <= self.prediction_threshold {
            return None;
        }
        let mut alert = AlertNotification::new(
            AlertType::Prediction,
            format!(
                "High consumption predicted: {:.2} kW",
                prediction.predicted_value
            ),
        )
        .for_device(device_id)
        .with_severity(Severity::Medium);
        alert.data = serde_json::to_value(prediction).ok();
        info!(device_id, predicted = prediction.predicted_value, "prediction alert raised");
        Some(self.publish(&self.topics.alerts, alert))
    }

    /// Publish a SYSTEM message with no device on the system topic.
    pub fn broadcast_system_message(&self, message: impl Into<String>) -> AlertNotification {
        let alert = AlertNotification::new(AlertType::System, message);
        self.publish(&self.topics.system, alert)
    }

    fn publish(&self, topic: &TopicBroadcaster, alert: AlertNotification) -> AlertNotification {
        let listeners = topic.publish(alert.clone());
        if let Some(metrics) = &self.metrics {
            metrics.record_alert(topic.name());
        }
        debug!(topic = topic.name(), listeners, "alert published");
        alert
    }
}
