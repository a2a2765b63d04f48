//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .context("failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .context("failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .context("failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address; differs from the requested one when port 0 was used.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "ecowattd_starts_total",
            "Total number of times the EcoWatt daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ecowattd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new("ecowattd_build_info", "Build metadata for the running daemon"),
            &["version", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, profile])
            .set(1.0);
    }
}

/// Counters and gauges for the telemetry pipeline.
#[derive(Clone, Debug)]
pub struct PipelineMetrics {
    registry: SharedRegistry,
    readings_total: IntCounterVec,
    injected_total: IntCounterVec,
    anomalies_total: IntCounterVec,
    upstream_failures: IntCounterVec,
    alerts_total: IntCounterVec,
    fanout_total: IntCounterVec,
    subscribers: IntGaugeVec,
    active_devices: IntGauge,
    ticks_total: IntCounter,
    tick_seconds: Histogram,
}

impl PipelineMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let readings_total = IntCounterVec::new(
            Opts::new(
                "ecowatt_readings_total",
                "Readings produced or ingested, by device type and origin",
            ),
            &["device_type", "origin"],
        )?;
        registry.register(Box::new(readings_total.clone()))?;

        let injected_total = IntCounterVec::new(
            Opts::new(
                "ecowatt_injected_anomalies_total",
                "Synthetic faults injected by the generator, by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(injected_total.clone()))?;

        let anomalies_total = IntCounterVec::new(
            Opts::new(
                "ecowatt_anomalies_detected_total",
                "Anomalies flagged by the detector, by anomaly type",
            ),
            &["type"],
        )?;
        registry.register(Box::new(anomalies_total.clone()))?;

        let upstream_failures = IntCounterVec::new(
            Opts::new(
                "ecowatt_upstream_failures_total",
                "Failed or timed out calls to the upstream telemetry service",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(upstream_failures.clone()))?;

        let alerts_total = IntCounterVec::new(
            Opts::new("ecowatt_alerts_published_total", "Alerts published, by topic"),
            &["topic"],
        )?;
        registry.register(Box::new(alerts_total.clone()))?;

        let fanout_total = IntCounterVec::new(
            Opts::new(
                "ecowatt_fanout_deliveries_total",
                "Per-connection reading deliveries, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(fanout_total.clone()))?;

        let subscribers = IntGaugeVec::new(
            Opts::new(
                "ecowatt_ws_connections",
                "Open WebSocket connections, by stream",
            ),
            &["stream"],
        )?;
        registry.register(Box::new(subscribers.clone()))?;

        let active_devices = IntGauge::with_opts(Opts::new(
            "ecowatt_active_devices",
            "Devices simulated on the most recent tick",
        ))?;
        registry.register(Box::new(active_devices.clone()))?;

        let ticks_total = IntCounter::with_opts(Opts::new(
            "ecowatt_ticks_total",
            "Generation ticks started",
        ))?;
        registry.register(Box::new(ticks_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0005, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let tick_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ecowatt_tick_duration_seconds",
                "Wall time spent processing one generation tick",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(tick_seconds.clone()))?;

        Ok(Self {
            registry,
            readings_total,
            injected_total,
            anomalies_total,
            upstream_failures,
            alerts_total,
            fanout_total,
            subscribers,
            active_devices,
            ticks_total,
            tick_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_reading(&self, device_type: &str, origin: &str) {
        self.readings_total
            .with_label_values(&[device_type, origin])
            .inc();
    }

    pub fn readings(&self, device_type: &str, origin: &str) -> u64 {
        self.readings_total
            .with_label_values(&[device_type, origin])
            .get()
    }

    pub fn record_injection(&self, kind: &str) {
        self.injected_total.with_label_values(&[kind]).inc();
    }

    pub fn record_anomaly(&self, anomaly_type: &str) {
        self.anomalies_total.with_label_values(&[anomaly_type]).inc();
    }

    pub fn anomalies(&self, anomaly_type: &str) -> u64 {
        self.anomalies_total.with_label_values(&[anomaly_type]).get()
    }

    pub fn record_upstream_failure(&self, operation: &str) {
        self.upstream_failures.with_label_values(&[operation]).inc();
    }

    pub fn upstream_failures(&self, operation: &str) -> u64 {
        self.upstream_failures.with_label_values(&[operation]).get()
    }

    pub fn record_alert(&self, topic: &str) {
        self.alerts_total.with_label_values(&[topic]).inc();
    }

    /// Count one fan-out pass: `delivered` sends accepted, `failed` skipped.
    pub fn record_fan_out(&self, delivered: usize, failed: usize) {
        self.fanout_total
            .with_label_values(&["delivered"])
            .inc_by(delivered as u64);
        self.fanout_total
            .with_label_values(&["failed"])
            .inc_by(failed as u64);
    }

    pub fn fan_out_deliveries(&self, outcome: &str) -> u64 {
        self.fanout_total.with_label_values(&[outcome]).get()
    }

    pub fn connection_opened(&self, stream: &str) {
        self.subscribers.with_label_values(&[stream]).inc();
    }

    pub fn connection_closed(&self, stream: &str) {
        self.subscribers.with_label_values(&[stream]).dec();
    }

    pub fn set_active_devices(&self, count: usize) {
        self.active_devices.set(count as i64);
    }

    pub fn record_tick(&self) {
        self.ticks_total.inc();
    }

    pub fn ticks(&self) -> u64 {
        self.ticks_total.get()
    }

    pub fn observe_tick(&self, seconds: f64) {
        self.tick_seconds.observe(seconds);
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn pipeline_counters_track_labels() {
        let metrics = PipelineMetrics::new(new_registry()).unwrap();
        metrics.record_reading("motor", "generated");
        metrics.record_reading("motor", "generated");
        metrics.record_reading("pump", "ingested");
        metrics.record_anomaly("Z-SCORE");
        metrics.record_upstream_failure("write");
        metrics.record_fan_out(3, 1);
        metrics.record_fan_out(2, 0);
        metrics.record_tick();

        assert_eq!(metrics.fan_out_deliveries("delivered"), 5);
        assert_eq!(metrics.fan_out_deliveries("failed"), 1);
        assert_eq!(metrics.ticks(), 1);
        assert_eq!(metrics.readings("motor", "generated"), 2);
        assert_eq!(metrics.readings("pump", "ingested"), 1);
        assert_eq!(metrics.anomalies("Z-SCORE"), 1);
        assert_eq!(metrics.upstream_failures("write"), 1);
        assert_eq!(metrics.upstream_failures("read"), 0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = new_registry();
        PipelineMetrics::new(registry.clone()).unwrap();
        assert!(PipelineMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn scrape_endpoint_serves_registered_families() {
        let metrics = DaemonMetrics::new(new_registry()).unwrap();
        metrics.inc_start();
        metrics.set_build_info("0.1.0", "test");

        let server = spawn_http_server(metrics.registry(), "127.0.0.1:0".parse().unwrap()).unwrap();
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();

        assert!(body.starts_with("HTTP/1.1 200"));
        assert!(body.contains(prometheus::TEXT_FORMAT));
        assert!(body.contains("ecowattd_starts_total 1"));
        assert!(body.contains("ecowattd_build_info"));
        server.shutdown().await.unwrap();
    }
}
