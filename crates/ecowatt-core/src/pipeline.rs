//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use ecowatt_common::config::SimulationConfig;
use ecowatt_common::metrics::LoopTimingReporter;
use ecowatt_common::time::jitter_us;
use ecowatt_metrics::PipelineMetrics;
use ecowatt_rt::{TaskGroup, Ticker};
use ecowatt_sim::{GeneratedReading, GeneratorSettings, TelemetryGenerator};
use ecowatt_upstream::DeviceDirectory;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::outbound::ReadingPublisher;

const DEFAULT_OUTBOUND_TIMEOUT: Duration = Duration::from_secs(5);

/// Configures the generation tick loop.
pub struct PipelineBuilder {
    tick_interval: Duration,
    outbound_timeout: Duration,
    generator: TelemetryGenerator,
    directory: Arc<dyn DeviceDirectory>,
    publisher: Arc<ReadingPublisher>,
    metrics: Option<PipelineMetrics>,
}

impl PipelineBuilder {
    pub fn new(
        tick_interval: Duration,
        generator: TelemetryGenerator,
        directory: Arc<dyn DeviceDirectory>,
        publisher: Arc<ReadingPublisher>,
    ) -> Self {
        Self {
            tick_interval,
            outbound_timeout: DEFAULT_OUTBOUND_TIMEOUT,
            generator,
            directory,
            publisher,
            metrics: None,
        }
    }

    /// Builder with a generator seeded and tuned from `config`.
    pub fn from_config(
        config: &SimulationConfig,
        directory: Arc<dyn DeviceDirectory>,
        publisher: Arc<ReadingPublisher>,
    ) -> Result<Self> {
        let settings = GeneratorSettings {
            anomaly_probability: config.anomaly_probability,
            utc_offset: config.utc_offset()?,
        };
        let generator = TelemetryGenerator::new(config.random_seed, settings)
            .context("failed to build telemetry generator")?;
        Ok(Self::new(config.tick_interval, generator, directory, publisher))
    }

    /// Upper bound on one device's upstream work per tick. Sink writes and
    /// repository saves also carry the publisher's own call timeout.
    pub fn with_outbound_timeout(mut self, timeout: Duration) -> Self {
        self.outbound_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start ticking and return a handle for lifecycle control.
    pub fn spawn(self) -> PipelineHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let ticks = Arc::new(AtomicU64::new(0));
        let ticker = Ticker::new(self.tick_interval);
        let pipeline = Pipeline {
            generator: self.generator,
            directory: self.directory,
            publisher: self.publisher,
            metrics: self.metrics,
            outbound_timeout: self.outbound_timeout,
            ticks: ticks.clone(),
        };
        let task = tokio::spawn(pipeline.run(ticker, shutdown_rx));
        PipelineHandle {
            shutdown: shutdown_tx,
            task,
            ticks,
        }
    }
}

/// Handle returned from [`PipelineBuilder::spawn`].
#[derive(Debug)]
pub struct PipelineHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
    ticks: Arc<AtomicU64>,
}

impl PipelineHandle {
    /// Ticks started so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Stop ticking once the tick in progress, if any, has finished.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            error!(error = %err, "pipeline task join error");
            return Err(anyhow::Error::new(err));
        }
        Ok(())
    }
}

struct Pipeline {
    generator: TelemetryGenerator,
    directory: Arc<dyn DeviceDirectory>,
    publisher: Arc<ReadingPublisher>,
    metrics: Option<PipelineMetrics>,
    outbound_timeout: Duration,
    ticks: Arc<AtomicU64>,
}

impl Pipeline {
    async fn run(mut self, mut ticker: Ticker, mut shutdown: broadcast::Receiver<()>) {
        let period = ticker.period();
        let reporter = LoopTimingReporter::new(period);
        info!(period_ms = period.as_millis() as u64, "pipeline started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("pipeline shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    reporter.record_tick();
                    if let Some(metrics) = &self.metrics {
                        metrics.record_tick();
                    }
                    let started = Instant::now();
                    let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
                    self.tick(tick).await;

                    let elapsed = started.elapsed();
                    if let Some(metrics) = &self.metrics {
                        metrics.observe_tick(elapsed.as_secs_f64());
                    }
                    if reporter.record_elapsed(elapsed) {
                        warn!(tick, overrun_us = jitter_us(elapsed, period), "tick overran its period");
                    }
                }
            }
        }

        if let Some(summary) = reporter.histogram().summary() {
            debug!(
                samples = summary.samples,
                mean_us = summary.mean_us,
                std_dev_us = summary.std_dev_us,
                max_us = summary.max_us,
                overruns = reporter.overruns(),
                "pipeline jitter summary"
            );
        }
        info!(ticks = self.ticks.load(Ordering::Relaxed), "pipeline stopped");
    }

    async fn tick(&mut self, tick: u64) {
        let devices = match self.directory.list_active().await {
            Ok(devices) => devices,
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_upstream_failure("list_devices");
                }
                warn!(tick, error = %err, "device directory unavailable; skipping tick");
                return;
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.set_active_devices(devices.len());
        }

        let at = Utc::now();
        let mut outbound = TaskGroup::new("outbound", Some(self.outbound_timeout));
        for device in &devices {
            let GeneratedReading { reading, injected } = self.generator.generate(device, at);
            if let Some(metrics) = &self.metrics {
                metrics.record_reading(&device.device_type, "simulated");
            }
            if let Some(kind) = injected {
                warn!(device_id = %device.id, device = %device.name, kind = %kind, power = reading.power, "anomaly injected");
                if let Some(metrics) = &self.metrics {
                    metrics.record_injection(kind.as_str());
                }
            }

            self.publisher.fan_out(&reading);
            let detected = self.publisher.observe(&reading);

            let publisher = self.publisher.clone();
            let label = device.label.clone();
            outbound.spawn(device.label.clone(), async move {
                publisher.settle(&label, &reading, detected, injected).await
            });
        }

        let report = outbound.join().await;
        if let Some(metrics) = &self.metrics {
            for _ in 0..report.timed_out {
                metrics.record_upstream_failure("timeout");
            }
        }
        debug!(
            tick,
            devices = devices.len(),
            completed = report.completed,
            failed = report.failed,
            timed_out = report.timed_out,
            "tick complete"
        );
    }
}
