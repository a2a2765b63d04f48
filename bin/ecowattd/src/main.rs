//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the EcoWatt daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ecowatt_common::config::{AppConfig, UpstreamKind};
use ecowatt_common::logging::init_tracing;
use ecowatt_core::{AnalyticsService, LiveDetector, PipelineBuilder, ReadingPublisher};
use ecowatt_metrics::{new_registry, spawn_http_server, DaemonMetrics, PipelineMetrics, SharedRegistry};
use ecowatt_net::{AlertDispatcher, AlertTopics, ApiServerBuilder, SubscriptionRegistry, WebSocketState};
use ecowatt_upstream::{
    HttpTelemetryClient, MemoryAnomalyRepository, MemoryDeviceDirectory, MemoryTelemetryStore,
    TelemetrySink, TelemetrySource,
};
use tokio::signal;
use tracing::{info, warn};

const ONLINE_MESSAGE: &str = "EcoWatt pipeline online";

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("EcoWatt ", env!("CARGO_PKG_VERSION")),
    about = "EcoWatt telemetry daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override simulation.random_seed")]
    seed: Option<u64>,

    #[arg(
        long,
        value_name = "MS",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Override simulation.tick_interval in milliseconds"
    )]
    tick_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the pipeline and API server")]
    Run,
    #[command(about = "Load and validate configuration, then exit")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/ecowatt.toml"));
    candidates.push(PathBuf::from("configs/ecowatt.example.toml"));

    let load_started = Instant::now();
    let loaded_config = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded_config.config;
    let config_path = loaded_config.source;
    if let Some(seed) = cli.seed {
        config.simulation.random_seed = seed;
    }
    if let Some(tick_ms) = cli.tick_ms {
        config.simulation.tick_interval = Duration::from_millis(tick_ms);
    }
    config.validate().context("configuration invalid after command-line overrides")?;
    let load_duration = load_started.elapsed();

    let metrics_registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(metrics_registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();
    daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), build_profile());

    init_tracing("ecowattd", &config.logging)?;
    info!(config_path = %config_path.display(), devices = config.devices.len(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, metrics_registry).await?,
        Commands::CheckConfig => render_config_summary(&config, &config_path),
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, metrics_registry: SharedRegistry) -> Result<()> {
    let pipeline_metrics = PipelineMetrics::new(metrics_registry.clone())?;
    let metrics_server = if config.metrics.enabled {
        Some(spawn_http_server(metrics_registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let directory = Arc::new(MemoryDeviceDirectory::new(config.devices.clone()));
    let (sink, source) = match config.upstream.kind {
        UpstreamKind::Memory => {
            let store = Arc::new(MemoryTelemetryStore::new(config.upstream.retention));
            info!(retention = config.upstream.retention, "using in-memory telemetry store");
            (
                store.clone() as Arc<dyn TelemetrySink>,
                store as Arc<dyn TelemetrySource>,
            )
        }
        UpstreamKind::Http => {
            let client = Arc::new(
                HttpTelemetryClient::from_config(&config.upstream)
                    .context("failed to build upstream telemetry client")?,
            );
            info!(base_url = %config.upstream.base_url, "using http telemetry upstream");
            (
                client.clone() as Arc<dyn TelemetrySink>,
                client as Arc<dyn TelemetrySource>,
            )
        }
    };

    let subscriptions = Arc::new(SubscriptionRegistry::new());
    let topics = AlertTopics::new(config.alerts.topic_capacity);
    let dispatcher = AlertDispatcher::new(topics.clone(), config.alerts.prediction_threshold)
        .with_metrics(pipeline_metrics.clone());

    let mut publisher = ReadingPublisher::new(
        sink,
        subscriptions.clone(),
        Arc::new(MemoryAnomalyRepository::with_retention(config.upstream.retention)),
        dispatcher.clone(),
    )
    .with_call_timeout(config.upstream.request_timeout)
    .with_metrics(pipeline_metrics.clone());
    if config.detection.enabled {
        publisher = publisher.with_live_detection(Arc::new(LiveDetector::from_config(&config.detection)));
    } else {
        info!("live detection disabled by configuration");
    }
    let publisher = Arc::new(publisher);

    let pipeline = if config.simulation.enabled {
        let handle = PipelineBuilder::from_config(&config.simulation, directory.clone(), publisher.clone())?
            .with_outbound_timeout(config.upstream.request_timeout * 2)
            .with_metrics(pipeline_metrics.clone())
            .spawn();
        Some(handle)
    } else {
        info!("telemetry simulation disabled by configuration");
        None
    };

    let api_server = if config.api.enabled {
        let service = AnalyticsService::new(directory, source, publisher, dispatcher.clone())
            .with_metrics(pipeline_metrics.clone());
        let websocket = WebSocketState::new(subscriptions, topics)
            .with_queue_capacity(config.api.ws_queue_capacity)
            .with_metrics(pipeline_metrics);
        match ApiServerBuilder::new(config.api.listen, Arc::new(service), dispatcher.clone(), websocket)
            .spawn()
            .await
        {
            Ok(server) => Some(server),
            Err(err) => {
                warn!(error = %err, "failed to start api server");
                None
            }
        }
    } else {
        info!("api server disabled by configuration");
        None
    };

    dispatcher.broadcast_system_message(ONLINE_MESSAGE);
    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    if let Some(handle) = pipeline {
        handle.shutdown().await?;
    }
    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

fn render_config_summary(config: &AppConfig, path: &std::path::Path) {
    println!("Configuration: {} (valid)", path.display());
    println!(
        "Simulation: {} every {} ms, seed {}, anomaly probability {}",
        if config.simulation.enabled { "enabled" } else { "disabled" },
        config.simulation.tick_interval.as_millis(),
        config.simulation.random_seed,
        config.simulation.anomaly_probability
    );
    println!(
        "Detection: window {} (min {}), prediction alerts above {}",
        config.detection.window_size, config.detection.min_samples, config.alerts.prediction_threshold
    );
    println!("Upstream: {:?}", config.upstream.kind);
    println!("Devices: {}", config.devices.len());
    for device in &config.devices {
        println!(
            "  {} {} [{}] label={} status={:?}",
            device.id, device.name, device.device_type, device.label, device.status
        );
    }
}

fn build_profile() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
}
