//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the pipeline runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::FixedOffset;
use ecowatt_model::Device;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::{LogFormat, LogRotation};

fn default_true() -> bool {
    true
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_simulation_seed() -> u64 {
    0xEC0_57A7u64
}

fn default_anomaly_probability() -> f64 {
    0.05
}

fn default_window_size() -> usize {
    60
}

fn default_min_samples() -> usize {
    10
}

fn default_prediction_threshold() -> f64 {
    3000.0
}

fn default_topic_capacity() -> usize {
    256
}

fn default_upstream_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_upstream_url() -> String {
    "https://industrial.api.ubidots.com/api/v1.6".to_owned()
}

fn default_token_env() -> String {
    "ECOWATT_UPSTREAM_TOKEN".to_owned()
}

fn default_retention() -> usize {
    17_280
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_ws_queue_capacity() -> usize {
    256
}

/// Primary configuration object for the EcoWatt runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub devices: Vec<Device>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "ECOWATT_CONFIG";

    /// Load configuration from disk, respecting the `ECOWATT_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.simulation.validate()?;
        self.detection.validate()?;
        self.alerts.validate()?;
        self.upstream.validate()?;
        self.api.validate()?;
        self.logging.validate()?;

        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.id) {
                return Err(anyhow!("device {} declared more than once", device.id));
            }
            if device.label.trim().is_empty() {
                return Err(anyhow!("device {} must declare a non-empty label", device.id));
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Telemetry generator settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub tick_interval: Duration,
    #[serde(default = "default_simulation_seed")]
    pub random_seed: u64,
    #[serde(default = "default_anomaly_probability")]
    pub anomaly_probability: f64,
    /// Offset applied to UTC timestamps before evaluating the daily load pattern.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: default_tick_interval(),
            random_seed: default_simulation_seed(),
            anomaly_probability: default_anomaly_probability(),
            utc_offset_minutes: 0,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(anyhow!("simulation.tick_interval must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.anomaly_probability) {
            return Err(anyhow!(
                "simulation.anomaly_probability must lie within [0, 1], got {}",
                self.anomaly_probability
            ));
        }
        self.utc_offset()?;
        Ok(())
    }

    /// Offset used to derive the local time of day.
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            anyhow!(
                "simulation.utc_offset_minutes {} is out of range",
                self.utc_offset_minutes
            )
        })
    }
}

/// Live Z-score detection over the rolling per-device window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: default_window_size(),
            min_samples: default_min_samples(),
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_samples < 2 {
            return Err(anyhow!("detection.min_samples must be at least 2"));
        }
        if self.window_size < self.min_samples {
            return Err(anyhow!(
                "detection.window_size ({}) must be >= detection.min_samples ({})",
                self.window_size,
                self.min_samples
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Predictions above this value raise a PREDICTION alert.
    #[serde(default = "default_prediction_threshold")]
    pub prediction_threshold: f64,
    #[serde(default = "default_topic_capacity")]
    pub topic_capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            prediction_threshold: default_prediction_threshold(),
            topic_capacity: default_topic_capacity(),
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<()> {
        if self.topic_capacity == 0 {
            return Err(anyhow!("alerts.topic_capacity must be greater than zero"));
        }
        if !self.prediction_threshold.is_finite() {
            return Err(anyhow!("alerts.prediction_threshold must be finite"));
        }
        Ok(())
    }
}

/// Backing implementation for the upstream telemetry store.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamKind {
    #[default]
    Memory,
    Http,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub kind: UpstreamKind,
    #[serde(default = "default_upstream_url")]
    pub base_url: String,
    /// Token supplied inline; when absent the `token_env` variable is consulted.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_upstream_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    /// Readings retained per device label by the in-memory store.
    #[serde(default = "default_retention")]
    pub retention: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            kind: UpstreamKind::Memory,
            base_url: default_upstream_url(),
            token: None,
            token_env: default_token_env(),
            request_timeout: default_upstream_timeout(),
            retention: default_retention(),
        }
    }
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.kind == UpstreamKind::Http && self.base_url.trim().is_empty() {
            return Err(anyhow!("upstream.base_url is required for the http upstream"));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("upstream.request_timeout must be greater than zero"));
        }
        if self.retention == 0 {
            return Err(anyhow!("upstream.retention must be greater than zero"));
        }
        Ok(())
    }

    /// Resolve the API token, preferring the inline value.
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var(&self.token_env).ok())
            .filter(|token| !token.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Filter directive used when neither `ECOWATT_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub file_enabled: bool,
    #[serde(default)]
    pub rotation: LogRotation,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        tracing_subscriber::EnvFilter::try_new(&self.level)
            .with_context(|| format!("logging.level {:?} is not a valid filter", self.level))?;
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            level: default_log_level(),
            file_enabled: true,
            rotation: LogRotation::default(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
    /// Messages buffered per `/ws/energy` connection before readings are dropped.
    #[serde(default = "default_ws_queue_capacity")]
    pub ws_queue_capacity: usize,
}

impl ApiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ws_queue_capacity == 0 {
            return Err(anyhow!("api.ws_queue_capacity must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_api_listen(),
            ws_queue_capacity: default_ws_queue_capacity(),
        }
    }
}
