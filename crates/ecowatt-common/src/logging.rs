//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the pipeline runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "ECOWATT_LOG";

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Stdout rendering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Pick the filter directive: `ECOWATT_LOG`, then `RUST_LOG`, then `logging.level`.
///
/// An override that does not parse is reported back and the configured level wins.
fn resolve_filter(
    ecowatt_log: Option<String>,
    rust_log: Option<String>,
    level: &str,
) -> (EnvFilter, Option<String>) {
    let candidate = ecowatt_log.or(rust_log);
    match candidate {
        Some(directive) => match EnvFilter::try_new(&directive) {
            Ok(filter) => (filter, None),
            Err(err) => (
                EnvFilter::new(level),
                Some(format!("ignoring log directive {directive:?}: {err}")),
            ),
        },
        None => (EnvFilter::new(level), None),
    }
}

fn stdout_layer(format: LogFormat) -> BoxedLayer {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = STDOUT_GUARD.set(guard);
    match format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(writer)
            .boxed(),
    }
}

fn file_layer(service_name: &str, config: &LoggingConfig) -> Result<Option<BoxedLayer>> {
    if !config.file_enabled {
        return Ok(None);
    }
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("failed to create log directory {}", config.directory.display())
    })?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let appender = RollingFileAppender::new(
        config.rotation.into(),
        &config.directory,
        format!("{prefix}.log"),
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);
    Ok(Some(
        fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(writer)
            .boxed(),
    ))
}

/// Install the global subscriber for `service_name`.
///
/// Stdout follows `config.format`; when `config.file_enabled` a JSON file named
/// after `config.file_prefix` (or the service) rolls per `config.rotation`.
/// A second call leaves the first subscriber in place.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let (filter, rejected) = resolve_filter(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
        &config.level,
    );
    let file = file_layer(service_name, config)?;

    let layers: Vec<BoxedLayer> = std::iter::once(stdout_layer(config.format))
        .chain(file)
        .collect();
    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .ok();

    if let Some(reason) = rejected {
        warn!(%reason, level = %config.level, "falling back to configured log level");
    }
    info!(
        service = %service_name,
        level = %config.level,
        format = ?config.format,
        file = config.file_enabled,
        log_dir = %config.directory.display(),
        "tracing initialised"
    );
    Ok(())
}
