//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the pipeline runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the EcoWatt workspace.
//! This crate exposes configuration loading, logging bootstrap, and tick timing
//! utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod time;

pub use config::{
    AlertConfig, ApiConfig, AppConfig, DetectionConfig, LoadedAppConfig, LoggingConfig,
    MetricsConfig, SimulationConfig, UpstreamConfig, UpstreamKind,
};
pub use logging::{init_tracing, LogFormat, LogRotation};
pub use metrics::{JitterHistogram, JitterSummary, LoopTimingReporter};
