//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Tick pipeline, live detection, and the on-demand analytics service for EcoWatt.

pub mod live;
pub mod outbound;
pub mod pipeline;
pub mod service;

pub use live::LiveDetector;
pub use outbound::ReadingPublisher;
pub use pipeline::{PipelineBuilder, PipelineHandle};
pub use service::AnalyticsService;
