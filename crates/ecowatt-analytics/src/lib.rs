//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Statistical analytics over device telemetry."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Pure analytics over reading windows. Nothing here performs I/O; callers
//! fetch history and hand it in.
pub mod detector;
pub mod errors;
pub mod scenario;
pub mod stats;
pub mod twin;

pub use detector::ZScoreDetector;
pub use errors::{AnalyticsError, Result};
pub use scenario::{describe, simulate};
pub use stats::{summarize, Summary};
pub use twin::{PowerPredictor, SimpleAveragePredictor};
