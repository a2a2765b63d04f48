//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failures raised by upstream collaborators."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use thiserror::Error;

/// Result alias for upstream operations.
pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Errors surfaced by upstream adapters.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Transport failure, including timeouts.
    #[error("request to {url} failed: {source}")]
    Request {
        /// Target URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The service answered with a non-success status.
    #[error("{url} answered with status {status}")]
    Status {
        /// Target URL.
        url: String,
        /// HTTP status returned.
        status: reqwest::StatusCode,
    },
    /// Base URL could not be parsed or cannot carry a path.
    #[error("invalid upstream base url {0:?}")]
    InvalidBaseUrl(String),
    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    /// The collaborator is not reachable.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
}
