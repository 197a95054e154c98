//! Error types for the runner manager.

use thiserror::Error;

/// Errors that abort a reconcile tick.
///
/// Nothing here is retried within the tick; the next tick is the retry.
#[derive(Debug, Error)]
pub enum Error {
    /// Admin API request failed
    #[error("admin API request failed: {0}")]
    Api(#[from] reqwest::Error),

    /// Admin API answered with a non-success status
    #[error("admin API returned {status}: {body}")]
    ApiStatus { status: u16, body: String },

    /// Kubernetes request failed
    #[error("kubernetes request failed: {0}")]
    Kube(#[from] kube::Error),

    /// Serialization error while building a manifest
    #[error("manifest serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
