//! Cluster API errors.

use thiserror::Error;

/// Errors talking to the cluster orchestrator.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The object already exists.
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// The object does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// The API answered with an unexpected status.
    #[error("cluster api returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Transport failure.
    #[error("cluster api request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Client configuration is incomplete.
    #[error("invalid cluster client configuration: {0}")]
    Config(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists { .. })
    }
}
