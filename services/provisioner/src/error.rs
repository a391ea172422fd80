//! Provisioning errors and their HTTP representation.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use csi_lvm_cluster::ClusterError;
use serde::Serialize;
use thiserror::Error;

/// Errors from provisioning or reclaiming a volume.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The request is incomplete or names an unsupported value.
    #[error("configuration error, {0}")]
    Configuration(String),

    /// The execution unit did not succeed in time.
    #[error("unit {unit} did not succeed within {after:?}{}", fmt_logs(.logs))]
    Timeout {
        unit: String,
        after: Duration,
        logs: Option<String>,
    },

    /// Shutdown interrupted the wait for an execution unit.
    #[error("waiting for unit {unit} was cancelled")]
    Cancelled { unit: String },

    /// The volume descriptor lacks placement information.
    #[error("invalid volume descriptor: {0}")]
    InvalidDescriptor(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

fn fmt_logs(logs: &Option<String>) -> String {
    match logs {
        Some(logs) if !logs.trim().is_empty() => format!(", logs: {}", logs.trim()),
        _ => String::new(),
    }
}

impl ProvisionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProvisionError::Configuration(_) => StatusCode::BAD_REQUEST,
            ProvisionError::InvalidDescriptor(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ProvisionError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProvisionError::Cancelled { .. } | ProvisionError::Cluster(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProvisionError::Configuration(_) => "configuration",
            ProvisionError::InvalidDescriptor(_) => "invalid_descriptor",
            ProvisionError::Timeout { .. } => "timeout",
            ProvisionError::Cancelled { .. } => "cancelled",
            ProvisionError::Cluster(_) => "cluster",
        }
    }

    /// Whether the orchestrator may retry the whole request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProvisionError::Timeout { .. } | ProvisionError::Cancelled { .. }
        )
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    retryable: bool,
}

impl IntoResponse for ProvisionError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_carries_logs() {
        let err = ProvisionError::Timeout {
            unit: "create-pvc-1".to_string(),
            after: Duration::from_secs(120),
            logs: Some("lvcreate: insufficient free space\n".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "unit create-pvc-1 did not succeed within 120s, logs: lvcreate: insufficient free space"
        );
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert!(err.is_retryable());
    }

    #[test]
    fn configuration_is_bad_request() {
        let err = ProvisionError::Configuration("no node was specified".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_retryable());
    }
}
