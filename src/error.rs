//! Error types for the VMC operator

use thiserror::Error;

/// Main error type for operator failures
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// HTTP transport error (connection, TLS, DNS, timeout)
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A Rancher call completed with a status the caller did not expect
    #[error("{operation}: unexpected status {status}")]
    UnexpectedStatus {
        /// Operation the status was observed in
        operation: &'static str,
        /// The HTTP status returned
        status: reqwest::StatusCode,
    },

    /// A Rancher response was missing an expected JSON field
    #[error("{operation}: unable to find {field} in response")]
    MissingField {
        /// Operation whose response was inspected
        operation: &'static str,
        /// The missing field
        field: &'static str,
    },

    /// Required cluster state (secret, ingress, service, pod) is missing
    /// or malformed
    #[error("cluster state error: {0}")]
    ClusterState(String),

    /// Cluster registration failed
    #[error("registration error: {0}")]
    Registration(String),
}

impl Error {
    /// Create an unexpected-status error for the given operation
    pub fn unexpected_status(operation: &'static str, status: reqwest::StatusCode) -> Self {
        Self::UnexpectedStatus { operation, status }
    }

    /// Create a missing-field error for the given operation
    pub fn missing_field(operation: &'static str, field: &'static str) -> Self {
        Self::MissingField { operation, field }
    }

    /// Create a cluster state error with the given message
    pub fn cluster_state(msg: impl Into<String>) -> Self {
        Self::ClusterState(msg.into())
    }

    /// Create a registration error with the given message
    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }
}
