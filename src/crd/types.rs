//! Shared status types for the VerrazzanoManagedCluster CRD

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A status condition on a VerrazzanoManagedCluster
///
/// Conditions are append-only: the operator records state transitions by
/// adding conditions, never by rewriting history.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., ManifestPushed)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            message: Some(message.into()),
            last_transition_time: Utc::now(),
        }
    }
}

/// Outcome of the most recent Rancher registration attempt
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RegistrationState {
    /// Registration completed and the cluster id is recorded
    Completed,
    /// The last registration attempt failed
    Failed,
}

/// Rancher registration state recorded on a VMC
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RancherRegistration {
    /// Opaque cluster id assigned by Rancher; set once, never overwritten
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,

    /// Outcome of the most recent registration attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<RegistrationState>,

    /// Human-readable detail about the registration outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
