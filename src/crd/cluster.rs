//! VerrazzanoManagedCluster Custom Resource Definition
//!
//! A VerrazzanoManagedCluster (VMC) represents one managed cluster's
//! registration state with the central Rancher service. VMCs live in the
//! fleet namespace and are named after the cluster's Rancher name - the two
//! identifier spaces are deliberately unified.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ConditionStatus, RancherRegistration};
use crate::{CREATED_BY_FLEET_SYNC, CREATED_BY_LABEL, MANAGED_CLUSTER_LABEL};

/// Specification for a VerrazzanoManagedCluster
///
/// The spec is intentionally thin: the interesting state (registration
/// outcome, cluster id, delivery conditions) lives in the status, which the
/// operator owns.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "clusters.verrazzano.io",
    version = "v1alpha1",
    kind = "VerrazzanoManagedCluster",
    plural = "verrazzanomanagedclusters",
    shortname = "vmc",
    status = "VerrazzanoManagedClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"ClusterID","type":"string","jsonPath":".status.rancherRegistration.clusterId"}"#,
    printcolumn = r#"{"name":"Registration","type":"string","jsonPath":".status.rancherRegistration.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VerrazzanoManagedClusterSpec {
    /// Free-form description of the managed cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Status for a VerrazzanoManagedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerrazzanoManagedClusterStatus {
    /// Rancher registration state for this cluster
    #[serde(default)]
    pub rancher_registration: RancherRegistration,

    /// Conditions recording operator progress
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl VerrazzanoManagedClusterStatus {
    /// Append a condition unless one of the same type and status is already
    /// recorded
    pub fn add_condition(&mut self, condition: Condition) {
        let already_recorded = self
            .conditions
            .iter()
            .any(|c| c.type_ == condition.type_ && c.status == condition.status);
        if !already_recorded {
            self.conditions.push(condition);
        }
    }
}

impl VerrazzanoManagedCluster {
    /// Build a minimally populated VMC carrying the auto-created labels
    ///
    /// Used by the fleet syncer when a remote cluster has no local VMC yet.
    pub fn auto_created(name: &str, namespace: &str) -> Self {
        let labels = BTreeMap::from([
            (CREATED_BY_LABEL.to_string(), CREATED_BY_FLEET_SYNC.to_string()),
            (MANAGED_CLUSTER_LABEL.to_string(), "true".to_string()),
        ]);
        let mut vmc =
            VerrazzanoManagedCluster::new(name, VerrazzanoManagedClusterSpec::default());
        vmc.metadata.namespace = Some(namespace.to_string());
        vmc.metadata.labels = Some(labels);
        vmc
    }

    /// The Rancher cluster id recorded on this VMC, if any
    pub fn cluster_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.rancher_registration.cluster_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Whether this VMC was created by the fleet syncer
    pub fn is_auto_created(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(CREATED_BY_LABEL))
            .is_some_and(|v| v == CREATED_BY_FLEET_SYNC)
    }

    /// Whether a condition of the given type is recorded with status True
    pub fn has_condition_true(&self, type_: &str) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.conditions
                .iter()
                .any(|c| c.type_ == type_ && c.status == ConditionStatus::True)
        })
    }
}
