//! At-most-once delivery of registration secrets to a managed cluster
//!
//! The push goes through Rancher's proxy API, so it only needs the managed
//! cluster's Rancher id, not direct network reach. A `ManifestPushed=True`
//! condition on the VMC is the terminal marker: once recorded, every future
//! reconciliation short-circuits, which is what makes delivery at-most-once
//! despite the controller re-running indefinitely.

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use reqwest::StatusCode;
use tracing::{debug, info};

use super::registration::fetch_cluster_state;
use super::transport::{send_with_retry, Request, RequestSender};
use super::RancherConfig;
use crate::crd::{Condition, ConditionStatus, VerrazzanoManagedCluster};
use crate::k8s::{ClusterAccess, VmcStore};
use crate::retry::RetryConfig;
use crate::{Error, Result, FLEET_NAMESPACE, MANIFEST_PUSHED_CONDITION};

/// Local secret holding the cluster agent credentials
const AGENT_SECRET: &str = "verrazzano-cluster-agent";

/// Local secret holding the cluster registration material
const REGISTRATION_SECRET: &str = "verrazzano-cluster-registration";

/// Namespace on the managed cluster receiving the secret copies
const TARGET_NAMESPACE: &str = "verrazzano-system";

/// Remote cluster state required before pushing
const ACTIVE_STATE: &str = "active";

/// Copy the agent and registration secrets into a managed cluster.
///
/// Skips entirely when the VMC already carries the `ManifestPushed=True`
/// condition. Otherwise requires the remote cluster to be active, upserts
/// both secrets through the proxy API, and records the condition.
pub async fn push_registration_secrets(
    sender: &dyn RequestSender,
    config: &RancherConfig,
    access: &dyn ClusterAccess,
    store: &dyn VmcStore,
    vmc: &VerrazzanoManagedCluster,
    retry: &RetryConfig,
) -> Result<()> {
    let name = vmc.name_any();

    if vmc.has_condition_true(MANIFEST_PUSHED_CONDITION) {
        debug!(cluster = %name, "registration secrets already delivered");
        return Ok(());
    }

    let cluster_id = vmc
        .cluster_id()
        .ok_or_else(|| Error::registration(format!("cluster {} has no recorded id", name)))?;

    let state = fetch_cluster_state(sender, config, cluster_id, retry).await?;
    if state != ACTIVE_STATE {
        return Err(Error::registration(format!(
            "cluster {} is {} in Rancher, not {}",
            name, state, ACTIVE_STATE
        )));
    }

    for secret_name in [AGENT_SECRET, REGISTRATION_SECRET] {
        let secret = access
            .secret(FLEET_NAMESPACE, secret_name)
            .await?
            .ok_or_else(|| {
                Error::cluster_state(format!(
                    "secret {}/{} not found",
                    FLEET_NAMESPACE, secret_name
                ))
            })?;
        upsert_remote_secret(sender, config, cluster_id, secret_name, &secret, retry).await?;
    }

    let mut status = vmc.status.clone().unwrap_or_default();
    status.add_condition(Condition::new(
        MANIFEST_PUSHED_CONDITION,
        ConditionStatus::True,
        "registration secrets delivered",
    ));
    store.update_status(&name, &status).await?;

    info!(cluster = %name, "registration secrets pushed");
    Ok(())
}

/// Upsert one secret into the managed cluster through the proxy API.
///
/// GET decides the verb: 200 means the object exists and is replaced with
/// PUT (carrying the observed resourceVersion); 404 means it is created
/// with POST against the collection.
async fn upsert_remote_secret(
    sender: &dyn RequestSender,
    config: &RancherConfig,
    cluster_id: &str,
    secret_name: &str,
    local_secret: &Secret,
    retry: &RetryConfig,
) -> Result<()> {
    let collection_url = format!(
        "{}/k8s/clusters/{}/api/v1/namespaces/{}/secrets",
        config.base_url, cluster_id, TARGET_NAMESPACE
    );
    let item_url = format!("{}/{}", collection_url, secret_name);

    let mut payload = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": secret_name,
            "namespace": TARGET_NAMESPACE,
        },
        "type": local_secret.type_.clone(),
        "data": local_secret.data.clone(),
    });

    let request = Request::get(&item_url).with_bearer(&config.access_token);
    let response = send_with_retry(sender, config, &request, retry, "secret lookup").await?;

    let (request, operation) = match response.status {
        StatusCode::OK => {
            // Replacing an existing object needs its current resourceVersion
            let existing: serde_json::Value = serde_json::from_str(&response.body)?;
            if let Some(version) = existing.pointer("/metadata/resourceVersion") {
                payload["metadata"]["resourceVersion"] = version.clone();
            }
            (
                Request::put(&item_url, payload.to_string()).with_bearer(&config.access_token),
                "secret update",
            )
        }
        StatusCode::NOT_FOUND => (
            Request::post(&collection_url, payload.to_string())
                .with_bearer(&config.access_token),
            "secret create",
        ),
        status => return Err(Error::unexpected_status("secret lookup", status)),
    };

    let response = send_with_retry(sender, config, &request, retry, operation).await?;
    match response.status {
        StatusCode::OK | StatusCode::CREATED => Ok(()),
        status => Err(Error::unexpected_status(operation, status)),
    }
}
