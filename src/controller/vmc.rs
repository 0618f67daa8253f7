//! VerrazzanoManagedCluster reconciliation
//!
//! The controller drives first contact with a managed cluster: run the
//! registration protocol once (recording the Rancher cluster id and the
//! registration manifest), then deliver the registration secrets through the
//! Rancher proxy API. Both steps are guarded so a VMC in steady state
//! reconciles without touching the network.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{error, info, instrument, warn};

use crate::crd::{RegistrationState, VerrazzanoManagedCluster};
use crate::k8s::{ClusterAccess, KubeClusterAccess, KubeVmcStore, VmcStore};
use crate::rancher::transport::{HttpSender, RequestSender};
use crate::rancher::{push_registration_secrets, register_cluster, RancherConfig, Registration};
use crate::retry::RetryConfig;
use crate::{Error, FLEET_NAMESPACE, MANIFEST_PUSHED_CONDITION};

/// Requeue delay after successful work
const REQUEUE_AFTER: Duration = Duration::from_secs(300);

/// Requeue delay while waiting on registration/push progress
const REQUEUE_SHORT: Duration = Duration::from_secs(30);

/// Key of the manifest inside the per-cluster manifest secret
const MANIFEST_SECRET_KEY: &str = "manifest.yaml";

/// Name of the local secret storing a cluster's registration manifest
fn manifest_secret_name(cluster_name: &str) -> String {
    format!("verrazzano-cluster-{}-manifest", cluster_name)
}

/// Controller context containing shared state and clients
///
/// Holds the trait-object seams so tests can reconcile against mocks.
pub struct Context {
    /// Cluster-local state access
    pub access: Arc<dyn ClusterAccess>,
    /// VMC object store
    pub store: Arc<dyn VmcStore>,
    /// Rancher request sender
    pub sender: Arc<dyn RequestSender>,
    /// Retry policy for Rancher calls
    pub retry: RetryConfig,
}

impl Context {
    /// Create a production context from a Kubernetes client
    pub fn new(client: Client) -> Self {
        Self {
            access: Arc::new(KubeClusterAccess::new(client.clone())),
            store: Arc::new(KubeVmcStore::new(client)),
            sender: Arc::new(HttpSender),
            retry: RetryConfig::default(),
        }
    }

    /// Create a context over mock seams for unit tests
    #[cfg(test)]
    pub fn for_testing(
        access: Arc<dyn ClusterAccess>,
        store: Arc<dyn VmcStore>,
        sender: Arc<dyn RequestSender>,
    ) -> Self {
        Self {
            access,
            store,
            sender,
            retry: RetryConfig::with_max_attempts(1),
        }
    }
}

/// Reconcile a VerrazzanoManagedCluster resource
///
/// Registration and push each happen at most once; a fully registered and
/// delivered VMC is requeued without any Rancher traffic.
#[instrument(skip(vmc, ctx), fields(cluster = %vmc.name_any()))]
pub async fn reconcile(
    vmc: Arc<VerrazzanoManagedCluster>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let name = vmc.name_any();

    // Steady state: registered and delivered
    if vmc.cluster_id().is_some() && vmc.has_condition_true(MANIFEST_PUSHED_CONDITION) {
        return Ok(Action::requeue(REQUEUE_AFTER));
    }

    let config =
        RancherConfig::resolve(ctx.access.as_ref(), ctx.sender.as_ref(), &ctx.retry).await?;

    if vmc.cluster_id().is_none() {
        register(&vmc, &ctx, &config, &name).await?;
        // Let the next reconciliation observe the recorded id, then push
        return Ok(Action::requeue(REQUEUE_SHORT));
    }

    push_registration_secrets(
        ctx.sender.as_ref(),
        &config,
        ctx.access.as_ref(),
        ctx.store.as_ref(),
        &vmc,
        &ctx.retry,
    )
    .await?;

    Ok(Action::requeue(REQUEUE_AFTER))
}

/// Run the registration protocol and record its outcome on the VMC status.
///
/// A failure is recorded as `Failed` with the error message before being
/// propagated, so the status always reflects the last attempt.
async fn register(
    vmc: &VerrazzanoManagedCluster,
    ctx: &Context,
    config: &RancherConfig,
    name: &str,
) -> Result<(), Error> {
    let registration =
        match register_cluster(ctx.sender.as_ref(), config, name, &ctx.retry).await {
            Ok(registration) => registration,
            Err(e) => {
                record_failure(vmc, ctx, name, &e).await;
                return Err(e);
            }
        };

    store_manifest(ctx, name, &registration).await?;

    let mut status = vmc.status.clone().unwrap_or_default();
    status.rancher_registration.cluster_id = Some(registration.cluster_id.clone());
    status.rancher_registration.state = Some(RegistrationState::Completed);
    status.rancher_registration.message = Some("registration complete".to_string());
    ctx.store.update_status(name, &status).await?;

    info!(cluster_id = %registration.cluster_id, "registration recorded");
    Ok(())
}

/// Persist the registration manifest for the managed cluster to retrieve
async fn store_manifest(ctx: &Context, name: &str, registration: &Registration) -> Result<(), Error> {
    ctx.access
        .upsert_secret(
            FLEET_NAMESPACE,
            &manifest_secret_name(name),
            MANIFEST_SECRET_KEY,
            registration.manifest.clone().into_bytes(),
        )
        .await
}

/// Best-effort failure recording; the original error is what propagates
async fn record_failure(
    vmc: &VerrazzanoManagedCluster,
    ctx: &Context,
    name: &str,
    e: &Error,
) {
    let mut status = vmc.status.clone().unwrap_or_default();
    status.rancher_registration.state = Some(RegistrationState::Failed);
    status.rancher_registration.message = Some(e.to_string());
    if let Err(status_err) = ctx.store.update_status(name, &status).await {
        warn!(error = %status_err, "failed to record registration failure");
    }
}

/// Requeue with a short delay on reconciliation failure
pub fn error_policy(
    vmc: Arc<VerrazzanoManagedCluster>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    error!(
        error = %error,
        cluster = %vmc.name_any(),
        "reconciliation failed"
    );
    Action::requeue(REQUEUE_SHORT)
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;
    use crate::crd::{Condition, ConditionStatus, VerrazzanoManagedClusterStatus};
    use crate::k8s::{MockClusterAccess, MockVmcStore};
    use crate::rancher::transport::{MockRequestSender, Response};
    use crate::rancher::ADMIN_SECRET;

    fn admin_cluster_access() -> MockClusterAccess {
        let mut access = MockClusterAccess::new();
        access
            .expect_ingress_host()
            .returning(|_, _| Ok("rancher.example.com".to_string()));
        access
            .expect_first_pod_host_ip()
            .returning(|_, _| Ok("10.0.0.7".to_string()));
        access
            .expect_service_node_port()
            .returning(|_, _, _| Ok(31443));
        access.expect_secret_bytes().returning(|_, name, _| {
            Ok((name == ADMIN_SECRET).then(|| b"s3cret".to_vec()))
        });
        access
    }

    fn unregistered_vmc() -> Arc<VerrazzanoManagedCluster> {
        Arc::new(VerrazzanoManagedCluster::auto_created("c1", FLEET_NAMESPACE))
    }

    fn registered_vmc() -> Arc<VerrazzanoManagedCluster> {
        let mut vmc = VerrazzanoManagedCluster::auto_created("c1", FLEET_NAMESPACE);
        let mut status = VerrazzanoManagedClusterStatus::default();
        status.rancher_registration.cluster_id = Some("c-x7f2k".to_string());
        vmc.status = Some(status);
        Arc::new(vmc)
    }

    #[tokio::test]
    async fn test_steady_state_reconciles_without_network() {
        let vmc = {
            let mut vmc = (*registered_vmc()).clone();
            vmc.status.as_mut().unwrap().add_condition(Condition::new(
                MANIFEST_PUSHED_CONDITION,
                ConditionStatus::True,
                "delivered",
            ));
            Arc::new(vmc)
        };

        // No expectations anywhere: any call panics
        let ctx = Arc::new(Context::for_testing(
            Arc::new(MockClusterAccess::new()),
            Arc::new(MockVmcStore::new()),
            Arc::new(MockRequestSender::new()),
        ));

        let action = reconcile(vmc, ctx).await.unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_AFTER));
    }

    #[tokio::test]
    async fn test_first_reconcile_registers_and_records_status() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().returning(|_, request| {
            let response = if request.url.contains("action=login") {
                Response {
                    status: StatusCode::CREATED,
                    body: r#"{"token":"token-abc"}"#.to_string(),
                }
            } else if request.url.ends_with("/v3/cluster") {
                Response {
                    status: StatusCode::CREATED,
                    body: r#"{"id":"c-x7f2k"}"#.to_string(),
                }
            } else if request.url.ends_with("/v3/clusterregistrationtoken") {
                Response {
                    status: StatusCode::CREATED,
                    body: r#"{"token":"reg-token-1"}"#.to_string(),
                }
            } else if request.url.ends_with("/v3/import/reg-token-1.yaml") {
                Response {
                    status: StatusCode::OK,
                    body: "apiVersion: v1\n".to_string(),
                }
            } else {
                panic!("unexpected url {}", request.url);
            };
            Ok(response)
        });

        let mut access = admin_cluster_access();
        access
            .expect_upsert_secret()
            .times(1)
            .withf(|ns, name, key, value| {
                ns == FLEET_NAMESPACE
                    && name == "verrazzano-cluster-c1-manifest"
                    && key == MANIFEST_SECRET_KEY
                    && value.starts_with(b"apiVersion: v1")
            })
            .returning(|_, _, _, _| Ok(()));

        let mut store = MockVmcStore::new();
        store
            .expect_update_status()
            .times(1)
            .withf(|name, status| {
                name == "c1"
                    && status.rancher_registration.cluster_id.as_deref() == Some("c-x7f2k")
                    && status.rancher_registration.state == Some(RegistrationState::Completed)
            })
            .returning(|_, _| Ok(()));

        let ctx = Arc::new(Context::for_testing(
            Arc::new(access),
            Arc::new(store),
            Arc::new(sender),
        ));

        let action = reconcile(unregistered_vmc(), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_SHORT));
    }

    #[tokio::test]
    async fn test_registration_failure_is_recorded_and_propagated() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().returning(|_, request| {
            let response = if request.url.contains("action=login") {
                Response {
                    status: StatusCode::CREATED,
                    body: r#"{"token":"token-abc"}"#.to_string(),
                }
            } else {
                Response {
                    status: StatusCode::FORBIDDEN,
                    body: String::new(),
                }
            };
            Ok(response)
        });

        let mut store = MockVmcStore::new();
        store
            .expect_update_status()
            .times(1)
            .withf(|_, status| {
                status.rancher_registration.state == Some(RegistrationState::Failed)
                    && status.rancher_registration.cluster_id.is_none()
            })
            .returning(|_, _| Ok(()));

        let ctx = Arc::new(Context::for_testing(
            Arc::new(admin_cluster_access()),
            Arc::new(store),
            Arc::new(sender),
        ));

        let result = reconcile(unregistered_vmc(), ctx).await;
        assert!(matches!(result, Err(Error::UnexpectedStatus { .. })));
    }

    #[tokio::test]
    async fn test_registered_vmc_gets_secrets_pushed() {
        let mut sender = MockRequestSender::new();
        sender.expect_send().returning(|_, request| {
            let response = if request.url.contains("action=login") {
                Response {
                    status: StatusCode::CREATED,
                    body: r#"{"token":"token-abc"}"#.to_string(),
                }
            } else if request.url.ends_with("/v3/cluster/c-x7f2k") {
                Response {
                    status: StatusCode::OK,
                    body: r#"{"state":"active"}"#.to_string(),
                }
            } else if request.method == reqwest::Method::GET {
                Response {
                    status: StatusCode::NOT_FOUND,
                    body: String::new(),
                }
            } else {
                Response {
                    status: StatusCode::CREATED,
                    body: String::new(),
                }
            };
            Ok(response)
        });

        let mut access = admin_cluster_access();
        access.expect_secret().times(2).returning(|_, _| {
            Ok(Some(k8s_openapi::api::core::v1::Secret::default()))
        });

        let mut store = MockVmcStore::new();
        store
            .expect_update_status()
            .times(1)
            .withf(|_, status| {
                status.conditions.iter().any(|c| {
                    c.type_ == MANIFEST_PUSHED_CONDITION && c.status == ConditionStatus::True
                })
            })
            .returning(|_, _| Ok(()));

        let ctx = Arc::new(Context::for_testing(
            Arc::new(access),
            Arc::new(store),
            Arc::new(sender),
        ));

        let action = reconcile(registered_vmc(), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_AFTER));
    }
}
