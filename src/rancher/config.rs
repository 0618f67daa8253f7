//! Per-attempt Rancher connection config
//!
//! A [`RancherConfig`] is resolved fresh from cluster state for every
//! top-level operation (registration attempt or sync pass) and never cached:
//! the ingress address, CA bundle, and admin credential can all change
//! underneath a long-lived operator.

use tracing::debug;

use super::transport::RequestSender;
use super::{
    auth, ADMIN_SECRET, ADMIN_SECRET_PASSWORD_KEY, INGRESS_CONTROLLER_NAMESPACE,
    INGRESS_CONTROLLER_POD_SELECTOR, INGRESS_CONTROLLER_SERVICE, INGRESS_HTTPS_PORT_NAME,
    RANCHER_INGRESS, RANCHER_NAMESPACE, RANCHER_TLS_CA_KEY, RANCHER_TLS_CA_SECRET,
};
use crate::k8s::ClusterAccess;
use crate::retry::RetryConfig;
use crate::{Error, Result};

/// Connection and credential material for one Rancher exchange
///
/// `host` is the ingress hostname the certificate must verify against;
/// `host_ip`/`host_port` is the address actually connected to. The transport
/// pins one to the other.
#[derive(Clone, Debug)]
pub struct RancherConfig {
    /// Rancher ingress hostname (expected TLS server name)
    pub host: String,
    /// Node address the ingress controller is reachable on
    pub host_ip: String,
    /// NodePort of the ingress controller's https port
    pub host_port: i32,
    /// Base URL for all API paths
    pub base_url: String,
    /// Bearer token obtained from the admin login
    pub access_token: String,
    /// PEM bundle of the ingress root CA; empty means no custom trust
    pub trusted_ca: Vec<u8>,
}

impl RancherConfig {
    /// Resolve a config from cluster state and log in.
    ///
    /// Discovers the ingress hostname, the controller's node address and
    /// https NodePort, and the optional CA bundle, then exchanges the admin
    /// credential for a bearer token. Fails if the admin secret is absent;
    /// callers that treat that as a normal condition should probe
    /// [`admin_secret_present`] first.
    pub async fn resolve(
        access: &dyn ClusterAccess,
        sender: &dyn RequestSender,
        retry: &RetryConfig,
    ) -> Result<Self> {
        let host = access
            .ingress_host(RANCHER_NAMESPACE, RANCHER_INGRESS)
            .await?;
        let host_ip = access
            .first_pod_host_ip(INGRESS_CONTROLLER_NAMESPACE, INGRESS_CONTROLLER_POD_SELECTOR)
            .await?;
        let host_port = access
            .service_node_port(
                INGRESS_CONTROLLER_NAMESPACE,
                INGRESS_CONTROLLER_SERVICE,
                INGRESS_HTTPS_PORT_NAME,
            )
            .await?;

        // No CA secret means the ingress certificate chains to a public root
        let trusted_ca = access
            .secret_bytes(RANCHER_NAMESPACE, RANCHER_TLS_CA_SECRET, RANCHER_TLS_CA_KEY)
            .await?
            .unwrap_or_default();
        if trusted_ca.is_empty() {
            debug!("no Rancher CA secret found, using system trust roots");
        }

        let password_bytes = access
            .secret_bytes(RANCHER_NAMESPACE, ADMIN_SECRET, ADMIN_SECRET_PASSWORD_KEY)
            .await?
            .ok_or_else(|| {
                Error::cluster_state(format!(
                    "admin secret {}/{} not found",
                    RANCHER_NAMESPACE, ADMIN_SECRET
                ))
            })?;
        let password = String::from_utf8(password_bytes)
            .map_err(|_| Error::cluster_state("admin password is not valid UTF-8"))?;

        let mut config = Self {
            base_url: format!("https://{}:{}", host, host_port),
            host,
            host_ip,
            host_port,
            access_token: String::new(),
            trusted_ca,
        };

        config.access_token = auth::login(sender, &config, password.trim(), retry).await?;
        Ok(config)
    }
}

/// Whether the Rancher admin secret exists at all
///
/// Used by the fleet syncer to distinguish "Rancher is not installed here"
/// (a normal idle state) from a failing sync pass.
pub async fn admin_secret_present(access: &dyn ClusterAccess) -> Result<bool> {
    Ok(access
        .secret_bytes(RANCHER_NAMESPACE, ADMIN_SECRET, ADMIN_SECRET_PASSWORD_KEY)
        .await?
        .is_some())
}
