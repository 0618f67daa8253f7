//! Trait seams over the Kubernetes API
//!
//! The Rancher client stack and the fleet syncer never talk to the Kubernetes
//! API directly; they go through the two traits in this module so unit tests
//! can substitute deterministic doubles. The production implementations are
//! thin wrappers over `kube::Api`.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};

#[cfg(test)]
use mockall::automock;

use crate::crd::{VerrazzanoManagedCluster, VerrazzanoManagedClusterStatus};
use crate::{Error, Result, FLEET_NAMESPACE};

/// Read access to cluster-local state needed to reach Rancher
///
/// Covers the inputs of a registration attempt: the admin credential and CA
/// secrets, the Rancher ingress hostname, and the ingress controller's
/// node address and port.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Fetch one key of a secret; `None` if the secret or key is absent
    async fn secret_bytes(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>>;

    /// Fetch a whole secret; `None` if absent
    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Create or update a single-key secret (server-side apply)
    async fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()>;

    /// Hostname of the first rule of an ingress
    async fn ingress_host(&self, namespace: &str, name: &str) -> Result<String>;

    /// NodePort of a named service port
    async fn service_node_port(&self, namespace: &str, name: &str, port_name: &str)
        -> Result<i32>;

    /// Host IP of the first pod matching a label selector
    async fn first_pod_host_ip(&self, namespace: &str, label_selector: &str) -> Result<String>;
}

/// The VMC object store in the fleet namespace
///
/// All VMC reads and writes performed by the syncer and the controller go
/// through this trait. Deleting an already-absent VMC is not an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VmcStore: Send + Sync {
    /// Fetch a VMC by name; `None` if absent
    async fn get(&self, name: &str) -> Result<Option<VerrazzanoManagedCluster>>;

    /// List all VMCs in the fleet namespace
    async fn list(&self) -> Result<Vec<VerrazzanoManagedCluster>>;

    /// Create a new VMC
    async fn create(&self, vmc: &VerrazzanoManagedCluster) -> Result<()>;

    /// Replace a VMC's status through the status subresource
    async fn update_status(
        &self,
        name: &str,
        status: &VerrazzanoManagedClusterStatus,
    ) -> Result<()>;

    /// Delete a VMC; absent VMCs are treated as already deleted
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Production [`ClusterAccess`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterAccess {
    client: Client,
}

impl KubeClusterAccess {
    /// Create a new cluster access wrapper around the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterAccess for KubeClusterAccess {
    async fn secret_bytes(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = secrets.get_opt(name).await? else {
            return Ok(None);
        };
        Ok(secret
            .data
            .and_then(|mut data| data.remove(key))
            .map(|bytes| bytes.0))
    }

    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(secrets.get_opt(name).await?)
    }

    async fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some([(key.to_string(), k8s_openapi::ByteString(value))].into()),
            ..Default::default()
        };
        let params = PatchParams::apply("vmc-operator").force();
        secrets.patch(name, &params, &Patch::Apply(&secret)).await?;
        Ok(())
    }

    async fn ingress_host(&self, namespace: &str, name: &str) -> Result<String> {
        let ingresses: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        let ingress = ingresses.get(name).await?;
        ingress
            .spec
            .and_then(|spec| spec.rules)
            .and_then(|rules| rules.into_iter().next())
            .and_then(|rule| rule.host)
            .ok_or_else(|| {
                Error::cluster_state(format!("ingress {}/{} has no host rule", namespace, name))
            })
    }

    async fn service_node_port(
        &self,
        namespace: &str,
        name: &str,
        port_name: &str,
    ) -> Result<i32> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = services.get(name).await?;
        service
            .spec
            .and_then(|spec| spec.ports)
            .and_then(|ports| {
                ports
                    .into_iter()
                    .find(|p| p.name.as_deref() == Some(port_name))
            })
            .and_then(|port| port.node_port)
            .ok_or_else(|| {
                Error::cluster_state(format!(
                    "service {}/{} has no node port named {}",
                    namespace, name, port_name
                ))
            })
    }

    async fn first_pod_host_ip(&self, namespace: &str, label_selector: &str) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(label_selector);
        let pod_list = pods.list(&params).await?;
        pod_list
            .items
            .into_iter()
            .next()
            .and_then(|pod| pod.status)
            .and_then(|status| status.host_ip)
            .ok_or_else(|| {
                Error::cluster_state(format!(
                    "no pod with host IP matching {} in {}",
                    label_selector, namespace
                ))
            })
    }
}

/// Production [`VmcStore`] backed by the Kubernetes API
///
/// All operations target the fleet namespace.
#[derive(Clone)]
pub struct KubeVmcStore {
    api: Api<VerrazzanoManagedCluster>,
}

impl KubeVmcStore {
    /// Create a store over the fleet namespace
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::namespaced(client, FLEET_NAMESPACE),
        }
    }
}

#[async_trait]
impl VmcStore for KubeVmcStore {
    async fn get(&self, name: &str) -> Result<Option<VerrazzanoManagedCluster>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn list(&self) -> Result<Vec<VerrazzanoManagedCluster>> {
        Ok(self.api.list(&ListParams::default()).await?.items)
    }

    async fn create(&self, vmc: &VerrazzanoManagedCluster) -> Result<()> {
        self.api.create(&PostParams::default(), vmc).await?;
        Ok(())
    }

    async fn update_status(
        &self,
        name: &str,
        status: &VerrazzanoManagedClusterStatus,
    ) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            // Already gone: nothing to do
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
