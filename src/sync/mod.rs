//! Periodic fleet synchronization
//!
//! The [`FleetSyncer`] converges the local VMC set against Rancher's
//! authoritative cluster list: every remote cluster (except Rancher's own
//! `"local"` sentinel) gets a VMC, and auto-created VMCs whose remote
//! cluster disappeared are removed. A content hash of the raw listing
//! response gates the work - an unchanged fleet costs one HTTP exchange and
//! nothing else.
//!
//! Ticks are strictly sequential; a slow tick delays the next one rather
//! than overlapping it. No tick error is fatal - the loop logs and waits
//! for the next interval.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::crd::{VerrazzanoManagedCluster, VerrazzanoManagedClusterStatus};
use crate::k8s::{ClusterAccess, VmcStore};
use crate::rancher::transport::RequestSender;
use crate::rancher::{admin_secret_present, list_all_clusters, RancherCluster, RancherConfig};
use crate::retry::RetryConfig;
use crate::{Result, FLEET_NAMESPACE, LOCAL_CLUSTER_NAME};

/// Interval between sync passes
const SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// The fleet synchronization loop
///
/// Owns the only mutable state of the sync path: the content hash of the
/// last fully reconciled cluster listing. Construct one per process; tests
/// construct as many independent instances as they need.
pub struct FleetSyncer {
    access: Arc<dyn ClusterAccess>,
    store: Arc<dyn VmcStore>,
    sender: Arc<dyn RequestSender>,
    retry: RetryConfig,
    sync_interval: Duration,
    /// Hash of the last listing that was reconciled without error
    response_hash: Option<String>,
}

impl FleetSyncer {
    /// Create a syncer with the default interval and retry policy
    pub fn new(
        access: Arc<dyn ClusterAccess>,
        store: Arc<dyn VmcStore>,
        sender: Arc<dyn RequestSender>,
    ) -> Self {
        Self {
            access,
            store,
            sender,
            retry: RetryConfig::default(),
            sync_interval: SYNC_INTERVAL,
            response_hash: None,
        }
    }

    /// Override the sync interval
    pub fn with_interval(mut self, sync_interval: Duration) -> Self {
        self.sync_interval = sync_interval;
        self
    }

    /// Override the retry policy for Rancher calls
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run the sync loop for the lifetime of the process.
    ///
    /// Tick errors are logged and absorbed; the stored hash is only advanced
    /// by error-free passes, so a failed pass is retried on the next tick
    /// even if the remote list has not changed in the interim.
    pub async fn run(mut self) {
        let mut ticker = interval(self.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = self.sync_interval.as_secs(), "fleet syncer started");
        loop {
            ticker.tick().await;
            if let Err(e) = self.sync_once().await {
                error!(error = %e, "fleet sync pass failed");
            }
        }
    }

    /// Run one sync pass.
    ///
    /// A missing admin secret is a normal idle state (Rancher absent, or
    /// this is not an admin cluster), not a failure.
    pub async fn sync_once(&mut self) -> Result<()> {
        if !admin_secret_present(self.access.as_ref()).await? {
            debug!("Rancher admin secret not present, skipping fleet sync");
            return Ok(());
        }

        let config =
            RancherConfig::resolve(self.access.as_ref(), self.sender.as_ref(), &self.retry)
                .await?;
        let (clusters, hash) =
            list_all_clusters(self.sender.as_ref(), &config, &self.retry).await?;

        if self.response_hash.as_deref() == Some(hash.as_str()) {
            debug!("cluster list unchanged, skipping reconciliation");
            return Ok(());
        }

        self.ensure_vmcs(&clusters).await?;
        self.delete_orphaned_vmcs(&clusters).await?;

        // Both passes completed; this listing counts as reconciled
        self.response_hash = Some(hash);
        Ok(())
    }

    /// Ensure a VMC exists, with its cluster id recorded, for every remote
    /// cluster.
    ///
    /// The first create/update error aborts the pass; earlier clusters keep
    /// their applied changes and the whole pass is retried next tick.
    async fn ensure_vmcs(&self, clusters: &[RancherCluster]) -> Result<()> {
        for cluster in clusters {
            if cluster.name == LOCAL_CLUSTER_NAME {
                continue;
            }

            let vmc = match self.store.get(&cluster.name).await? {
                Some(vmc) => vmc,
                None => {
                    info!(cluster = %cluster.name, "creating VMC for discovered cluster");
                    let vmc =
                        VerrazzanoManagedCluster::auto_created(&cluster.name, FLEET_NAMESPACE);
                    self.store.create(&vmc).await?;
                    vmc
                }
            };

            // A recorded cluster id is immutable; only fill it when empty
            if vmc.cluster_id().is_none() {
                let mut status = vmc.status.clone().unwrap_or_default();
                status.rancher_registration.cluster_id = Some(cluster.id.clone());
                self.update_status(&cluster.name, status).await?;
            }
        }
        Ok(())
    }

    /// Delete auto-created VMCs whose remote cluster disappeared.
    ///
    /// Only VMCs that carry the auto-created label AND a recorded cluster id
    /// are eligible; anything created by hand is never touched.
    async fn delete_orphaned_vmcs(&self, clusters: &[RancherCluster]) -> Result<()> {
        let remote_names: HashSet<&str> = clusters.iter().map(|c| c.name.as_str()).collect();

        for vmc in self.store.list().await? {
            let name = vmc.metadata.name.clone().unwrap_or_default();
            if name == LOCAL_CLUSTER_NAME || remote_names.contains(name.as_str()) {
                continue;
            }
            if !vmc.is_auto_created() || vmc.cluster_id().is_none() {
                continue;
            }

            info!(cluster = %name, "deleting VMC for departed cluster");
            self.store.delete(&name).await?;
        }
        Ok(())
    }

    async fn update_status(
        &self,
        name: &str,
        status: VerrazzanoManagedClusterStatus,
    ) -> Result<()> {
        self.store.update_status(name, &status).await
    }
}
