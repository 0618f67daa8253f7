//! VMC Operator - registers managed clusters with Rancher and keeps the
//! local fleet in sync

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vmc_operator::controller::{error_policy, reconcile, Context};
use vmc_operator::crd::VerrazzanoManagedCluster;
use vmc_operator::k8s::{KubeClusterAccess, KubeVmcStore};
use vmc_operator::rancher::transport::HttpSender;
use vmc_operator::sync::FleetSyncer;
use vmc_operator::FLEET_NAMESPACE;

/// VMC Operator - Rancher fleet registration and synchronization
#[derive(Parser, Debug)]
#[command(name = "vmc-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install the rustls crypto provider before any client is built.
    // Failure here indicates a serious system configuration issue.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: failed to install crypto provider: {:?}. \
             The operator cannot reach Rancher without a working TLS implementation.",
            e
        );
        std::process::exit(1);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&VerrazzanoManagedCluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    run_operator().await
}

/// Run the VMC controller and the fleet syncer until the process exits
async fn run_operator() -> anyhow::Result<()> {
    tracing::info!("VMC operator starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    // The operator installs its own CRD on startup so the CRD version always
    // matches the operator version
    ensure_crd_installed(&client).await?;

    // Fleet syncer runs beside the controller for the process lifetime
    let syncer = FleetSyncer::new(
        Arc::new(KubeClusterAccess::new(client.clone())),
        Arc::new(KubeVmcStore::new(client.clone())),
        Arc::new(HttpSender),
    );
    tokio::spawn(syncer.run());

    let vmcs: Api<VerrazzanoManagedCluster> = Api::namespaced(client.clone(), FLEET_NAMESPACE);
    let ctx = Arc::new(Context::new(client));

    tracing::info!("Starting VerrazzanoManagedCluster controller");
    Controller::new(vmcs, WatcherConfig::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((vmc, _)) => tracing::debug!(cluster = %vmc.name, "reconciled"),
                Err(e) => tracing::warn!(error = %e, "reconciliation error"),
            }
        })
        .await;

    Ok(())
}

/// Install the VerrazzanoManagedCluster CRD using server-side apply
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("vmc-operator").force();

    tracing::info!("Installing VerrazzanoManagedCluster CRD...");
    crds.patch(
        "verrazzanomanagedclusters.clusters.verrazzano.io",
        &params,
        &Patch::Apply(&VerrazzanoManagedCluster::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install VerrazzanoManagedCluster CRD: {}", e))?;

    Ok(())
}
