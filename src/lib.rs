//! VMC Operator - fleet registration against a central Rancher service
//!
//! The operator keeps a fleet of managed Kubernetes clusters registered with a
//! central Rancher instance, and maintains a `VerrazzanoManagedCluster` (VMC)
//! custom resource as the local source of truth for each cluster's
//! registration state.
//!
//! # Architecture
//!
//! Two long-running pieces share the same Rancher client stack:
//! - The fleet syncer periodically fetches Rancher's authoritative cluster
//!   list and converges the local VMC set against it (create missing VMCs,
//!   delete auto-created VMCs whose remote cluster disappeared).
//! - The VMC controller drives first-time registration of a managed cluster
//!   (import, registration token, manifest) and the at-most-once push of the
//!   agent/registration secrets into the managed cluster.
//!
//! All Rancher traffic goes through a single retrying HTTP transport that
//! trusts the ingress CA and pins the ingress hostname to the discovered
//! node address.
//!
//! # Modules
//!
//! - [`crd`] - The VerrazzanoManagedCluster CRD and status types
//! - [`controller`] - VMC reconciliation (registration + secret push)
//! - [`sync`] - The periodic fleet synchronization loop
//! - [`rancher`] - Rancher API client (auth, registration, listing, push)
//! - [`k8s`] - Cluster-access and VMC-store seams over the Kubernetes API
//! - [`retry`] - Exponential backoff driver
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod k8s;
pub mod rancher;
pub mod retry;
pub mod sync;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Fleet-wide constants
// =============================================================================

/// Namespace holding all VerrazzanoManagedCluster resources
pub const FLEET_NAMESPACE: &str = "verrazzano-mc";

/// Name Rancher uses for its own host cluster
///
/// Never synchronized: it is Rancher's representation of the admin cluster
/// itself, not a managed cluster.
pub const LOCAL_CLUSTER_NAME: &str = "local";

/// Label recording which actor created a VMC
pub const CREATED_BY_LABEL: &str = "app.verrazzano.io/created-by";

/// [`CREATED_BY_LABEL`] value for VMCs created by the fleet syncer
pub const CREATED_BY_FLEET_SYNC: &str = "fleet-sync";

/// Label marking a cluster as managed by this operator
pub const MANAGED_CLUSTER_LABEL: &str = "verrazzano-managed";

/// Condition type set once the registration secrets have been delivered
pub const MANIFEST_PUSHED_CONDITION: &str = "ManifestPushed";
