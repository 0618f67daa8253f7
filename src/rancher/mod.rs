//! Rancher API client
//!
//! Everything that crosses the wire to the central Rancher service lives
//! here: config resolution from cluster state, admin login, the cluster
//! registration protocol, fleet listing with pagination, and the proxy-API
//! secret push.

mod auth;
mod clusters;
mod config;
mod push;
mod registration;
pub mod transport;

pub use auth::login;
pub use clusters::list_all_clusters;
pub use config::{admin_secret_present, RancherConfig};
pub use push::push_registration_secrets;
pub use registration::{register_cluster, Registration};

/// Namespace Rancher is installed into
pub const RANCHER_NAMESPACE: &str = "cattle-system";

/// Secret holding the Rancher admin credential
pub const ADMIN_SECRET: &str = "rancher-admin-secret";

/// Key of the admin password inside [`ADMIN_SECRET`]
pub const ADMIN_SECRET_PASSWORD_KEY: &str = "password";

/// Name of the Rancher ingress
pub const RANCHER_INGRESS: &str = "rancher";

/// Secret holding the additional root CA for the Rancher ingress
///
/// Absence of this secret means the ingress certificate chains to a public
/// root and no custom trust is needed.
pub const RANCHER_TLS_CA_SECRET: &str = "tls-ca";

/// Key of the CA bundle inside [`RANCHER_TLS_CA_SECRET`]
pub const RANCHER_TLS_CA_KEY: &str = "cacerts.pem";

/// Namespace of the NGINX ingress controller
pub const INGRESS_CONTROLLER_NAMESPACE: &str = "ingress-nginx";

/// Service exposing the ingress controller's node ports
pub const INGRESS_CONTROLLER_SERVICE: &str = "ingress-controller-ingress-nginx-controller";

/// Label selector matching the ingress controller pods
pub const INGRESS_CONTROLLER_POD_SELECTOR: &str = "app.kubernetes.io/component=controller";

/// Name of the https port on the ingress controller service
pub const INGRESS_HTTPS_PORT_NAME: &str = "https";

/// A cluster as reported by the Rancher API
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RancherCluster {
    /// Human-readable cluster name, unique within Rancher
    pub name: String,
    /// Opaque cluster id assigned by Rancher
    pub id: String,
}
