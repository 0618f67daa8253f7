//! Custom Resource Definitions for the VMC operator

mod cluster;
mod types;

pub use cluster::{
    VerrazzanoManagedCluster, VerrazzanoManagedClusterSpec, VerrazzanoManagedClusterStatus,
};
pub use types::{Condition, ConditionStatus, RancherRegistration, RegistrationState};
