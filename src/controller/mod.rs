//! Controller implementation for the VerrazzanoManagedCluster CRD

mod vmc;

pub use vmc::{error_policy, reconcile, Context};
