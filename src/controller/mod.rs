//! Controller for the Spp CRD
//!
//! The reconcile loop lives in [`spp`]; every Kubernetes call it makes goes
//! through the [`ClusterStore`] seam in [`store`].

mod spp;
mod store;

pub use spp::{error_policy, reconcile, Context, ContextBuilder};
#[cfg(test)]
pub use store::MockClusterStore;
pub use store::{ClusterStore, KubeClusterStore};
