//! Worker lifecycle coordination
//!
//! Coordinators drive the pods of one Spp toward the spec: create what is
//! missing, remove what is stale, converge what runs and record the result
//! in the part of status they own.
//!
//! - [`node`]: one-time worker node selection
//! - [`singleton`]: the gate (spp-ctl) and the primary switch
//! - [`workers`]: nfv, vf, mirror and pcap workers
//! - [`apps`]: applications behind the readiness barrier

pub mod apps;
pub mod node;
pub mod singleton;
pub mod workers;

use crate::config::OperatorConfig;
use crate::controller::ClusterStore;
use crate::retry::Sleeper;
use crate::workload::Owner;

pub use apps::{reconcile_apps, AppsOutcome};
pub use node::select_worker_node;
pub use singleton::{ensure_ctl, ensure_primary, Gate};
pub use workers::{reconcile_kind, KindOutcome};

/// Collaborators and placement shared by every coordinator in one pass
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    /// Cluster object store
    pub store: &'a dyn ClusterStore,
    /// Delay source for readiness polling
    pub sleeper: &'a dyn Sleeper,
    /// Operator tunables
    pub config: &'a OperatorConfig,
    /// The Spp that owns every object created in this pass
    pub owner: &'a Owner,
    /// Node every pod is pinned to
    pub node: &'a str,
}
