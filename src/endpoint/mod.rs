//! spp-ctl control endpoint
//!
//! spp-ctl exposes a REST API in front of the primary switch and every
//! secondary worker. The operator reads worker state and applies
//! [`Operation`]s through the [`ControlEndpoint`] trait; the production
//! implementation speaks HTTP, tests substitute a mock or an in-memory fake.
//!
//! Reads and deletions are single-attempt and report failure as `None` /
//! `false`; the next reconcile pass corrects whatever was missed. Mutations
//! are retried with a fixed delay before giving up.

mod http;
mod types;

use std::sync::Arc;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::crd::WorkerKind;
use crate::planner::Operation;

pub use http::{request_for, EndpointRequest, HttpControlEndpoint, HttpEndpointProvider};
pub use types::{
    ClassifierInfo, ComponentInfo, ComponentWorkerInfo, NfvInfo, PatchInfo, PcapInfo, PortInfo,
    ProcessInfo, VlanInfo, UNUSED_COMPONENT_TYPE,
};

/// Access to one spp-ctl instance
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlEndpoint: Send + Sync {
    /// `GET /v1/processes`; `None` when spp-ctl does not answer
    async fn processes(&self) -> Option<Vec<ProcessInfo>>;

    /// Live state of a flow-wiring worker
    async fn observe_nfv(&self, sec_id: u32) -> Option<NfvInfo>;

    /// Live state of a component worker (vf or mirror)
    async fn observe_components(&self, kind: WorkerKind, sec_id: u32)
        -> Option<ComponentWorkerInfo>;

    /// Live state of a capture worker
    async fn observe_pcap(&self, sec_id: u32) -> Option<PcapInfo>;

    /// Apply one mutation; returns whether spp-ctl accepted it
    async fn apply(&self, kind: WorkerKind, sec_id: u32, op: &Operation) -> bool;

    /// Tell spp-ctl a worker is going away (best effort)
    async fn announce_removal(&self, kind: WorkerKind, sec_id: u32) -> bool;
}

/// Creates endpoint clients for a given spp-ctl address
#[cfg_attr(test, automock)]
pub trait EndpointProvider: Send + Sync {
    /// Client for the spp-ctl behind `vip`
    fn connect(&self, vip: &str) -> Arc<dyn ControlEndpoint>;
}
