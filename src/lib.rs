//! spp-operator - Kubernetes operator for DPDK Soft Patch Panel deployments
//!
//! An `Spp` resource declares one patch panel on one node: the spp-ctl gate,
//! the primary switch, secondary workers (nfv, vf, mirror, pcap) and the DPDK
//! applications wired to them. The operator creates the pods, then converges
//! each running worker's live configuration to the spec through spp-ctl's
//! REST API.
//!
//! # Modules
//!
//! - [`crd`] - The `Spp` custom resource and its status
//! - [`controller`] - Reconcile loop and cluster object store
//! - [`lifecycle`] - Per-kind worker coordination, readiness polling, node selection
//! - [`planner`] - Ordered convergence plans per worker kind
//! - [`normalize`] - Canonical forms of desired and observed entities
//! - [`diff`] - Ordered set difference over canonical entities
//! - [`endpoint`] - spp-ctl client
//! - [`workload`] - Pod and Service construction
//! - [`retry`] - Bounded retry and polling
//! - [`config`] - Operator tunables
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod diff;
pub mod endpoint;
pub mod error;
pub mod lifecycle;
pub mod normalize;
pub mod planner;
pub mod retry;
pub mod workload;

#[cfg(test)]
mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
