//! Convergence planning
//!
//! Each worker kind has a planner that reads the worker's live state from
//! the control endpoint, compares it with the desired spec through the
//! normalizer and the set differ, and applies the ordered operations that
//! close the gap. Planners hold no state between calls: every decision is
//! made from the snapshot just fetched.
//!
//! - [`nfv`]: resources and patches, with forwarding stopped around patch
//!   changes
//! - [`component`]: the six-phase component/port/classifier plan shared by
//!   vf and mirror workers
//! - [`pcap`]: capture start/stop

pub mod component;
pub mod nfv;
pub mod pcap;

use std::fmt;

use tracing::{info, warn};

use crate::crd::{ObservedSummary, WorkerKind};
use crate::endpoint::ControlEndpoint;
use crate::normalize::{CanonicalClassifier, CanonicalComponent, CanonicalPatch, CanonicalPort};

/// Side of a component a port is attached to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortDirection {
    /// Receive side
    Rx,
    /// Transmit side
    Tx,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rx => write!(f, "rx"),
            Self::Tx => write!(f, "tx"),
        }
    }
}

/// Start or stop a worker activity (forwarding or capture)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Toggle {
    /// Start
    Start,
    /// Stop
    Stop,
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// One remote mutation against a worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Add a resource to a flow-wiring worker
    AddResource(String),
    /// Remove a resource from a flow-wiring worker
    DelResource(String),
    /// Add a patch
    AddPatch(CanonicalPatch),
    /// Remove every patch
    ClearPatches,
    /// Start or stop forwarding
    Forward(Toggle),
    /// Create a component
    AddComponent(CanonicalComponent),
    /// Delete a component by name
    DelComponent(String),
    /// Attach a port to a component
    AttachPort {
        /// Component name
        component: String,
        /// Rx or tx
        dir: PortDirection,
        /// Port and its VLAN attributes
        port: CanonicalPort,
    },
    /// Detach a port from a component
    DetachPort {
        /// Component name
        component: String,
        /// Rx or tx
        dir: PortDirection,
        /// Port being detached
        port: CanonicalPort,
    },
    /// Add a classifier table entry
    AddClassifierEntry(CanonicalClassifier),
    /// Remove a classifier table entry
    DelClassifierEntry(CanonicalClassifier),
    /// Start or stop packet capture
    Capture(Toggle),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddResource(r) => write!(f, "add resource {r}"),
            Self::DelResource(r) => write!(f, "del resource {r}"),
            Self::AddPatch(p) => write!(f, "add patch {p}"),
            Self::ClearPatches => write!(f, "clear patches"),
            Self::Forward(t) => write!(f, "forward {t}"),
            Self::AddComponent(c) => write!(f, "add component {c}"),
            Self::DelComponent(name) => write!(f, "del component {name}"),
            Self::AttachPort {
                component,
                dir,
                port,
            } => write!(f, "attach {} {dir} to {component}", port.port),
            Self::DetachPort {
                component,
                dir,
                port,
            } => write!(f, "detach {} {dir} from {component}", port.port),
            Self::AddClassifierEntry(e) => write!(f, "add classifier {e}"),
            Self::DelClassifierEntry(e) => write!(f, "del classifier {e}"),
            Self::Capture(t) => write!(f, "capture {t}"),
        }
    }
}

/// Outcome of one convergence attempt for one worker
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConvergenceReport {
    /// Operations the endpoint accepted, in execution order
    pub applied: Vec<Operation>,
    /// Operations the endpoint rejected after retries
    pub failed: Vec<Operation>,
    /// Classifier entries skipped because their port is not attached yet
    pub deferred: Vec<CanonicalClassifier>,
    /// Live state after the last phase, `None` if it could not be read
    pub observed: Option<ObservedSummary>,
    /// Whether the endpoint confirms the worker is up
    pub ready: bool,
}

impl ConvergenceReport {
    /// A report for a worker whose state could not be read
    pub fn unobservable() -> Self {
        Self::default()
    }

    /// Whether live state could be read at all
    pub fn is_observed(&self) -> bool {
        self.observed.is_some()
    }

    /// Observed, nothing failed, nothing deferred and the endpoint confirms readiness
    pub fn is_converged(&self) -> bool {
        self.is_observed() && self.failed.is_empty() && self.deferred.is_empty() && self.ready
    }

    /// Short explanation when the worker is not converged
    pub fn degraded_reason(&self) -> Option<String> {
        if !self.is_observed() {
            return Some("control endpoint did not report worker state".to_string());
        }
        if !self.failed.is_empty() {
            let ops: Vec<String> = self.failed.iter().map(ToString::to_string).collect();
            return Some(format!("rejected: {}", ops.join(", ")));
        }
        if !self.deferred.is_empty() {
            let entries: Vec<String> = self.deferred.iter().map(ToString::to_string).collect();
            return Some(format!("waiting for ports: {}", entries.join(", ")));
        }
        if !self.ready {
            return Some("worker not ready".to_string());
        }
        None
    }
}

/// Applies operations to one worker and records the outcome in a report
pub(crate) struct Executor<'a> {
    endpoint: &'a dyn ControlEndpoint,
    kind: WorkerKind,
    sec_id: u32,
    report: ConvergenceReport,
}

impl<'a> Executor<'a> {
    pub(crate) fn new(endpoint: &'a dyn ControlEndpoint, kind: WorkerKind, sec_id: u32) -> Self {
        Self {
            endpoint,
            kind,
            sec_id,
            report: ConvergenceReport::default(),
        }
    }

    /// Apply operations in order; returns whether all were accepted
    pub(crate) async fn apply_all(&mut self, ops: Vec<Operation>) -> bool {
        let mut all_ok = true;
        for op in ops {
            all_ok &= self.apply(op).await;
        }
        all_ok
    }

    pub(crate) async fn apply(&mut self, op: Operation) -> bool {
        if self.endpoint.apply(self.kind, self.sec_id, &op).await {
            info!(kind = %self.kind, sec_id = self.sec_id, op = %op, "applied");
            self.report.applied.push(op);
            true
        } else {
            warn!(kind = %self.kind, sec_id = self.sec_id, op = %op, "endpoint rejected operation");
            self.report.failed.push(op);
            false
        }
    }

    pub(crate) fn defer(&mut self, entry: CanonicalClassifier) {
        info!(
            kind = %self.kind,
            sec_id = self.sec_id,
            entry = %entry,
            "classifier entry target port not attached, deferring"
        );
        self.report.deferred.push(entry);
    }

    pub(crate) fn finish(mut self, observed: Option<ObservedSummary>, ready: bool) -> ConvergenceReport {
        self.report.ready = observed.is_some() && ready;
        self.report.observed = observed;
        self.report
    }
}
