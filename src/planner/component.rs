//! Component/classifier convergence for spp_vf and spp_mirror
//!
//! The plan runs in six phases. Live state is read again before each phase
//! that follows a mutation, so a rejected operation never leads a later
//! phase astray:
//!
//! 1. remove classifier entries no longer desired
//! 2. on components kept as-is, detach ports no longer desired (clearing
//!    classifier entries that target each port first)
//! 3. detach every port of components no longer desired, then delete them
//! 4. add new components, attaching their rx then tx ports right away
//! 5. on components kept as-is, attach newly desired ports
//! 6. add newly desired classifier entries whose target port is attached
//!
//! Teardown runs classifier -> port -> component and buildup runs the
//! reverse, so spp_vf never sees a rule pointing at a detached port or a
//! port attach against a missing component.

use std::collections::HashSet;

use tracing::debug;

use super::{ConvergenceReport, Executor, Operation, PortDirection};
use crate::crd::{ComponentSpec, MirrorSpec, ObservedSummary, VfSpec, WorkerKind};
use crate::diff::{diff, DiffMode};
use crate::endpoint::{ComponentWorkerInfo, ControlEndpoint};
use crate::normalize::{
    normalize_all, CanonicalClassifier, CanonicalComponent, CanonicalPort, Normalize,
};
use crate::Error;

/// A component together with its attached ports
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentPorts {
    /// Identity triple
    pub id: CanonicalComponent,
    /// Rx ports in attach order
    pub rx: Vec<CanonicalPort>,
    /// Tx ports in attach order
    pub tx: Vec<CanonicalPort>,
}

impl ComponentPorts {
    fn ports(&self, dir: PortDirection) -> &[CanonicalPort] {
        match dir {
            PortDirection::Rx => &self.rx,
            PortDirection::Tx => &self.tx,
        }
    }

    fn from_spec(spec: &ComponentSpec) -> Result<Self, Error> {
        Ok(Self {
            id: spec.normalize()?,
            rx: normalize_all(&spec.rx_port)?,
            tx: normalize_all(&spec.tx_port)?,
        })
    }
}

/// Canonical component configuration of one worker, desired or observed
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComponentState {
    /// Usable components
    pub components: Vec<ComponentPorts>,
    /// Classifier table
    pub classifiers: Vec<CanonicalClassifier>,
}

impl ComponentState {
    /// Desired state of an spp_vf
    pub fn from_vf(spec: &VfSpec) -> Result<Self, Error> {
        Ok(Self {
            components: spec
                .components
                .iter()
                .map(ComponentPorts::from_spec)
                .collect::<Result<_, _>>()?,
            classifiers: normalize_all(&spec.classifier_table)?,
        })
    }

    /// Desired state of an spp_mirror, which has no classifier table
    pub fn from_mirror(spec: &MirrorSpec) -> Result<Self, Error> {
        Ok(Self {
            components: spec
                .components
                .iter()
                .map(ComponentPorts::from_spec)
                .collect::<Result<_, _>>()?,
            classifiers: Vec::new(),
        })
    }

    /// Live state reported by spp-ctl; unused cores are dropped
    pub fn from_observed(info: &ComponentWorkerInfo) -> Result<Self, Error> {
        let components = info
            .usable_components()
            .map(|c| {
                Ok(ComponentPorts {
                    id: c.normalize()?,
                    rx: normalize_all(&c.rx_port)?,
                    tx: normalize_all(&c.tx_port)?,
                })
            })
            .collect::<Result<_, Error>>()?;
        Ok(Self {
            components,
            classifiers: normalize_all(&info.classifier_table)?,
        })
    }

    fn find(&self, id: &CanonicalComponent) -> Option<&ComponentPorts> {
        self.components.iter().find(|c| &c.id == id)
    }

    /// Whether `port` is attached to any component's rx or tx side
    pub fn port_attached(&self, port: &str) -> bool {
        self.components
            .iter()
            .any(|c| c.rx.iter().chain(c.tx.iter()).any(|p| p.port == port))
    }
}

/// The six plan phases, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Remove classifier entries no longer desired
    RemoveClassifiers,
    /// Detach ports no longer desired from kept components
    DetachStalePorts,
    /// Detach ports of and delete components no longer desired
    RemoveComponents,
    /// Add new components with their ports
    AddComponents,
    /// Attach newly desired ports to kept components
    AttachNewPorts,
    /// Add newly desired classifier entries
    AddClassifiers,
}

impl Phase {
    /// All phases in order
    pub const ALL: [Phase; 6] = [
        Self::RemoveClassifiers,
        Self::DetachStalePorts,
        Self::RemoveComponents,
        Self::AddComponents,
        Self::AttachNewPorts,
        Self::AddClassifiers,
    ];
}

/// Operations of one phase plus classifier entries held back for a later pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhasePlan {
    /// Operations in execution order
    pub ops: Vec<Operation>,
    /// Entries whose target port is not attached yet
    pub deferred: Vec<CanonicalClassifier>,
}

/// Plan one phase from a single snapshot of live state
pub fn plan_phase(phase: Phase, desired: &ComponentState, observed: &ComponentState) -> PhasePlan {
    let mut plan = PhasePlan::default();
    match phase {
        Phase::RemoveClassifiers => {
            plan.ops = diff(&observed.classifiers, &desired.classifiers, DiffMode::Teardown)
                .into_iter()
                .map(Operation::DelClassifierEntry)
                .collect();
        }
        Phase::DetachStalePorts => {
            let mut cleared = HashSet::new();
            for kept in &desired.components {
                let Some(live) = observed.find(&kept.id) else {
                    continue;
                };
                for dir in [PortDirection::Rx, PortDirection::Tx] {
                    for port in diff(live.ports(dir), kept.ports(dir), DiffMode::Teardown) {
                        detach(&mut plan.ops, &mut cleared, observed, &live.id.name, dir, port);
                    }
                }
            }
        }
        Phase::RemoveComponents => {
            let mut cleared = HashSet::new();
            for live in &observed.components {
                if desired.find(&live.id).is_some() {
                    continue;
                }
                for dir in [PortDirection::Rx, PortDirection::Tx] {
                    for port in live.ports(dir) {
                        detach(
                            &mut plan.ops,
                            &mut cleared,
                            observed,
                            &live.id.name,
                            dir,
                            port.clone(),
                        );
                    }
                }
                plan.ops.push(Operation::DelComponent(live.id.name.clone()));
            }
        }
        Phase::AddComponents => {
            for new in &desired.components {
                if observed.find(&new.id).is_some() {
                    continue;
                }
                plan.ops.push(Operation::AddComponent(new.id.clone()));
                for dir in [PortDirection::Rx, PortDirection::Tx] {
                    for port in new.ports(dir) {
                        plan.ops.push(Operation::AttachPort {
                            component: new.id.name.clone(),
                            dir,
                            port: port.clone(),
                        });
                    }
                }
            }
        }
        Phase::AttachNewPorts => {
            for kept in &desired.components {
                let Some(live) = observed.find(&kept.id) else {
                    continue;
                };
                for dir in [PortDirection::Rx, PortDirection::Tx] {
                    for port in diff(live.ports(dir), kept.ports(dir), DiffMode::Buildup) {
                        plan.ops.push(Operation::AttachPort {
                            component: kept.id.name.clone(),
                            dir,
                            port,
                        });
                    }
                }
            }
        }
        Phase::AddClassifiers => {
            if observed.components.is_empty() {
                return plan;
            }
            for entry in diff(&observed.classifiers, &desired.classifiers, DiffMode::Buildup) {
                if observed.port_attached(&entry.port) {
                    plan.ops.push(Operation::AddClassifierEntry(entry));
                } else {
                    plan.deferred.push(entry);
                }
            }
        }
    }
    plan
}

/// Clear classifier entries targeting `port`, then detach it
fn detach(
    ops: &mut Vec<Operation>,
    cleared: &mut HashSet<CanonicalClassifier>,
    observed: &ComponentState,
    component: &str,
    dir: PortDirection,
    port: CanonicalPort,
) {
    for entry in observed.classifiers.iter().filter(|e| e.port == port.port) {
        if cleared.insert(entry.clone()) {
            ops.push(Operation::DelClassifierEntry(entry.clone()));
        }
    }
    ops.push(Operation::DetachPort {
        component: component.to_string(),
        dir,
        port,
    });
}

/// Flatten live state for status
pub fn summarize(info: &ComponentWorkerInfo) -> ObservedSummary {
    ObservedSummary {
        client_id: Some(info.client_id),
        ports: info.ports.clone(),
        components: info
            .usable_components()
            .map(|c| format!("{}@{}/{}", c.name, c.core, c.type_))
            .collect(),
        classifier_table: info
            .classifier_table
            .iter()
            .map(|e| format!("{}/{}->{}", e.type_, e.value, e.port))
            .collect(),
        ..Default::default()
    }
}

/// Converge one running component worker to `desired`
///
/// Readiness is confirmed when spp-ctl reports the worker under its own
/// secondary id.
pub async fn converge(
    endpoint: &dyn ControlEndpoint,
    kind: WorkerKind,
    sec_id: u32,
    desired: &ComponentState,
) -> Result<ConvergenceReport, Error> {
    let mut executor = Executor::new(endpoint, kind, sec_id);
    let mut snapshot: Option<ComponentWorkerInfo> = None;
    let mut deferred = Vec::new();

    for phase in Phase::ALL {
        let info = match snapshot.take() {
            Some(info) => info,
            None => match endpoint.observe_components(kind, sec_id).await {
                Some(info) => info,
                None => return Ok(executor.finish(None, false)),
            },
        };
        let observed = ComponentState::from_observed(&info)?;
        let plan = plan_phase(phase, desired, &observed);
        deferred = plan.deferred;

        if plan.ops.is_empty() {
            snapshot = Some(info);
            continue;
        }
        debug!(%kind, sec_id, ?phase, ops = plan.ops.len(), "applying phase");
        executor.apply_all(plan.ops).await;
    }

    for entry in deferred {
        executor.defer(entry);
    }

    let after = match snapshot {
        Some(info) => Some(info),
        None => endpoint.observe_components(kind, sec_id).await,
    };
    let ready = after
        .as_ref()
        .is_some_and(|info| info.client_id == i64::from(sec_id));
    Ok(executor.finish(after.as_ref().map(summarize), ready))
}
