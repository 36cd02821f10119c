//! Flow-wiring convergence for spp_nfv
//!
//! Forwarding is stopped before any patch is touched and restarted only
//! after the full desired patch set is in place, so the worker never routes
//! through a half-updated topology.

use tracing::debug;

use super::{ConvergenceReport, Executor, Operation, Toggle};
use crate::crd::{NfvSpec, ObservedSummary, WorkerKind};
use crate::diff::{diff, DiffMode};
use crate::endpoint::{ControlEndpoint, NfvInfo};
use crate::normalize::{normalize_all, CanonicalPatch};
use crate::Error;

/// Status reported by a forwarding spp_nfv
pub const RUNNING: &str = "running";

/// Resource types released when a worker is torn down; `phy` ports belong to the primary
const TEARDOWN_RESOURCE_TYPES: [&str; 2] = ["ring", "vhost"];

/// Desired resources and patches in canonical form
#[derive(Clone, Debug, PartialEq)]
pub struct NfvDesired {
    /// Resource identifiers
    pub resources: Vec<String>,
    /// Patches
    pub patches: Vec<CanonicalPatch>,
}

impl NfvDesired {
    /// Normalize the desired configuration of one worker
    pub fn from_spec(spec: &NfvSpec) -> Result<Self, Error> {
        Ok(Self {
            resources: spec.resources.clone(),
            patches: normalize_all(&spec.patches)?,
        })
    }
}

/// Operations that take `observed` to `desired`
pub fn plan(desired: &NfvDesired, observed: &NfvInfo) -> Result<Vec<Operation>, Error> {
    let observed_patches = normalize_all(&observed.patches)?;
    let mut ops = Vec::new();

    if observed.ports.is_empty() {
        if desired.resources.is_empty() {
            return Ok(ops);
        }
        ops.extend(desired.resources.iter().cloned().map(Operation::AddResource));
        ops.extend(desired.patches.iter().cloned().map(Operation::AddPatch));
        ops.push(Operation::Forward(Toggle::Start));
        return Ok(ops);
    }

    let patches_changed = !diff(&observed_patches, &desired.patches, DiffMode::Teardown)
        .is_empty()
        || !diff(&observed_patches, &desired.patches, DiffMode::Buildup).is_empty();

    if patches_changed {
        ops.push(Operation::Forward(Toggle::Stop));
        if !observed_patches.is_empty() {
            ops.push(Operation::ClearPatches);
        }
    }

    ops.extend(
        diff(&observed.ports, &desired.resources, DiffMode::Teardown)
            .into_iter()
            .map(Operation::DelResource),
    );
    ops.extend(
        diff(&observed.ports, &desired.resources, DiffMode::Buildup)
            .into_iter()
            .map(Operation::AddResource),
    );

    if patches_changed {
        ops.extend(desired.patches.iter().cloned().map(Operation::AddPatch));
        ops.push(Operation::Forward(Toggle::Start));
    } else if observed.status != RUNNING && !desired.patches.is_empty() {
        ops.push(Operation::Forward(Toggle::Start));
    }

    Ok(ops)
}

/// Operations that release a worker's patches and shared resources
pub fn plan_teardown(observed: &NfvInfo) -> Vec<Operation> {
    let mut ops = vec![Operation::Forward(Toggle::Stop)];
    if !observed.patches.is_empty() {
        ops.push(Operation::ClearPatches);
    }
    ops.extend(
        observed
            .ports
            .iter()
            .filter(|port| {
                port.split_once(':')
                    .is_some_and(|(type_, _)| TEARDOWN_RESOURCE_TYPES.contains(&type_))
            })
            .cloned()
            .map(Operation::DelResource),
    );
    ops
}

/// Flatten live state for status
pub fn summarize(observed: &NfvInfo) -> ObservedSummary {
    ObservedSummary {
        client_id: Some(observed.client_id),
        status: Some(observed.status.clone()),
        ports: observed.ports.clone(),
        patches: observed
            .patches
            .iter()
            .map(|p| format!("{}->{}", p.src, p.dst))
            .collect(),
        ..Default::default()
    }
}

/// Converge one running spp_nfv to its spec
pub async fn converge(
    endpoint: &dyn ControlEndpoint,
    spec: &NfvSpec,
) -> Result<ConvergenceReport, Error> {
    let desired = NfvDesired::from_spec(spec)?;
    let sec_id = spec.name.sec_id;

    let Some(observed) = endpoint.observe_nfv(sec_id).await else {
        return Ok(ConvergenceReport::unobservable());
    };

    let ops = plan(&desired, &observed)?;
    if ops.is_empty() {
        debug!(worker = %spec.name, "nfv already converged");
        let ready = observed.status == RUNNING;
        return Ok(Executor::new(endpoint, WorkerKind::Nfv, sec_id)
            .finish(Some(summarize(&observed)), ready));
    }

    let mut executor = Executor::new(endpoint, WorkerKind::Nfv, sec_id);
    executor.apply_all(ops).await;

    let after = endpoint.observe_nfv(sec_id).await;
    let ready = after.as_ref().is_some_and(|o| o.status == RUNNING);
    Ok(executor.finish(after.as_ref().map(summarize), ready))
}

/// Release a stale spp_nfv's patches and shared resources
///
/// Best effort: an unobservable worker yields an empty report and the
/// caller proceeds with removing the pod.
pub async fn teardown(endpoint: &dyn ControlEndpoint, sec_id: u32) -> ConvergenceReport {
    let Some(observed) = endpoint.observe_nfv(sec_id).await else {
        return ConvergenceReport::unobservable();
    };
    let mut executor = Executor::new(endpoint, WorkerKind::Nfv, sec_id);
    executor.apply_all(plan_teardown(&observed)).await;
    executor.finish(Some(summarize(&observed)), false)
}
