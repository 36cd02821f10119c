//! Gate and primary switch
//!
//! Both roles have a two-state lifecycle: ensure the pod (and for the gate,
//! its service) exists, then poll spp-ctl until the role answers. Secondary
//! workers are only visited once both are ready.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::Scope;
use crate::crd::{CtlSpec, PodRef, PrimarySpec, RoleStatus, SppStatus};
use crate::endpoint::{ControlEndpoint, EndpointProvider};
use crate::retry::{poll_until, RetryConfig};
use crate::workload::{self, ctl_pod, ctl_service, primary_pod};
use crate::Error;

const READY: &str = "1/1";
const NOT_READY: &str = "0/1";

/// Record the pod's phase in `role`; returns whether it runs
async fn observe_role_pod(
    scope: &Scope<'_>,
    name: &str,
    role: &mut RoleStatus,
) -> Result<bool, Error> {
    let pod = scope.store.find_pod(&scope.owner.namespace, name).await?;
    role.pod = PodRef {
        name: name.to_string(),
        phase: pod.as_ref().map(workload::pod_phase).unwrap_or_default(),
    };
    Ok(pod.as_ref().is_some_and(workload::is_running))
}

/// Polling budget for a role: the full budget until it first answers, a
/// single probe afterwards
fn probe_budget(scope: &Scope<'_>, role: &RoleStatus) -> RetryConfig {
    if role.is_ready() {
        RetryConfig::once()
    } else {
        scope.config.role_poll()
    }
}

#[derive(Clone, Copy)]
enum Role {
    Ctl,
    Primary,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Self::Ctl => "ctl",
            Self::Primary => "primary",
        }
    }
}

/// Record readiness, with an event on every transition
fn mark(status: &mut SppStatus, role: Role, ready: bool) {
    let role_status = match role {
        Role::Ctl => &mut status.ctl,
        Role::Primary => &mut status.primary,
    };
    let was_ready = role_status.is_ready();
    role_status.status = if ready { READY } else { NOT_READY }.to_string();
    if ready && !was_ready {
        info!(role = role.label(), "role is ready");
        status.push_event(format!("{} is ready", role.label()));
    } else if !ready && was_ready {
        warn!(role = role.label(), "role stopped answering");
        status.push_event(format!("{} stopped answering", role.label()));
    }
}

/// A gate that answers
pub struct Gate {
    /// Cluster IP of the gate service
    pub vip: String,
    /// Client for spp-ctl behind `vip`
    pub endpoint: Arc<dyn ControlEndpoint>,
}

/// Ensure spp-ctl and its service, then wait for it to answer
///
/// The service cluster IP is recorded as `serviceVip` as soon as it is
/// assigned.
pub async fn ensure_ctl(
    scope: &Scope<'_>,
    spec: &CtlSpec,
    endpoints: &dyn EndpointProvider,
    status: &mut SppStatus,
) -> Result<Option<Gate>, Error> {
    let ports = scope.config.ports();
    let owner = scope.owner;

    scope.store.ensure_service(&ctl_service(owner, ports)).await?;
    scope
        .store
        .ensure_pod(&ctl_pod(owner, spec, scope.node, ports))
        .await?;

    let running = observe_role_pod(scope, &owner.ctl_name(), &mut status.ctl).await?;
    if !running {
        debug!(pod = %owner.ctl_name(), "gate pod not running yet");
        mark(status, Role::Ctl, false);
        return Ok(None);
    }

    let vip = scope
        .store
        .find_service(&owner.namespace, &owner.ctl_name())
        .await?
        .and_then(|svc| svc.spec?.cluster_ip)
        .filter(|ip| !ip.is_empty() && ip != "None");
    let Some(vip) = vip else {
        debug!(service = %owner.ctl_name(), "gate service has no cluster IP yet");
        mark(status, Role::Ctl, false);
        return Ok(None);
    };
    status.service_vip = Some(vip.clone());

    let endpoint = endpoints.connect(&vip);
    let budget = probe_budget(scope, &status.ctl);
    let answered = poll_until(&budget, "ctl_ready", scope.sleeper, || {
        let endpoint = endpoint.clone();
        async move { endpoint.processes().await.is_some() }
    })
    .await;

    mark(status, Role::Ctl, answered);
    Ok(answered.then_some(Gate { vip, endpoint }))
}

/// Ensure spp_primary, then wait until spp-ctl lists it first as `primary`
pub async fn ensure_primary(
    scope: &Scope<'_>,
    spec: &PrimarySpec,
    vip: &str,
    endpoint: &dyn ControlEndpoint,
    status: &mut SppStatus,
) -> Result<bool, Error> {
    let ports = scope.config.ports();
    let owner = scope.owner;

    scope
        .store
        .ensure_pod(&primary_pod(owner, spec, scope.node, vip, ports))
        .await?;

    let running = observe_role_pod(scope, &owner.primary_name(), &mut status.primary).await?;
    if !running {
        debug!(pod = %owner.primary_name(), "primary pod not running yet");
        mark(status, Role::Primary, false);
        return Ok(false);
    }

    let budget = probe_budget(scope, &status.primary);
    let answered = poll_until(&budget, "primary_ready", scope.sleeper, || async move {
        endpoint
            .processes()
            .await
            .and_then(|procs| procs.into_iter().next())
            .is_some_and(|first| first.type_ == "primary")
    })
    .await;

    mark(status, Role::Primary, answered);
    Ok(answered)
}
