//! Spp controller implementation
//!
//! One reconcile pass walks the Spp through its phases:
//!
//! 1. pick a worker node (once, cached in status)
//! 2. bring up the gate and wait for spp-ctl to answer (`Pending` until then)
//! 3. bring up the primary switch (`GateReady` until it answers, then one
//!    pass ends at `SwitchReady`)
//! 4. coordinate nfv, vf, mirror and pcap workers, then apps
//!    (`Converging` while anything moved, `Ready` once a pass changes nothing)
//!
//! The loop is level-triggered. Every pass starts from the stored status,
//! and status is written back only when the pass changed it.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::store::{ClusterStore, KubeClusterStore};
use crate::config::OperatorConfig;
use crate::crd::{Condition, ConditionStatus, Spp, SppPhase, SppStatus, WorkerKind};
use crate::endpoint::{EndpointProvider, HttpEndpointProvider};
use crate::lifecycle::{
    ensure_ctl, ensure_primary, reconcile_apps, reconcile_kind, select_worker_node, Scope,
};
use crate::retry::{Sleeper, TokioSleeper};
use crate::workload::Owner;
use crate::Error;

/// Controller context containing shared state and clients
///
/// Collaborators are held as trait objects so tests can substitute mocks.
pub struct Context {
    /// Cluster object store (trait object for testability)
    pub store: Arc<dyn ClusterStore>,
    /// spp-ctl client factory
    pub endpoints: Arc<dyn EndpointProvider>,
    /// Delay source for readiness polling
    pub sleeper: Arc<dyn Sleeper>,
    /// Operator tunables
    pub config: OperatorConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom collaborators
    ///
    /// This method is primarily for unit tests where a real Kubernetes
    /// client is not available. For production code, use [`Context::builder`].
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn ClusterStore>,
        endpoints: Arc<dyn EndpointProvider>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            store,
            endpoints,
            sleeper,
            config: OperatorConfig::default(),
        }
    }
}

/// Builder for constructing [`Context`] instances
///
/// ```ignore
/// let ctx = Context::builder(client).config(config).build()?;
/// ```
pub struct ContextBuilder {
    client: Client,
    store: Option<Arc<dyn ClusterStore>>,
    endpoints: Option<Arc<dyn EndpointProvider>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    config: OperatorConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            store: None,
            endpoints: None,
            sleeper: None,
            config: OperatorConfig::default(),
        }
    }

    /// Set the operator tunables
    pub fn config(mut self, config: OperatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the cluster store (primarily for testing)
    pub fn store(mut self, store: Arc<dyn ClusterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the spp-ctl client factory (primarily for testing)
    pub fn endpoints(mut self, endpoints: Arc<dyn EndpointProvider>) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Override the sleeper (primarily for testing)
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Build the Context, falling back to real implementations
    pub fn build(self) -> Result<Context, Error> {
        let sleeper = self
            .sleeper
            .unwrap_or_else(|| Arc::new(TokioSleeper) as Arc<dyn Sleeper>);
        let endpoints = match self.endpoints {
            Some(endpoints) => endpoints,
            None => Arc::new(HttpEndpointProvider::new(
                self.config.rest_port,
                self.config.request_timeout(),
                self.config.mutation_retry(),
                sleeper.clone(),
            )?),
        };
        Ok(Context {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(KubeClusterStore::new(self.client))),
            endpoints,
            sleeper,
            config: self.config,
        })
    }
}

fn condition(type_: &str, ok: bool, reason: &str, message: impl Into<String>) -> Condition {
    let status = if ok {
        ConditionStatus::True
    } else {
        ConditionStatus::False
    };
    Condition::new(type_, status, reason, message)
}

fn set_phase(status: &mut SppStatus, phase: SppPhase, message: impl Into<String>) {
    if status.phase != phase {
        info!(from = %status.phase, to = %phase, "phase changed");
        status.push_event(format!("Spp is {phase}"));
    }
    status.phase = phase;
    status.status = Some(message.into());
}

fn counts(status: &SppStatus) -> String {
    format!(
        "nfvs {}, vfs {}, mirrors {}, pcaps {}, apps {}",
        status.nfvs.status,
        status.vfs.status,
        status.mirrors.status,
        status.pcaps.status,
        status.apps.status
    )
}

/// One pass of the phase machine; returns the phase reached
async fn drive(
    spp: &Spp,
    ctx: &Context,
    owner: &Owner,
    status: &mut SppStatus,
) -> Result<SppPhase, Error> {
    let node = match status.node.clone() {
        Some(node) => node,
        None => {
            let nodes = ctx.store.list_nodes().await?;
            let spps = ctx.store.list_spps().await?;
            let Some(node) = select_worker_node(&nodes, &spps, &owner.namespace, &owner.name)
            else {
                warn!("no free worker node");
                set_phase(status, SppPhase::Pending, "no free worker node");
                return Ok(SppPhase::Pending);
            };
            info!(%node, "selected worker node");
            status.push_event(format!("node {node} is selected"));
            status.node = Some(node.clone());
            node
        }
    };

    let scope = Scope {
        store: ctx.store.as_ref(),
        sleeper: ctx.sleeper.as_ref(),
        config: &ctx.config,
        owner,
        node: &node,
    };

    let gate = ensure_ctl(&scope, &spp.spec.ctl, ctx.endpoints.as_ref(), status).await?;
    status.set_condition(condition(
        "GateReady",
        gate.is_some(),
        if gate.is_some() { "Answering" } else { "NotAnswering" },
        "spp-ctl answers on the service VIP",
    ));
    let Some(gate) = gate else {
        set_phase(status, SppPhase::Pending, "waiting for spp-ctl");
        return Ok(SppPhase::Pending);
    };

    let switch_ready =
        ensure_primary(&scope, &spp.spec.primary, &gate.vip, gate.endpoint.as_ref(), status)
            .await?;
    status.set_condition(condition(
        "SwitchReady",
        switch_ready,
        if switch_ready { "Answering" } else { "NotAnswering" },
        "spp-ctl lists the primary switch",
    ));
    if !switch_ready {
        set_phase(status, SppPhase::GateReady, "waiting for the primary switch");
        return Ok(SppPhase::GateReady);
    }
    if matches!(status.phase, SppPhase::Pending | SppPhase::GateReady) {
        set_phase(status, SppPhase::SwitchReady, "primary switch is ready");
        return Ok(SppPhase::SwitchReady);
    }

    let mut settled = true;
    for kind in WorkerKind::ALL {
        let outcome = reconcile_kind(
            &scope,
            kind,
            &spp.spec,
            &gate.vip,
            gate.endpoint.as_ref(),
            status,
        )
        .await?;
        debug!(
            %kind,
            ready = outcome.ready,
            desired = outcome.desired,
            changed = outcome.changed,
            "kind reconciled"
        );
        settled &= outcome.is_settled();
    }
    let apps = reconcile_apps(&scope, &spp.spec, status).await?;
    settled &= apps.is_settled();

    let phase = if settled {
        SppPhase::Ready
    } else {
        SppPhase::Converging
    };
    let summary = counts(status);
    set_phase(status, phase, summary.clone());
    status.set_condition(condition(
        "Ready",
        settled,
        if settled { "Converged" } else { "Converging" },
        summary,
    ));
    Ok(phase)
}

/// Write status back when the pass changed it
async fn flush(
    ctx: &Context,
    owner: &Owner,
    original: &SppStatus,
    status: &SppStatus,
) -> Result<(), Error> {
    if status == original {
        debug!("status unchanged, skipping update");
        return Ok(());
    }
    ctx.store
        .patch_status(&owner.namespace, &owner.name, status)
        .await
}

/// Reconcile an Spp resource
///
/// # Returns
///
/// Returns an `Action` indicating when to requeue the resource, or an error
/// if a cluster or endpoint call failed. Status gathered before the failure
/// is still written.
#[instrument(skip(spp, ctx), fields(spp = %spp.name_any()))]
pub async fn reconcile(spp: Arc<Spp>, ctx: Arc<Context>) -> Result<Action, Error> {
    info!("reconciling spp");
    let owner = Owner::from_spp(&spp)?;
    let original = spp.status.clone().unwrap_or_default();

    if let Err(e) = spp.spec.validate() {
        warn!(error = %e, "spp validation failed");
        let status = original
            .clone()
            .message(e.to_string())
            .condition(condition("Ready", false, "InvalidSpec", e.to_string()));
        flush(&ctx, &owner, &original, &status).await?;
        // Only a spec change can fix this
        return Ok(Action::await_change());
    }

    let mut status = original.clone();
    let result = drive(&spp, &ctx, &owner, &mut status).await;
    let flushed = flush(&ctx, &owner, &original, &status).await;
    let phase = result?;
    flushed?;

    let requeue = match phase {
        SppPhase::Ready => ctx.config.requeue_ready(),
        SppPhase::Converging => ctx.config.requeue_converging(),
        _ => ctx.config.requeue_pending(),
    };
    Ok(Action::requeue(requeue))
}

/// Error policy for the controller
///
/// Infrastructure errors requeue quickly; configuration errors wait longer
/// since they only clear when the Spp is edited.
pub fn error_policy(spp: Arc<Spp>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        spp = %spp.name_any(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.config.requeue_error())
    } else {
        Action::requeue(ctx.config.requeue_invalid())
    }
}
