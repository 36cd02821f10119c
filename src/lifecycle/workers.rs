//! Per-kind coordination of secondary workers
//!
//! One pass over one kind removes workers recorded in status but no longer
//! desired, ensures a pod for every desired worker and converges the ones
//! whose pod runs. Only the kind's own status subtree is touched.

use tracing::{debug, info, warn};

use super::Scope;
use crate::crd::{PodRef, SppSpec, SppStatus, WorkerId, WorkerKind, WorkerPhase, WorkerStatus};
use crate::diff::{diff, DiffMode};
use crate::endpoint::ControlEndpoint;
use crate::planner::component::{self, ComponentState};
use crate::planner::{nfv, pcap, ConvergenceReport};
use crate::workload::{self, worker_pod, WorkerSpec};
use crate::Error;

/// Result of one pass over one worker kind
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KindOutcome {
    /// Whether anything was created, removed, mutated or changed phase
    pub changed: bool,
    /// Number of desired workers
    pub desired: usize,
    /// Number of desired workers that are `Ready`
    pub ready: usize,
}

impl KindOutcome {
    /// Nothing moved and every desired worker is ready
    pub fn is_settled(&self) -> bool {
        !self.changed && self.ready == self.desired
    }
}

fn desired_workers(spec: &SppSpec, kind: WorkerKind) -> Vec<WorkerSpec<'_>> {
    match kind {
        WorkerKind::Nfv => spec.nfvs.iter().map(WorkerSpec::Nfv).collect(),
        WorkerKind::Vf => spec.vfs.iter().map(WorkerSpec::Vf).collect(),
        WorkerKind::Mirror => spec.mirrors.iter().map(WorkerSpec::Mirror).collect(),
        WorkerKind::Pcap => spec.pcaps.iter().map(WorkerSpec::Pcap).collect(),
    }
}

async fn converge_worker(
    endpoint: &dyn ControlEndpoint,
    worker: WorkerSpec<'_>,
) -> Result<ConvergenceReport, Error> {
    match worker {
        WorkerSpec::Nfv(spec) => nfv::converge(endpoint, spec).await,
        WorkerSpec::Vf(spec) => {
            let desired = ComponentState::from_vf(spec)?;
            component::converge(endpoint, WorkerKind::Vf, spec.name.sec_id, &desired).await
        }
        WorkerSpec::Mirror(spec) => {
            let desired = ComponentState::from_mirror(spec)?;
            component::converge(endpoint, WorkerKind::Mirror, spec.name.sec_id, &desired).await
        }
        WorkerSpec::Pcap(spec) => pcap::converge(endpoint, spec).await,
    }
}

async fn remove_stale(
    scope: &Scope<'_>,
    kind: WorkerKind,
    id: &WorkerId,
    endpoint: &dyn ControlEndpoint,
    status: &mut SppStatus,
) -> Result<(), Error> {
    info!(%kind, worker = %id, "removing worker no longer in spec");
    if let Some(recorded) = status.kind_mut(kind).workers.get_mut(id) {
        recorded.phase = WorkerPhase::Removed;
    }

    if kind == WorkerKind::Nfv {
        let report = nfv::teardown(endpoint, id.sec_id).await;
        if !report.failed.is_empty() {
            warn!(worker = %id, failed = report.failed.len(), "nfv teardown incomplete");
        }
    } else if !endpoint.announce_removal(kind, id.sec_id).await {
        debug!(%kind, worker = %id, "spp-ctl did not acknowledge removal");
    }

    scope
        .store
        .delete_pod(&scope.owner.namespace, &scope.owner.worker_name(kind, id))
        .await?;

    status.kind_mut(kind).workers.remove(id);
    status.push_event(format!("{kind} {id} is deleted"));
    Ok(())
}

/// Drive every worker of `kind` one step toward the spec
pub async fn reconcile_kind(
    scope: &Scope<'_>,
    kind: WorkerKind,
    spec: &SppSpec,
    vip: &str,
    endpoint: &dyn ControlEndpoint,
    status: &mut SppStatus,
) -> Result<KindOutcome, Error> {
    let ports = scope.config.ports();
    let desired_ids = spec.worker_ids(kind);
    let recorded: Vec<WorkerId> = status.kind(kind).workers.keys().cloned().collect();

    let mut outcome = KindOutcome {
        desired: desired_ids.len(),
        ..Default::default()
    };

    for id in diff(&recorded, &desired_ids, DiffMode::Teardown) {
        remove_stale(scope, kind, &id, endpoint, status).await?;
        outcome.changed = true;
    }

    for worker in desired_workers(spec, kind) {
        let id = worker.id().clone();
        let pod_name = scope.owner.worker_name(kind, &id);

        scope
            .store
            .ensure_pod(&worker_pod(scope.owner, worker, scope.node, vip, ports))
            .await?;
        let Some(pod) = scope.store.find_pod(&scope.owner.namespace, &pod_name).await? else {
            warn!(%kind, worker = %id, pod = %pod_name, "pod missing after create, retrying next pass");
            continue;
        };

        let previous = status.kind(kind).workers.get(&id).cloned().unwrap_or_default();
        let mut next = WorkerStatus {
            pod: PodRef {
                name: pod_name,
                phase: workload::pod_phase(&pod),
            },
            phase: WorkerPhase::Created,
            observed: previous.observed.clone(),
            message: None,
        };

        if workload::is_running(&pod) {
            next.phase = WorkerPhase::Running;
            status.kind_mut(kind).workers.insert(id.clone(), next.clone());
            let report = converge_worker(endpoint, worker).await?;
            outcome.changed |= !report.applied.is_empty() || !report.failed.is_empty();
            next.phase = if report.is_converged() {
                WorkerPhase::Ready
            } else {
                WorkerPhase::Degraded
            };
            next.message = report.degraded_reason();
            if report.is_observed() {
                next.observed = report.observed;
            }
        }

        if next.phase != previous.phase {
            info!(%kind, worker = %id, from = %previous.phase, to = %next.phase, "worker phase changed");
            status.push_event(format!("{kind} {id} is {}", next.phase));
            outcome.changed = true;
        }
        if next.phase == WorkerPhase::Ready {
            outcome.ready += 1;
        }
        status.kind_mut(kind).workers.insert(id, next);
    }

    status.kind_mut(kind).status = format!("{}/{}", outcome.ready, outcome.desired);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use crate::controller::MockClusterStore;
    use crate::crd::{EalSpec, NfvSpec, PatchSpec, VfSpec};
    use crate::planner::{Operation, Toggle};
    use crate::retry::MockSleeper;
    use crate::testing::{sample_spec, FakeSppCtl};
    use crate::workload::Owner;
    use k8s_openapi::api::core::v1::{Pod, PodStatus};

    const VIP: &str = "10.96.0.10";

    fn owner() -> Owner {
        Owner {
            name: "spp-a".to_string(),
            namespace: "default".to_string(),
            uid: "uid-1".to_string(),
        }
    }

    fn pod(phase: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn nfv_spec(sec_id: u32) -> NfvSpec {
        NfvSpec {
            name: WorkerId::new("nfv", sec_id),
            image: "spp:latest".to_string(),
            eal: EalSpec::default(),
            vhost: None,
            resources: vec!["ring:0".to_string(), "vhost:1".to_string()],
            patches: vec![PatchSpec {
                src: "ring:0".to_string(),
                dst: "vhost:1".to_string(),
            }],
        }
    }

    fn store_with_pods(phase: &'static str) -> MockClusterStore {
        let mut store = MockClusterStore::new();
        store.expect_ensure_pod().returning(|_| Ok(()));
        store
            .expect_find_pod()
            .returning(move |_, _| Ok(Some(pod(phase))));
        store
    }

    async fn run(
        store: &MockClusterStore,
        fake: &FakeSppCtl,
        kind: WorkerKind,
        spec: &SppSpec,
        status: &mut SppStatus,
    ) -> KindOutcome {
        try_run(store, fake, kind, spec, status).await.unwrap()
    }

    async fn try_run(
        store: &MockClusterStore,
        endpoint: &dyn ControlEndpoint,
        kind: WorkerKind,
        spec: &SppSpec,
        status: &mut SppStatus,
    ) -> Result<KindOutcome, Error> {
        let sleeper = MockSleeper::new();
        let config = OperatorConfig::default();
        let owner = owner();
        let scope = Scope {
            store,
            sleeper: &sleeper,
            config: &config,
            owner: &owner,
            node: "worker-0",
        };
        reconcile_kind(&scope, kind, spec, VIP, endpoint, status).await
    }

    // =========================================================================
    // Desired workers
    // =========================================================================

    /// Story: a running nfv is wired up and reported ready
    #[tokio::test]
    async fn story_running_nfv_is_converged_and_ready() {
        let store = store_with_pods("Running");
        let fake = FakeSppCtl::new().with_primary();
        fake.add_nfv(1);
        let mut spec = sample_spec();
        spec.nfvs.push(nfv_spec(1));
        let mut status = SppStatus::default();

        let outcome = run(&store, &fake, WorkerKind::Nfv, &spec, &mut status).await;

        assert!(outcome.changed);
        assert_eq!((outcome.ready, outcome.desired), (1, 1));
        assert_eq!(status.nfvs.status, "1/1");
        let worker = &status.nfvs.workers[&WorkerId::new("nfv", 1)];
        assert_eq!(worker.phase, WorkerPhase::Ready);
        assert_eq!(worker.pod.name, "spp-a-nfv-nfv-1");
        assert_eq!(status.events, vec!["Nfv nfv:1 is Ready".to_string()]);

        let live = fake.nfv(1).unwrap();
        assert_eq!(live.status, "running");
        assert_eq!(live.ports, vec!["ring:0".to_string(), "vhost:1".to_string()]);
    }

    /// Story: a second pass over a converged kind changes nothing
    #[tokio::test]
    async fn story_converged_kind_is_settled_on_next_pass() {
        let store = store_with_pods("Running");
        let fake = FakeSppCtl::new().with_primary();
        fake.add_nfv(1);
        let mut spec = sample_spec();
        spec.nfvs.push(nfv_spec(1));
        let mut status = SppStatus::default();

        run(&store, &fake, WorkerKind::Nfv, &spec, &mut status).await;
        let applied = fake.applied().len();
        let before = status.clone();

        let outcome = run(&store, &fake, WorkerKind::Nfv, &spec, &mut status).await;

        assert!(outcome.is_settled());
        assert_eq!(fake.applied().len(), applied);
        assert_eq!(status, before, "no redundant status change");
    }

    /// Story: a pod that is not running yet is only recorded as created
    #[tokio::test]
    async fn story_pending_pod_is_recorded_without_convergence() {
        let store = store_with_pods("Pending");
        let fake = FakeSppCtl::new();
        fake.add_nfv(1);
        let mut spec = sample_spec();
        spec.nfvs.push(nfv_spec(1));
        let mut status = SppStatus::default();

        let outcome = run(&store, &fake, WorkerKind::Nfv, &spec, &mut status).await;

        assert!(!outcome.is_settled());
        assert_eq!(status.nfvs.status, "0/1");
        assert_eq!(
            status.nfvs.workers[&WorkerId::new("nfv", 1)].phase,
            WorkerPhase::Created
        );
        assert!(fake.applied().is_empty());
    }

    /// Story: a pod that cannot be found after create is skipped, not fatal
    #[tokio::test]
    async fn story_missing_pod_is_skipped() {
        let mut store = MockClusterStore::new();
        store.expect_ensure_pod().returning(|_| Ok(()));
        store.expect_find_pod().returning(|_, _| Ok(None));
        let fake = FakeSppCtl::new();
        let mut spec = sample_spec();
        spec.nfvs.push(nfv_spec(1));
        let mut status = SppStatus::default();

        let outcome = run(&store, &fake, WorkerKind::Nfv, &spec, &mut status).await;

        assert_eq!((outcome.ready, outcome.desired), (0, 1));
        assert!(status.nfvs.workers.is_empty());
    }

    /// Story: an unobservable worker is degraded, and says why
    #[tokio::test]
    async fn story_unobservable_worker_is_degraded() {
        let store = store_with_pods("Running");
        let fake = FakeSppCtl::new();
        let mut spec = sample_spec();
        spec.nfvs.push(nfv_spec(1));
        let mut status = SppStatus::default();

        run(&store, &fake, WorkerKind::Nfv, &spec, &mut status).await;

        let worker = &status.nfvs.workers[&WorkerId::new("nfv", 1)];
        assert_eq!(worker.phase, WorkerPhase::Degraded);
        assert!(worker.message.as_deref().unwrap().contains("did not report"));
        assert_eq!(status.events, vec!["Nfv nfv:1 is Degraded".to_string()]);
    }

    // =========================================================================
    // Stale workers
    // =========================================================================

    /// Story: a stale nfv is torn down, its pod deleted and its record dropped
    ///
    /// The next pass does not try to remove it again.
    #[tokio::test]
    async fn story_stale_nfv_is_removed_once() {
        let mut store = MockClusterStore::new();
        store
            .expect_delete_pod()
            .withf(|ns, name| ns == "default" && name == "spp-a-nfv-old-3")
            .times(1)
            .returning(|_, _| Ok(()));
        let fake = FakeSppCtl::new();
        fake.add_nfv(3);
        for op in [
            Operation::AddResource("ring:0".to_string()),
            Operation::AddResource("ring:1".to_string()),
            Operation::Forward(Toggle::Start),
        ] {
            fake.apply(WorkerKind::Nfv, 3, &op).await;
        }
        let spec = sample_spec();
        let mut status = SppStatus::default();
        status
            .nfvs
            .workers
            .insert(WorkerId::new("old", 3), WorkerStatus::default());

        let outcome = run(&store, &fake, WorkerKind::Nfv, &spec, &mut status).await;

        assert!(outcome.changed);
        assert!(status.nfvs.workers.is_empty());
        assert_eq!(status.nfvs.status, "0/0");
        assert_eq!(status.events, vec!["Nfv old:3 is deleted".to_string()]);
        let live = fake.nfv(3).unwrap();
        assert_eq!(live.status, "idle");
        assert!(live.ports.is_empty());

        let outcome = run(&store, &fake, WorkerKind::Nfv, &spec, &mut status).await;
        assert!(outcome.is_settled());
    }

    /// Story: a stale vf is announced to spp-ctl before its pod goes
    #[tokio::test]
    async fn story_stale_component_worker_is_announced() {
        let mut store = MockClusterStore::new();
        store
            .expect_delete_pod()
            .withf(|_, name| name == "spp-a-vf-vf-2")
            .times(1)
            .returning(|_, _| Ok(()));
        let fake = FakeSppCtl::new();
        fake.add_vf(2, &[2, 3]);
        let spec = sample_spec();
        let mut status = SppStatus::default();
        status
            .vfs
            .workers
            .insert(WorkerId::new("vf", 2), WorkerStatus::default());

        run(&store, &fake, WorkerKind::Vf, &spec, &mut status).await;

        assert_eq!(fake.announced(), vec![(WorkerKind::Vf, 2)]);
        assert!(status.vfs.workers.is_empty());
    }

    /// Story: a vf is ready once spp-ctl reports it under its own id
    #[tokio::test]
    async fn story_vf_ready_with_components() {
        let store = store_with_pods("Running");
        let fake = FakeSppCtl::new().with_primary();
        fake.add_vf(2, &[2, 3]);
        let mut spec = sample_spec();
        spec.vfs.push(VfSpec {
            name: WorkerId::new("vf", 2),
            image: "spp:latest".to_string(),
            eal: EalSpec::default(),
            components: vec![],
            classifier_table: vec![],
        });
        let mut status = SppStatus::default();

        let outcome = run(&store, &fake, WorkerKind::Vf, &spec, &mut status).await;

        assert_eq!((outcome.ready, outcome.desired), (1, 1));
        assert_eq!(
            status.vfs.workers[&WorkerId::new("vf", 2)].observed.as_ref().and_then(|o| o.client_id),
            Some(2)
        );
    }

    /// Story: a pcap asked to capture is started and reports running
    #[tokio::test]
    async fn story_pcap_capture_is_started() {
        let store = store_with_pods("Running");
        let fake = FakeSppCtl::new().with_primary();
        fake.add_pcap(4);
        let mut spec = sample_spec();
        spec.pcaps.push(crate::crd::PcapSpec {
            name: WorkerId::new("pcap", 4),
            image: "spp:latest".to_string(),
            eal: EalSpec::default(),
            port: "phy:0".to_string(),
            out_dir: None,
            fsize: None,
            status: crate::crd::CaptureState::Running,
        });
        let mut status = SppStatus::default();

        let outcome = run(&store, &fake, WorkerKind::Pcap, &spec, &mut status).await;

        assert_eq!(fake.applied(), vec![Operation::Capture(Toggle::Start)]);
        assert_eq!(status.pcaps.status, "1/1");
        assert_eq!(
            status.pcaps.workers[&WorkerId::new("pcap", 4)]
                .observed
                .as_ref()
                .and_then(|o| o.status.as_deref()),
            Some("running")
        );
        assert!(outcome.changed);
    }

    // =========================================================================
    // Phase sequence
    // =========================================================================

    /// Story: a vf walks Created, Running, Ready and Removed across passes
    ///
    /// Running is what status shows when convergence fails part way, and
    /// Removed is what it shows while the pod delete has not gone through.
    #[tokio::test]
    async fn story_worker_walks_the_phase_sequence() {
        let id = WorkerId::new("vf", 2);
        let mut spec = sample_spec();
        spec.vfs.push(VfSpec {
            name: id.clone(),
            image: "spp:latest".to_string(),
            eal: EalSpec::default(),
            components: vec![],
            classifier_table: vec![],
        });
        let mut status = SppStatus::default();
        let fake = FakeSppCtl::new().with_primary();

        run(&store_with_pods("Pending"), &fake, WorkerKind::Vf, &spec, &mut status).await;
        assert_eq!(status.vfs.workers[&id].phase, WorkerPhase::Created);

        let mut garbled = crate::endpoint::MockControlEndpoint::new();
        garbled.expect_observe_components().returning(|_, _| {
            Some(crate::endpoint::ComponentWorkerInfo {
                client_id: 2,
                components: vec![crate::endpoint::ComponentInfo {
                    core: 2,
                    name: "fwd".to_string(),
                    type_: "forward".to_string(),
                    rx_port: vec![crate::endpoint::PortInfo {
                        port: "ring:0".to_string(),
                        vlan: Some(crate::endpoint::VlanInfo {
                            operation: "strip".to_string(),
                            id: 0,
                            pcp: 0,
                        }),
                    }],
                    tx_port: vec![],
                }],
                ..Default::default()
            })
        });
        let result = try_run(
            &store_with_pods("Running"),
            &garbled,
            WorkerKind::Vf,
            &spec,
            &mut status,
        )
        .await;
        assert!(matches!(result, Err(Error::MalformedConfig(_))));
        assert_eq!(status.vfs.workers[&id].phase, WorkerPhase::Running);

        fake.add_vf(2, &[2]);
        run(&store_with_pods("Running"), &fake, WorkerKind::Vf, &spec, &mut status).await;
        assert_eq!(status.vfs.workers[&id].phase, WorkerPhase::Ready);

        spec.vfs.clear();
        let mut failing = MockClusterStore::new();
        failing
            .expect_delete_pod()
            .returning(|_, _| Err(Error::endpoint("apiserver unavailable")));
        let result = try_run(&failing, &fake, WorkerKind::Vf, &spec, &mut status).await;
        assert!(result.is_err());
        assert_eq!(status.vfs.workers[&id].phase, WorkerPhase::Removed);

        let mut store = MockClusterStore::new();
        store.expect_delete_pod().times(1).returning(|_, _| Ok(()));
        run(&store, &fake, WorkerKind::Vf, &spec, &mut status).await;
        assert!(status.vfs.workers.is_empty());
        assert_eq!(
            status.events,
            vec![
                "Vf vf:2 is Created".to_string(),
                "Vf vf:2 is Ready".to_string(),
                "Vf vf:2 is deleted".to_string(),
            ]
        );
    }
}
