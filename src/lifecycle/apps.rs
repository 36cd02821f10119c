//! Application pods
//!
//! Applications attach to rings and vhost ports the workers create, so none
//! is started until every nfv, vf and mirror worker in the spec is `Ready`.
//! Each started app is polled until its pod runs or the poll budget runs out.

use tracing::{debug, info, warn};

use super::Scope;
use crate::crd::{PodRef, SppSpec, SppStatus, WorkerId, WorkerKind, WorkerPhase};
use crate::diff::{diff, DiffMode};
use crate::retry::{poll_until, RetryConfig};
use crate::workload::{self, app_pod};
use crate::Error;

/// Kinds an application can depend on
const BARRIER_KINDS: [WorkerKind; 3] = [WorkerKind::Nfv, WorkerKind::Vf, WorkerKind::Mirror];

/// Result of one pass over the applications
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppsOutcome {
    /// Whether a pod was removed or changed phase
    pub changed: bool,
    /// Waiting for workers to become ready
    pub blocked: bool,
    /// Number of desired apps
    pub desired: usize,
    /// Number of desired apps whose pod runs
    pub running: usize,
}

impl AppsOutcome {
    /// Nothing moved and every desired app runs
    pub fn is_settled(&self) -> bool {
        !self.changed && !self.blocked && self.running == self.desired
    }
}

/// Whether every worker an app may attach to is ready
pub fn workers_ready(spec: &SppSpec, status: &SppStatus) -> bool {
    BARRIER_KINDS.iter().all(|kind| {
        let recorded = status.kind(*kind);
        spec.worker_ids(*kind).iter().all(|id| {
            recorded
                .workers
                .get(id)
                .is_some_and(|w| w.phase == WorkerPhase::Ready)
        })
    })
}

async fn is_pod_running(scope: &Scope<'_>, name: &str) -> bool {
    match scope.store.find_pod(&scope.owner.namespace, name).await {
        Ok(pod) => pod.as_ref().is_some_and(workload::is_running),
        Err(e) => {
            debug!(pod = %name, error = %e, "app pod lookup failed");
            false
        }
    }
}

/// Remove stale apps, then start and poll desired ones behind the barrier
pub async fn reconcile_apps(
    scope: &Scope<'_>,
    spec: &SppSpec,
    status: &mut SppStatus,
) -> Result<AppsOutcome, Error> {
    let desired_ids: Vec<WorkerId> = spec.apps.iter().map(|a| a.name.clone()).collect();
    let recorded: Vec<WorkerId> = status.apps.pods.keys().cloned().collect();
    let mut outcome = AppsOutcome {
        desired: desired_ids.len(),
        ..Default::default()
    };

    for id in diff(&recorded, &desired_ids, DiffMode::Teardown) {
        info!(app = %id, "removing app no longer in spec");
        scope
            .store
            .delete_pod(&scope.owner.namespace, &scope.owner.app_name(&id))
            .await?;
        status.apps.pods.remove(&id);
        status.push_event(format!("App {id} is deleted"));
        outcome.changed = true;
    }

    if !spec.apps.is_empty() && !workers_ready(spec, status) {
        debug!("workers not ready, holding apps back");
        outcome.blocked = true;
    } else {
        for app in &spec.apps {
            let name = scope.owner.app_name(&app.name);
            scope
                .store
                .ensure_pod(&app_pod(scope.owner, app, scope.node)?)
                .await?;

            let previous = status.apps.pods.get(&app.name).cloned().unwrap_or_default();
            let budget = if previous.phase == workload::POD_RUNNING {
                RetryConfig::once()
            } else {
                scope.config.app_poll()
            };
            let running = poll_until(&budget, "app_running", scope.sleeper, || {
                is_pod_running(scope, &name)
            })
            .await;
            if !running {
                warn!(app = %app.name, pod = %name, "app pod not running within poll budget");
            }

            let phase = scope
                .store
                .find_pod(&scope.owner.namespace, &name)
                .await?
                .as_ref()
                .map(workload::pod_phase)
                .unwrap_or_default();
            if phase != previous.phase {
                status.push_event(format!("App {} is {}", app.name, phase_label(&phase)));
                outcome.changed = true;
            }
            if phase == workload::POD_RUNNING {
                outcome.running += 1;
            }
            status
                .apps
                .pods
                .insert(app.name.clone(), PodRef { name, phase });
        }
    }

    if outcome.blocked {
        outcome.running = status
            .apps
            .pods
            .values()
            .filter(|p| p.phase == workload::POD_RUNNING)
            .count();
    }
    status.apps.status = format!("{}/{}", outcome.running, outcome.desired);
    Ok(outcome)
}

fn phase_label(phase: &str) -> &str {
    if phase.is_empty() {
        "Unknown"
    } else {
        phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use crate::controller::MockClusterStore;
    use crate::crd::{AppAttachment, AppSpec, EalSpec, WorkerStatus};
    use crate::retry::MockSleeper;
    use crate::testing::sample_spec;
    use crate::workload::Owner;
    use k8s_openapi::api::core::v1::{Pod, PodStatus};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

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

    fn spec_with_app() -> SppSpec {
        let mut spec = sample_spec();
        spec.apps.push(AppSpec {
            name: WorkerId::new("testpmd", 1),
            image: "dpdk:latest".to_string(),
            eal: EalSpec {
                lcores: "4".to_string(),
                ..Default::default()
            },
            command: vec!["testpmd".to_string()],
            args: vec!["-i".to_string()],
            type_: AppAttachment::Pipe,
        });
        spec
    }

    async fn run(
        store: &MockClusterStore,
        sleeper: &MockSleeper,
        spec: &SppSpec,
        status: &mut SppStatus,
    ) -> AppsOutcome {
        let config = OperatorConfig::default();
        let owner = owner();
        let scope = Scope {
            store,
            sleeper,
            config: &config,
            owner: &owner,
            node: "worker-0",
        };
        reconcile_apps(&scope, spec, status).await.unwrap()
    }

    /// Story: apps wait until every worker they may attach to is ready
    #[tokio::test]
    async fn story_apps_blocked_until_workers_ready() {
        let mut store = MockClusterStore::new();
        store.expect_ensure_pod().never();
        let sleeper = MockSleeper::new();
        let mut spec = spec_with_app();
        spec.nfvs.push(crate::crd::NfvSpec {
            name: WorkerId::new("nfv", 1),
            image: "spp:latest".to_string(),
            eal: EalSpec::default(),
            vhost: None,
            resources: vec![],
            patches: vec![],
        });
        let mut status = SppStatus::default();
        status.nfvs.workers.insert(
            WorkerId::new("nfv", 1),
            WorkerStatus {
                phase: WorkerPhase::Degraded,
                ..Default::default()
            },
        );

        let outcome = run(&store, &sleeper, &spec, &mut status).await;

        assert!(outcome.blocked);
        assert!(!outcome.is_settled());
        assert_eq!(status.apps.status, "0/1");
    }

    /// Story: an app is polled until its pod runs
    #[tokio::test]
    async fn story_app_polled_until_running() {
        let lookups = Arc::new(AtomicU32::new(0));
        let counter = lookups.clone();
        let mut store = MockClusterStore::new();
        store
            .expect_ensure_pod()
            .withf(|p| p.metadata.name.as_deref() == Some("spp-a-app-testpmd-1"))
            .times(1)
            .returning(|_| Ok(()));
        store.expect_find_pod().returning(move |_, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(pod(if n < 2 { "Pending" } else { "Running" })))
        });
        let mut sleeper = MockSleeper::new();
        sleeper.expect_sleep().times(2).returning(|_| ());
        let spec = spec_with_app();
        let mut status = SppStatus::default();

        let outcome = run(&store, &sleeper, &spec, &mut status).await;

        assert_eq!((outcome.running, outcome.desired), (1, 1));
        assert_eq!(status.apps.status, "1/1");
        assert_eq!(
            status.apps.pods[&WorkerId::new("testpmd", 1)].phase,
            "Running"
        );
        assert_eq!(status.events, vec!["App testpmd:1 is Running".to_string()]);
    }

    /// Story: an app removed from the spec has its pod deleted
    #[tokio::test]
    async fn story_stale_app_is_deleted() {
        let mut store = MockClusterStore::new();
        store
            .expect_delete_pod()
            .withf(|_, name| name == "spp-a-app-l2fwd-2")
            .times(1)
            .returning(|_, _| Ok(()));
        let sleeper = MockSleeper::new();
        let spec = sample_spec();
        let mut status = SppStatus::default();
        status.apps.pods.insert(
            WorkerId::new("l2fwd", 2),
            PodRef {
                name: "spp-a-app-l2fwd-2".to_string(),
                phase: "Running".to_string(),
            },
        );

        let outcome = run(&store, &sleeper, &spec, &mut status).await;

        assert!(outcome.changed);
        assert!(status.apps.pods.is_empty());
        assert_eq!(status.apps.status, "0/0");
        assert_eq!(status.events, vec!["App l2fwd:2 is deleted".to_string()]);
    }
}
