//! In-memory spp-ctl used by unit tests
//!
//! Keeps per-worker state and enforces the ordering rules the real
//! endpoint enforces: a port in use by a classifier entry cannot be
//! detached, a component with ports cannot be deleted, patches can only
//! change while forwarding is stopped. Rejected operations are recorded so
//! tests can assert that a plan never tripped one of these rules.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::crd::{CtlSpec, EalSpec, PrimarySpec, Spp, SppSpec, WorkerKind};
use crate::endpoint::{
    ClassifierInfo, ComponentInfo, ComponentWorkerInfo, ControlEndpoint, EndpointProvider,
    NfvInfo, PatchInfo, PcapInfo, PortInfo, ProcessInfo, VlanInfo, UNUSED_COMPONENT_TYPE,
};
use crate::normalize::{CanonicalClassifier, CanonicalPort, Normalize};
use crate::planner::component::ComponentState;
use crate::planner::{Operation, PortDirection, Toggle};

#[derive(Default)]
struct State {
    reachable: bool,
    primary: bool,
    nfvs: HashMap<u32, NfvInfo>,
    component_workers: HashMap<(WorkerKind, u32), ComponentWorkerInfo>,
    pcaps: HashMap<u32, PcapInfo>,
    applied: Vec<Operation>,
    rejected: Vec<Operation>,
    announced: Vec<(WorkerKind, u32)>,
}

/// Stateful fake of the spp-ctl REST API
#[derive(Clone)]
pub(crate) struct FakeSppCtl {
    state: Arc<Mutex<State>>,
}

impl FakeSppCtl {
    /// A reachable spp-ctl with no primary and no workers
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                reachable: true,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    pub(crate) fn with_primary(self) -> Self {
        self.lock().primary = true;
        self
    }

    pub(crate) fn add_nfv(&self, sec_id: u32) {
        self.lock().nfvs.insert(
            sec_id,
            NfvInfo {
                client_id: i64::from(sec_id),
                status: "idle".to_string(),
                ..Default::default()
            },
        );
    }

    /// Register a component worker owning `cores`, all unused
    pub(crate) fn add_component_worker(&self, kind: WorkerKind, sec_id: u32, cores: &[u32]) {
        let components = cores
            .iter()
            .map(|core| ComponentInfo {
                core: *core,
                type_: UNUSED_COMPONENT_TYPE.to_string(),
                ..Default::default()
            })
            .collect();
        self.lock().component_workers.insert(
            (kind, sec_id),
            ComponentWorkerInfo {
                client_id: i64::from(sec_id),
                components,
                ..Default::default()
            },
        );
    }

    pub(crate) fn add_vf(&self, sec_id: u32, cores: &[u32]) {
        self.add_component_worker(WorkerKind::Vf, sec_id, cores);
    }

    pub(crate) fn add_pcap(&self, sec_id: u32) {
        self.lock().pcaps.insert(
            sec_id,
            PcapInfo {
                client_id: i64::from(sec_id),
                status: "idle".to_string(),
            },
        );
    }

    pub(crate) fn nfv(&self, sec_id: u32) -> Option<NfvInfo> {
        self.lock().nfvs.get(&sec_id).cloned()
    }

    pub(crate) fn applied(&self) -> Vec<Operation> {
        self.lock().applied.clone()
    }

    pub(crate) fn rejected(&self) -> Vec<Operation> {
        self.lock().rejected.clone()
    }

    pub(crate) fn announced(&self) -> Vec<(WorkerKind, u32)> {
        self.lock().announced.clone()
    }
}

fn port_info(port: &CanonicalPort) -> PortInfo {
    PortInfo {
        port: port.port.clone(),
        vlan: Some(VlanInfo {
            operation: port.vlan.operation.to_string(),
            id: port.vlan.id,
            pcp: port.vlan.pcp,
        }),
    }
}

fn classifier_info(entry: &CanonicalClassifier) -> ClassifierInfo {
    let value = match entry.vlan_id {
        Some(id) => format!("{}/{}", id, entry.mac),
        None => entry.mac.clone(),
    };
    ClassifierInfo {
        type_: entry.match_type.to_string(),
        value,
        port: entry.port.clone(),
    }
}

fn apply_nfv(nfv: &mut NfvInfo, op: &Operation) -> bool {
    let forwarding = nfv.status == "running";
    match op {
        Operation::AddResource(port) => {
            if nfv.ports.contains(port) {
                return false;
            }
            nfv.ports.push(port.clone());
        }
        Operation::DelResource(port) => {
            let in_use = nfv.patches.iter().any(|p| &p.src == port || &p.dst == port);
            let Some(pos) = nfv.ports.iter().position(|p| p == port) else {
                return false;
            };
            if in_use {
                return false;
            }
            nfv.ports.remove(pos);
        }
        Operation::AddPatch(patch) => {
            if forwarding || !nfv.ports.contains(&patch.src) || !nfv.ports.contains(&patch.dst) {
                return false;
            }
            nfv.patches.push(PatchInfo {
                src: patch.src.clone(),
                dst: patch.dst.clone(),
            });
        }
        Operation::ClearPatches => {
            if forwarding {
                return false;
            }
            nfv.patches.clear();
        }
        Operation::Forward(Toggle::Start) => nfv.status = "running".to_string(),
        Operation::Forward(Toggle::Stop) => nfv.status = "idle".to_string(),
        _ => return false,
    }
    true
}

fn apply_components(worker: &mut ComponentWorkerInfo, op: &Operation) -> bool {
    let classifier_rows: Vec<CanonicalClassifier> = worker
        .classifier_table
        .iter()
        .filter_map(|row| row.normalize().ok())
        .collect();

    match op {
        Operation::AddComponent(component) => {
            if worker.usable_components().any(|c| c.name == component.name) {
                return false;
            }
            let Some(slot) = worker
                .components
                .iter_mut()
                .find(|c| c.core == component.core && !c.is_usable())
            else {
                return false;
            };
            *slot = ComponentInfo {
                core: component.core,
                name: component.name.clone(),
                type_: component.type_.clone(),
                rx_port: vec![],
                tx_port: vec![],
            };
        }
        Operation::DelComponent(name) => {
            let Some(slot) = worker
                .components
                .iter_mut()
                .find(|c| c.is_usable() && &c.name == name)
            else {
                return false;
            };
            if !slot.rx_port.is_empty() || !slot.tx_port.is_empty() {
                return false;
            }
            *slot = ComponentInfo {
                core: slot.core,
                type_: UNUSED_COMPONENT_TYPE.to_string(),
                ..Default::default()
            };
        }
        Operation::AttachPort {
            component,
            dir,
            port,
        } => {
            let Some(slot) = worker
                .components
                .iter_mut()
                .find(|c| c.is_usable() && &c.name == component)
            else {
                return false;
            };
            let ports = match dir {
                PortDirection::Rx => &mut slot.rx_port,
                PortDirection::Tx => &mut slot.tx_port,
            };
            if ports.iter().any(|p| p.port == port.port) {
                return false;
            }
            ports.push(port_info(port));
            if !worker.ports.contains(&port.port) {
                worker.ports.push(port.port.clone());
            }
        }
        Operation::DetachPort {
            component,
            dir,
            port,
        } => {
            if classifier_rows.iter().any(|e| e.port == port.port) {
                return false;
            }
            let Some(slot) = worker
                .components
                .iter_mut()
                .find(|c| c.is_usable() && &c.name == component)
            else {
                return false;
            };
            let ports = match dir {
                PortDirection::Rx => &mut slot.rx_port,
                PortDirection::Tx => &mut slot.tx_port,
            };
            let Some(pos) = ports.iter().position(|p| p.port == port.port) else {
                return false;
            };
            ports.remove(pos);
        }
        Operation::AddClassifierEntry(entry) => {
            let attached = ComponentState::from_observed(worker)
                .is_ok_and(|state| state.port_attached(&entry.port));
            if classifier_rows.contains(entry) || !attached {
                return false;
            }
            worker.classifier_table.push(classifier_info(entry));
        }
        Operation::DelClassifierEntry(entry) => {
            let Some(pos) = classifier_rows.iter().position(|e| e == entry) else {
                return false;
            };
            worker.classifier_table.remove(pos);
        }
        _ => return false,
    }
    true
}

#[async_trait]
impl ControlEndpoint for FakeSppCtl {
    async fn processes(&self) -> Option<Vec<ProcessInfo>> {
        let state = self.lock();
        if !state.reachable {
            return None;
        }
        let mut procs = Vec::new();
        if state.primary {
            procs.push(ProcessInfo {
                type_: "primary".to_string(),
                client_id: None,
            });
        }
        let mut secondaries: Vec<(String, i64)> = state
            .nfvs
            .keys()
            .map(|id| ("nfv".to_string(), i64::from(*id)))
            .chain(state.component_workers.keys().map(|(kind, id)| {
                (kind.container_name().to_string(), i64::from(*id))
            }))
            .chain(state.pcaps.keys().map(|id| ("pcap".to_string(), i64::from(*id))))
            .collect();
        secondaries.sort_by_key(|(_, id)| *id);
        procs.extend(secondaries.into_iter().map(|(type_, id)| ProcessInfo {
            type_,
            client_id: Some(id),
        }));
        Some(procs)
    }

    async fn observe_nfv(&self, sec_id: u32) -> Option<NfvInfo> {
        let state = self.lock();
        if !state.reachable {
            return None;
        }
        state.nfvs.get(&sec_id).cloned()
    }

    async fn observe_components(
        &self,
        kind: WorkerKind,
        sec_id: u32,
    ) -> Option<ComponentWorkerInfo> {
        let state = self.lock();
        if !state.reachable {
            return None;
        }
        state.component_workers.get(&(kind, sec_id)).cloned()
    }

    async fn observe_pcap(&self, sec_id: u32) -> Option<PcapInfo> {
        let state = self.lock();
        if !state.reachable {
            return None;
        }
        state.pcaps.get(&sec_id).cloned()
    }

    async fn apply(&self, kind: WorkerKind, sec_id: u32, op: &Operation) -> bool {
        let mut state = self.lock();
        let accepted = state.reachable
            && match kind {
                WorkerKind::Nfv => state
                    .nfvs
                    .get_mut(&sec_id)
                    .is_some_and(|nfv| apply_nfv(nfv, op)),
                WorkerKind::Vf | WorkerKind::Mirror => state
                    .component_workers
                    .get_mut(&(kind, sec_id))
                    .is_some_and(|worker| apply_components(worker, op)),
                WorkerKind::Pcap => match (state.pcaps.get_mut(&sec_id), op) {
                    (Some(pcap), Operation::Capture(toggle)) => {
                        pcap.status = match toggle {
                            Toggle::Start => "running".to_string(),
                            Toggle::Stop => "idle".to_string(),
                        };
                        true
                    }
                    _ => false,
                },
            };
        if accepted {
            state.applied.push(op.clone());
        } else {
            state.rejected.push(op.clone());
        }
        accepted
    }

    async fn announce_removal(&self, kind: WorkerKind, sec_id: u32) -> bool {
        let mut state = self.lock();
        if !state.reachable {
            return false;
        }
        state.announced.push((kind, sec_id));
        match kind {
            WorkerKind::Nfv => state.nfvs.remove(&sec_id).is_some(),
            WorkerKind::Vf | WorkerKind::Mirror => {
                state.component_workers.remove(&(kind, sec_id)).is_some()
            }
            WorkerKind::Pcap => state.pcaps.remove(&sec_id).is_some(),
        }
    }
}

/// Provider handing out the same fake for every address
pub(crate) struct FakeProvider(pub(crate) FakeSppCtl);

impl EndpointProvider for FakeProvider {
    fn connect(&self, _vip: &str) -> Arc<dyn ControlEndpoint> {
        Arc::new(self.0.clone())
    }
}

/// Minimal Spp spec with the gate and primary switch only
pub(crate) fn sample_spec() -> SppSpec {
    SppSpec {
        ctl: CtlSpec {
            name: "ctl".to_string(),
            image: "spp-ctl:latest".to_string(),
        },
        primary: PrimarySpec {
            name: "primary".to_string(),
            image: "spp:latest".to_string(),
            eal: EalSpec {
                lcores: "1".to_string(),
                socket_mem: "1024".to_string(),
                vdevs: vec![],
            },
            port_mask: "0x03".to_string(),
        },
        nfvs: vec![],
        vfs: vec![],
        mirrors: vec![],
        pcaps: vec![],
        apps: vec![],
    }
}

/// A stored Spp in `default` with a uid and the given spec
pub(crate) fn stored_spp(name: &str, spec: SppSpec) -> Spp {
    let mut spp = Spp::new(name, spec);
    spp.metadata.namespace = Some("default".to_string());
    spp.metadata.uid = Some(format!("uid-{name}"));
    spp
}
