//! Pod and Service construction for every SPP role
//!
//! Each role runs a single container whose command is `/bin/bash -c` with
//! the full launch line as its only argument. DPDK processes share hugepages
//! and the `/var/run/dpdk` runtime directory with the primary through host
//! paths, so every pod lands on the node recorded in status.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, Pod, PodSpec, ResourceRequirements, SecurityContext, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::config::ControlPorts;
use crate::crd::{
    AppAttachment, AppSpec, CtlSpec, EalSpec, MirrorSpec, NfvSpec, PcapSpec, PrimarySpec, Spp,
    VfSpec, WorkerId, WorkerKind,
};
use crate::Error;

/// Label carrying the owning Spp's name
pub const INSTANCE_LABEL: &str = "spp.dev/instance";

/// Label carrying the role of a pod (`ctl`, `primary`, `nfv`, ...)
pub const ROLE_LABEL: &str = "spp.dev/role";

/// Pod phase reported once all containers started
pub const POD_RUNNING: &str = "Running";

const HUGEPAGE_DIR: &str = "/dev/hugepages";
const SPP_CTL: &str = "python3 /root/spp/src/spp-ctl/spp-ctl";

/// The Spp that owns generated objects
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Owner {
    /// Spp name
    pub name: String,
    /// Spp namespace
    pub namespace: String,
    /// Spp uid
    pub uid: String,
}

impl Owner {
    /// Owner identity of a stored Spp
    pub fn from_spp(spp: &Spp) -> Result<Self, Error> {
        let namespace = spp
            .namespace()
            .ok_or_else(|| Error::validation(format!("Spp {} has no namespace", spp.name_any())))?;
        let uid = spp
            .uid()
            .ok_or_else(|| Error::validation(format!("Spp {} has no uid", spp.name_any())))?;
        Ok(Self {
            name: spp.name_any(),
            namespace,
            uid,
        })
    }

    fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: "spp.dev/v1".to_string(),
            kind: "Spp".to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn labels(&self, role: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), "spp".to_string()),
            (
                "app.kubernetes.io/managed-by".to_string(),
                "spp-operator".to_string(),
            ),
            (INSTANCE_LABEL.to_string(), self.name.clone()),
            (ROLE_LABEL.to_string(), role.to_string()),
        ])
    }

    fn metadata(&self, name: String, role: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels(role)),
            owner_references: Some(vec![self.owner_reference()]),
            ..Default::default()
        }
    }

    /// Name of the gate pod and service
    pub fn ctl_name(&self) -> String {
        format!("{}-ctl", self.name)
    }

    /// Name of the primary switch pod
    pub fn primary_name(&self) -> String {
        format!("{}-primary", self.name)
    }

    /// Name of a secondary worker pod, e.g. `spp-a-nfv-nfv-1`
    ///
    /// The kind is part of the name so a worker moved between kinds never
    /// reuses the pod of its old kind.
    pub fn worker_name(&self, kind: WorkerKind, id: &WorkerId) -> String {
        format!("{}-{}-{}", self.name, kind.object_segment(), id.object_suffix())
    }

    /// Name of an application pod
    pub fn app_name(&self, id: &WorkerId) -> String {
        format!("{}-app-{}", self.name, id.object_suffix())
    }
}

/// Phase of a pod, empty if not reported yet
pub fn pod_phase(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_default()
}

/// Whether a pod reports the `Running` phase
pub fn is_running(pod: &Pod) -> bool {
    pod_phase(pod) == POD_RUNNING
}

// =============================================================================
// Launch lines
// =============================================================================

fn eal_args(eal: &EalSpec) -> Vec<String> {
    let mut args = vec!["-l".to_string(), eal.lcores.clone(), "-n".to_string(), "4".to_string()];
    if !eal.socket_mem.is_empty() {
        args.push("--socket-mem".to_string());
        args.push(eal.socket_mem.clone());
    }
    for vdev in &eal.vdevs {
        args.push("--vdev".to_string());
        args.push(vdev.join(","));
    }
    args
}

/// Launch line of spp-ctl
pub fn ctl_command(ports: ControlPorts) -> String {
    format!(
        "{SPP_CTL} -b 0.0.0.0 -p {} -s {} -a {}",
        ports.primary, ports.secondary, ports.rest
    )
}

/// Launch line of spp_primary
pub fn primary_command(spec: &PrimarySpec, vip: &str, ports: ControlPorts) -> String {
    let mut args = vec!["spp_primary".to_string()];
    args.extend(eal_args(&spec.eal));
    args.extend([
        "--huge-dir".to_string(),
        HUGEPAGE_DIR.to_string(),
        "--base-virtaddr".to_string(),
        "0x100000000".to_string(),
        "--proc-type".to_string(),
        "primary".to_string(),
        "--".to_string(),
        "-p".to_string(),
        spec.port_mask.clone(),
        "-n".to_string(),
        "10".to_string(),
        "-s".to_string(),
        format!("{vip}:{}", ports.primary),
    ]);
    args.join(" ")
}

fn secondary_prefix(binary: &str, eal: &EalSpec) -> Vec<String> {
    let mut args = vec![binary.to_string()];
    args.extend(eal_args(eal));
    args.extend(["--proc-type".to_string(), "secondary".to_string()]);
    args.push("--".to_string());
    args
}

/// Launch line of spp_nfv
pub fn nfv_command(spec: &NfvSpec, vip: &str, ports: ControlPorts) -> String {
    let mut args = secondary_prefix(WorkerKind::Nfv.binary(), &spec.eal);
    args.extend([
        "-n".to_string(),
        spec.name.sec_id.to_string(),
        "-s".to_string(),
        format!("{vip}:{}", ports.secondary),
    ]);
    if spec.vhost.as_deref() == Some("client") {
        args.push("--vhost-client".to_string());
    }
    args.join(" ")
}

fn component_command(kind: WorkerKind, eal: &EalSpec, id: &WorkerId, vip: &str, ports: ControlPorts) -> String {
    let mut args = secondary_prefix(kind.binary(), eal);
    args.extend([
        "--client-id".to_string(),
        id.sec_id.to_string(),
        "-s".to_string(),
        format!("{vip}:{}", ports.secondary),
        "--vhost-client".to_string(),
    ]);
    args.join(" ")
}

/// Launch line of spp_vf
pub fn vf_command(spec: &VfSpec, vip: &str, ports: ControlPorts) -> String {
    component_command(WorkerKind::Vf, &spec.eal, &spec.name, vip, ports)
}

/// Launch line of spp_mirror
pub fn mirror_command(spec: &MirrorSpec, vip: &str, ports: ControlPorts) -> String {
    component_command(WorkerKind::Mirror, &spec.eal, &spec.name, vip, ports)
}

fn pcap_out_dirs(spec: &PcapSpec) -> Option<(&str, &str)> {
    let out = spec.out_dir.as_deref()?;
    Some(out.split_once(':').unwrap_or((out, out)))
}

/// Launch line of spp_pcap
pub fn pcap_command(spec: &PcapSpec, vip: &str, ports: ControlPorts) -> String {
    let mut args = secondary_prefix(WorkerKind::Pcap.binary(), &spec.eal);
    args.extend([
        "--client-id".to_string(),
        spec.name.sec_id.to_string(),
        "-s".to_string(),
        format!("{vip}:{}", ports.secondary),
        "-c".to_string(),
        spec.port.clone(),
    ]);
    if let Some((container_dir, _)) = pcap_out_dirs(spec) {
        args.extend(["--out-dir".to_string(), container_dir.to_string()]);
    }
    if let Some(fsize) = spec.fsize {
        args.extend(["--fsize".to_string(), fsize.to_string()]);
    }
    args.join(" ")
}

/// Launch line of an application
///
/// Pipe applications join the primary's hugepage memory as secondaries;
/// vhost applications run standalone with their own file prefix.
pub fn app_command(spec: &AppSpec) -> Result<String, Error> {
    let binary = spec
        .command
        .first()
        .ok_or_else(|| Error::validation(format!("application {} has an empty command", spec.name)))?;
    let mut args = vec![binary.clone()];
    args.extend(eal_args(&spec.eal));
    match spec.type_ {
        AppAttachment::Pipe => {
            args.extend(["--proc-type".to_string(), "secondary".to_string()]);
        }
        AppAttachment::Vhost => {
            args.extend([
                "--no-pci".to_string(),
                "--file-prefix".to_string(),
                spec.name.object_suffix(),
            ]);
        }
    }
    args.push("--".to_string());
    args.extend(spec.args.iter().cloned());
    Ok(args.join(" "))
}

// =============================================================================
// Objects
// =============================================================================

fn host_volume(name: &str, path: &str) -> (Volume, VolumeMount) {
    (
        Volume {
            name: name.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: path.to_string(),
                type_: None,
            }),
            ..Default::default()
        },
        VolumeMount {
            name: name.to_string(),
            mount_path: path.to_string(),
            ..Default::default()
        },
    )
}

fn dpdk_volumes() -> Vec<(Volume, VolumeMount)> {
    vec![
        host_volume("hugepages", HUGEPAGE_DIR),
        host_volume("dpdk", "/var/run"),
        host_volume("tmp", "/tmp"),
        host_volume("nic", "/sys/devices"),
    ]
}

fn hugepage_limits() -> ResourceRequirements {
    ResourceRequirements {
        limits: Some(BTreeMap::from([
            ("hugepages-1Gi".to_string(), Quantity("1Gi".to_string())),
            ("memory".to_string(), Quantity("1Gi".to_string())),
        ])),
        ..Default::default()
    }
}

struct PodShape<'a> {
    name: String,
    role: &'a str,
    container: &'a str,
    image: &'a str,
    command: String,
    node: &'a str,
    dpdk: bool,
    host_pid: bool,
    volumes: Vec<(Volume, VolumeMount)>,
}

fn build_pod(owner: &Owner, shape: PodShape<'_>) -> Pod {
    let mut volumes = if shape.dpdk { dpdk_volumes() } else { Vec::new() };
    volumes.extend(shape.volumes);
    let (volumes, mounts): (Vec<Volume>, Vec<VolumeMount>) = volumes.into_iter().unzip();

    let container = Container {
        name: shape.container.to_string(),
        image: Some(shape.image.to_string()),
        command: Some(vec!["/bin/bash".to_string(), "-c".to_string()]),
        args: Some(vec![shape.command]),
        security_context: shape.dpdk.then(|| SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        resources: shape.dpdk.then(hugepage_limits),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        ..Default::default()
    };

    Pod {
        metadata: owner.metadata(shape.name, shape.role),
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: (!volumes.is_empty()).then_some(volumes),
            node_selector: Some(BTreeMap::from([(
                "kubernetes.io/hostname".to_string(),
                shape.node.to_string(),
            )])),
            host_pid: shape.host_pid.then_some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod running spp-ctl
pub fn ctl_pod(owner: &Owner, spec: &CtlSpec, node: &str, ports: ControlPorts) -> Pod {
    build_pod(
        owner,
        PodShape {
            name: owner.ctl_name(),
            role: "ctl",
            container: &spec.name,
            image: &spec.image,
            command: ctl_command(ports),
            node,
            dpdk: false,
            host_pid: false,
            volumes: Vec::new(),
        },
    )
}

/// ClusterIP service in front of spp-ctl
pub fn ctl_service(owner: &Owner, ports: ControlPorts) -> Service {
    let port = |name: &str, port: u16| ServicePort {
        name: Some(name.to_string()),
        port: i32::from(port),
        target_port: Some(IntOrString::Int(i32::from(port))),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    };
    Service {
        metadata: owner.metadata(owner.ctl_name(), "ctl"),
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([
                (INSTANCE_LABEL.to_string(), owner.name.clone()),
                (ROLE_LABEL.to_string(), "ctl".to_string()),
            ])),
            ports: Some(vec![
                port("primary", ports.primary),
                port("secondary", ports.secondary),
                port("rest", ports.rest),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod running spp_primary
pub fn primary_pod(owner: &Owner, spec: &PrimarySpec, node: &str, vip: &str, ports: ControlPorts) -> Pod {
    build_pod(
        owner,
        PodShape {
            name: owner.primary_name(),
            role: "primary",
            container: &spec.name,
            image: &spec.image,
            command: primary_command(spec, vip, ports),
            node,
            dpdk: true,
            host_pid: false,
            volumes: Vec::new(),
        },
    )
}

/// Desired spec of one secondary worker, borrowed from the Spp
#[derive(Clone, Copy, Debug)]
pub enum WorkerSpec<'a> {
    /// spp_nfv
    Nfv(&'a NfvSpec),
    /// spp_vf
    Vf(&'a VfSpec),
    /// spp_mirror
    Mirror(&'a MirrorSpec),
    /// spp_pcap
    Pcap(&'a PcapSpec),
}

impl WorkerSpec<'_> {
    /// Worker kind
    pub fn kind(&self) -> WorkerKind {
        match self {
            Self::Nfv(_) => WorkerKind::Nfv,
            Self::Vf(_) => WorkerKind::Vf,
            Self::Mirror(_) => WorkerKind::Mirror,
            Self::Pcap(_) => WorkerKind::Pcap,
        }
    }

    /// Worker identity
    pub fn id(&self) -> &WorkerId {
        match self {
            Self::Nfv(s) => &s.name,
            Self::Vf(s) => &s.name,
            Self::Mirror(s) => &s.name,
            Self::Pcap(s) => &s.name,
        }
    }

    fn image(&self) -> &str {
        match self {
            Self::Nfv(s) => &s.image,
            Self::Vf(s) => &s.image,
            Self::Mirror(s) => &s.image,
            Self::Pcap(s) => &s.image,
        }
    }

    fn command(&self, vip: &str, ports: ControlPorts) -> String {
        match self {
            Self::Nfv(s) => nfv_command(s, vip, ports),
            Self::Vf(s) => vf_command(s, vip, ports),
            Self::Mirror(s) => mirror_command(s, vip, ports),
            Self::Pcap(s) => pcap_command(s, vip, ports),
        }
    }
}

/// Pod running one secondary worker
pub fn worker_pod(owner: &Owner, worker: WorkerSpec<'_>, node: &str, vip: &str, ports: ControlPorts) -> Pod {
    let kind = worker.kind();
    let mut volumes = Vec::new();
    if let WorkerSpec::Pcap(spec) = worker {
        if let Some((container_dir, host_dir)) = pcap_out_dirs(spec) {
            let (volume, mut mount) = host_volume("pcap-out", host_dir);
            mount.mount_path = container_dir.to_string();
            volumes.push((volume, mount));
        }
    }
    build_pod(
        owner,
        PodShape {
            name: owner.worker_name(kind, worker.id()),
            role: kind.object_segment(),
            container: kind.container_name(),
            image: worker.image(),
            command: worker.command(vip, ports),
            node,
            dpdk: true,
            host_pid: true,
            volumes,
        },
    )
}

/// Pod running one application
pub fn app_pod(owner: &Owner, spec: &AppSpec, node: &str) -> Result<Pod, Error> {
    Ok(build_pod(
        owner,
        PodShape {
            name: owner.app_name(&spec.name),
            role: "app",
            container: &spec.name.name,
            image: &spec.image,
            command: app_command(spec)?,
            node,
            dpdk: true,
            host_pid: spec.type_ == AppAttachment::Pipe,
            volumes: Vec::new(),
        },
    ))
}
