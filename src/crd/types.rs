//! Supporting types for the Spp CRD

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::identity::WorkerId;

// =============================================================================
// Spec types
// =============================================================================

/// DPDK environment abstraction layer options shared by every worker
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EalSpec {
    /// Core list passed as `-l` / `--lcores`
    pub lcores: String,

    /// Hugepage memory per socket, e.g. `1024`
    #[serde(default)]
    pub socket_mem: String,

    /// Virtual devices, each a list of comma-joined fragments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vdevs: Vec<Vec<String>>,
}

/// The spp-ctl gate process
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CtlSpec {
    /// Container name
    pub name: String,
    /// Container image
    pub image: String,
}

/// The spp_primary switch process
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrimarySpec {
    /// Container name
    pub name: String,
    /// Container image
    pub image: String,
    /// EAL options
    pub eal: EalSpec,
    /// Physical port mask, e.g. `0x03`
    pub port_mask: String,
}

/// Directed wiring between two resources of a flow-wiring worker
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct PatchSpec {
    /// Source resource, e.g. `phy:0`
    pub src: String,
    /// Destination resource, e.g. `ring:0`
    pub dst: String,
}

/// spp_nfv: a flow-wiring worker
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct NfvSpec {
    /// Identity, e.g. `nfv:1`
    pub name: WorkerId,
    /// Container image
    pub image: String,
    /// EAL options
    pub eal: EalSpec,
    /// `client` to run vhost in client mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vhost: Option<String>,
    /// Resource identifiers (`ring:0`, `vhost:1`, ...)
    #[serde(default)]
    pub resources: Vec<String>,
    /// Wiring between resources
    #[serde(default)]
    pub patches: Vec<PatchSpec>,
}

/// VLAN tagging operation applied by a port
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VlanOperation {
    /// Pass frames through untouched
    #[default]
    None,
    /// Push a VLAN tag
    Add,
    /// Pop the VLAN tag
    Del,
}

impl std::fmt::Display for VlanOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Add => write!(f, "add"),
            Self::Del => write!(f, "del"),
        }
    }
}

impl std::str::FromStr for VlanOperation {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "add" => Ok(Self::Add),
            "del" => Ok(Self::Del),
            _ => Err(crate::Error::malformed(format!(
                "invalid vlan operation '{s}', expected one of: none, add, del"
            ))),
        }
    }
}

/// VLAN settings of a port
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct VlanSpec {
    /// Tagging operation
    #[serde(default)]
    pub operation: VlanOperation,
    /// VLAN id
    #[serde(default)]
    pub id: u16,
    /// Priority code point
    #[serde(default)]
    pub pcp: u8,
}

/// A port attached to a component's rx or tx side
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct PortSpec {
    /// Port identifier, e.g. `ring:0`
    pub port: String,
    /// VLAN behaviour; unset means no tagging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<VlanSpec>,
}

/// A processing stage of a component-based worker
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Component name
    pub name: String,
    /// Core the component is pinned to
    pub core: u32,
    /// Component type (`forward`, `merge`, `classifier`, `mirror`, ...)
    #[serde(rename = "type")]
    pub type_: String,
    /// Ports feeding the component
    #[serde(default)]
    pub rx_port: Vec<PortSpec>,
    /// Ports the component emits to
    #[serde(default)]
    pub tx_port: Vec<PortSpec>,
}

/// Match key type of a classifier entry
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierType {
    /// Match on destination MAC
    #[default]
    Mac,
    /// Match on VLAN id and destination MAC
    Vlan,
}

impl std::fmt::Display for ClassifierType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mac => write!(f, "mac"),
            Self::Vlan => write!(f, "vlan"),
        }
    }
}

/// A classifier rule routing matching traffic to a port
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierEntrySpec {
    /// Match type
    #[serde(rename = "type")]
    pub type_: ClassifierType,
    /// Destination MAC address (`default` is accepted by spp_vf)
    pub mac_address: String,
    /// VLAN id, required for `vlan` entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,
    /// Target port
    pub port: String,
}

/// spp_vf: component-based worker with a classifier table
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VfSpec {
    /// Identity, e.g. `vf:2`
    pub name: WorkerId,
    /// Container image
    pub image: String,
    /// EAL options
    pub eal: EalSpec,
    /// Components
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    /// Classifier table
    #[serde(default)]
    pub classifier_table: Vec<ClassifierEntrySpec>,
}

/// spp_mirror: component-based worker without a classifier table
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct MirrorSpec {
    /// Identity, e.g. `mirror:3`
    pub name: WorkerId,
    /// Container image
    pub image: String,
    /// EAL options
    pub eal: EalSpec,
    /// Components
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
}

/// Capture state of a pcap worker
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    /// Not capturing
    #[default]
    Idle,
    /// Capturing
    Running,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// spp_pcap: packet capture worker
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PcapSpec {
    /// Identity, e.g. `pcap:4`
    pub name: WorkerId,
    /// Container image
    pub image: String,
    /// EAL options
    pub eal: EalSpec,
    /// Port to capture on
    pub port: String,
    /// `containerDir:hostDir` for capture files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_dir: Option<String>,
    /// Maximum capture file size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fsize: Option<u64>,
    /// Desired capture state
    #[serde(default)]
    pub status: CaptureState,
}

/// How an application attaches to the patch panel
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppAttachment {
    /// Secondary process sharing hugepages with the primary (ring PMD)
    #[default]
    Pipe,
    /// Standalone process talking vhost-user to the patch panel
    Vhost,
}

/// A DPDK application started once the patch panel forwards
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// Identity, e.g. `testpmd:1`
    pub name: WorkerId,
    /// Container image
    pub image: String,
    /// EAL options
    pub eal: EalSpec,
    /// Application binary (first element is used)
    pub command: Vec<String>,
    /// Application arguments after `--`
    #[serde(default)]
    pub args: Vec<String>,
    /// Attachment type
    #[serde(default, rename = "type")]
    pub type_: AppAttachment,
}

// =============================================================================
// Worker kinds
// =============================================================================

/// Secondary worker kinds, in reconcile order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    /// spp_nfv, flow-wiring
    Nfv,
    /// spp_vf, components + classifier
    Vf,
    /// spp_mirror, components only
    Mirror,
    /// spp_pcap, capture
    Pcap,
}

impl WorkerKind {
    /// All kinds in the order a reconcile pass visits them
    pub const ALL: [WorkerKind; 4] = [Self::Nfv, Self::Vf, Self::Mirror, Self::Pcap];

    /// REST collection segment on the control endpoint
    pub fn api_segment(&self) -> &'static str {
        match self {
            Self::Nfv => "nfvs",
            Self::Vf => "vfs",
            Self::Mirror => "mirrors",
            Self::Pcap => "pcaps",
        }
    }

    /// Kind fragment used in object names and the role label
    pub fn object_segment(&self) -> &'static str {
        match self {
            Self::Nfv => "nfv",
            Self::Vf => "vf",
            Self::Mirror => "mirror",
            Self::Pcap => "pcap",
        }
    }

    /// Executable started in the worker container
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Nfv => "spp_nfv",
            Self::Vf => "spp_vf",
            Self::Mirror => "spp_mirror",
            Self::Pcap => "spp_pcap",
        }
    }

    /// Container name of the worker pod
    pub fn container_name(&self) -> &'static str {
        match self {
            Self::Nfv => "nfv",
            Self::Vf | Self::Mirror => "vf",
            Self::Pcap => "pcap",
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nfv => write!(f, "Nfv"),
            Self::Vf => write!(f, "Vf"),
            Self::Mirror => write!(f, "Mirror"),
            Self::Pcap => write!(f, "Pcap"),
        }
    }
}

// =============================================================================
// Status types
// =============================================================================

/// Aggregate phase of an Spp resource
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum SppPhase {
    /// Waiting for the gate process to run and answer
    #[default]
    Pending,
    /// Gate answers, primary switch not yet ready
    GateReady,
    /// Primary switch answers, secondary workers not yet visited
    SwitchReady,
    /// At least one worker kind has outstanding work
    Converging,
    /// Every kind reports its desired count ready
    Ready,
}

impl std::fmt::Display for SppPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::GateReady => write!(f, "GateReady"),
            Self::SwitchReady => write!(f, "SwitchReady"),
            Self::Converging => write!(f, "Converging"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Lifecycle of a single worker instance
///
/// Within one pass a worker only moves forward:
/// `Unknown -> Created -> Running -> (Ready | Degraded) -> Removed`.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
)]
pub enum WorkerPhase {
    /// Nothing known yet
    #[default]
    Unknown,
    /// Pod exists but is not running
    Created,
    /// Pod runs, convergence not yet attempted
    Running,
    /// Live configuration matches the spec and the endpoint confirms readiness
    Ready,
    /// Pod runs but configuration could not be fully converged or observed
    Degraded,
    /// Worker torn down
    Removed,
}

impl std::fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Ready => write!(f, "Ready"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Removed => write!(f, "Removed"),
        }
    }
}

/// Name and phase of an owned pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PodRef {
    /// Pod name
    #[serde(default)]
    pub name: String,
    /// Pod phase as reported by the kubelet
    #[serde(default)]
    pub phase: String,
}

/// Status of a singleton role (gate or primary switch)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct RoleStatus {
    /// Owned pod
    #[serde(default)]
    pub pod: PodRef,
    /// `1/1` once ready, `0/1` otherwise
    pub status: String,
}

impl Default for RoleStatus {
    fn default() -> Self {
        Self {
            pod: PodRef::default(),
            status: "0/1".to_string(),
        }
    }
}

impl RoleStatus {
    /// Whether the role has been confirmed ready
    pub fn is_ready(&self) -> bool {
        self.status == "1/1"
    }
}

/// Flattened view of a worker's live configuration, as last observed
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObservedSummary {
    /// Client id reported by the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<i64>,
    /// Process status reported by the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Resources or ports known to the worker
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    /// Patches, rendered `src->dst`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<String>,
    /// Components, rendered `name@core/type`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
    /// Classifier entries, rendered `type/value->port`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifier_table: Vec<String>,
}

/// Status of one secondary worker instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    /// Owned pod
    #[serde(default)]
    pub pod: PodRef,
    /// Lifecycle phase
    #[serde(default)]
    pub phase: WorkerPhase,
    /// Live configuration after the last convergence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<ObservedSummary>,
    /// Why the worker is degraded, if it is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status subtree owned by one worker kind's coordinator
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct KindStatus {
    /// Workers keyed by identity
    #[serde(default)]
    pub workers: BTreeMap<WorkerId, WorkerStatus>,
    /// `recorded/desired`
    pub status: String,
}

impl Default for KindStatus {
    fn default() -> Self {
        Self {
            workers: BTreeMap::new(),
            status: "0/0".to_string(),
        }
    }
}

impl KindStatus {
    /// Identities that reached `Ready`
    pub fn ready_ids(&self) -> Vec<&WorkerId> {
        self.workers
            .iter()
            .filter(|(_, w)| w.phase == WorkerPhase::Ready)
            .map(|(id, _)| id)
            .collect()
    }
}

/// Status of application pods
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct AppsStatus {
    /// Application pods keyed by identity
    #[serde(default)]
    pub pods: BTreeMap<WorkerId, PodRef>,
    /// `running/desired`
    pub status: String,
}

impl Default for AppsStatus {
    fn default() -> Self {
        Self {
            pods: BTreeMap::new(),
            status: "0/0".to_string(),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready, GateReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Same type, status, reason and message, ignoring the timestamp
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}
