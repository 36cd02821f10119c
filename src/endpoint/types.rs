//! Response shapes of the spp-ctl REST API
//!
//! Only the fields the operator reads are modelled; unknown fields are
//! ignored by serde.

use serde::{Deserialize, Serialize};

/// One entry of `GET /v1/processes`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ProcessInfo {
    /// `primary`, `nfv`, `vf`, `mirror` or `pcap`
    #[serde(rename = "type")]
    pub type_: String,
    /// Secondary id, absent for the primary
    #[serde(rename = "client-id", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<i64>,
}

/// `src -> dst` wiring as reported by spp_nfv
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PatchInfo {
    /// Source resource
    pub src: String,
    /// Destination resource
    pub dst: String,
}

/// `GET /v1/nfvs/{id}`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct NfvInfo {
    /// Secondary id the worker registered with
    #[serde(rename = "client-id", default)]
    pub client_id: i64,
    /// `running` or `idle`
    #[serde(default)]
    pub status: String,
    /// Resources added to the worker
    #[serde(default)]
    pub ports: Vec<String>,
    /// Current patches
    #[serde(default)]
    pub patches: Vec<PatchInfo>,
}

/// VLAN block of an attached port
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct VlanInfo {
    /// `none`, `add` or `del`
    #[serde(default)]
    pub operation: String,
    /// VLAN id
    #[serde(default)]
    pub id: u16,
    /// Priority code point
    #[serde(default)]
    pub pcp: u8,
}

/// A port attached to a component
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PortInfo {
    /// Port identifier
    pub port: String,
    /// VLAN settings, absent on older endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<VlanInfo>,
}

/// Component type reported for a core with nothing assigned
pub const UNUSED_COMPONENT_TYPE: &str = "unuse";

/// A component, or an unused core, as reported by spp_vf / spp_mirror
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ComponentInfo {
    /// Core id
    pub core: u32,
    /// Component name, empty for unused cores
    #[serde(default)]
    pub name: String,
    /// Component type, `unuse` for unused cores
    #[serde(rename = "type", default)]
    pub type_: String,
    /// Attached rx ports
    #[serde(default)]
    pub rx_port: Vec<PortInfo>,
    /// Attached tx ports
    #[serde(default)]
    pub tx_port: Vec<PortInfo>,
}

impl ComponentInfo {
    /// Whether the entry is a real component rather than an idle core
    pub fn is_usable(&self) -> bool {
        !self.name.is_empty() && self.type_ != UNUSED_COMPONENT_TYPE && !self.type_.is_empty()
    }
}

/// A classifier table row; vlan rows encode `value` as `vlanId/MAC`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ClassifierInfo {
    /// `mac` or `vlan`
    #[serde(rename = "type")]
    pub type_: String,
    /// Match value
    pub value: String,
    /// Target port
    pub port: String,
}

/// `GET /v1/vfs/{id}` and `GET /v1/mirrors/{id}`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ComponentWorkerInfo {
    /// Secondary id the worker registered with
    #[serde(rename = "client-id", default)]
    pub client_id: i64,
    /// Ports known to the worker
    #[serde(default)]
    pub ports: Vec<String>,
    /// Components and unused cores
    #[serde(default)]
    pub components: Vec<ComponentInfo>,
    /// Classifier table, absent for spp_mirror
    #[serde(default)]
    pub classifier_table: Vec<ClassifierInfo>,
}

impl ComponentWorkerInfo {
    /// Usable components only
    pub fn usable_components(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.components.iter().filter(|c| c.is_usable())
    }
}

/// `GET /v1/pcaps/{id}`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PcapInfo {
    /// Secondary id the worker registered with
    #[serde(rename = "client-id", default)]
    pub client_id: i64,
    /// `idle` or `running`
    #[serde(default)]
    pub status: String,
}
