//! Spp Custom Resource Definition
//!
//! An `Spp` describes one Soft Patch Panel deployment on one node: the gate
//! process (spp-ctl), the primary switch, the secondary workers of each kind
//! and the DPDK applications wired to them.

use std::collections::HashSet;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::identity::WorkerId;
use super::types::{
    AppSpec, AppsStatus, Condition, CtlSpec, KindStatus, MirrorSpec, NfvSpec, PcapSpec,
    PrimarySpec, RoleStatus, SppPhase, VfSpec, WorkerKind,
};

/// Maximum number of event strings kept in status
pub const MAX_EVENTS: usize = 64;

/// Specification for an Spp
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "spp.dev",
    version = "v1",
    kind = "Spp",
    plural = "spps",
    status = "SppStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Node","type":"string","jsonPath":".status.node"}"#,
    printcolumn = r#"{"name":"VIP","type":"string","jsonPath":".status.serviceVip"}"#,
    printcolumn = r#"{"name":"Nfvs","type":"string","jsonPath":".status.nfvs.status"}"#,
    printcolumn = r#"{"name":"Vfs","type":"string","jsonPath":".status.vfs.status"}"#,
    printcolumn = r#"{"name":"Apps","type":"string","jsonPath":".status.apps.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SppSpec {
    /// Gate process
    pub ctl: CtlSpec,

    /// Primary switch
    pub primary: PrimarySpec,

    /// Flow-wiring workers
    #[serde(default)]
    pub nfvs: Vec<NfvSpec>,

    /// Component workers with a classifier table
    #[serde(default)]
    pub vfs: Vec<VfSpec>,

    /// Component workers that mirror traffic
    #[serde(default)]
    pub mirrors: Vec<MirrorSpec>,

    /// Capture workers
    #[serde(default)]
    pub pcaps: Vec<PcapSpec>,

    /// Applications started once the patch panel forwards
    #[serde(default)]
    pub apps: Vec<AppSpec>,
}

impl SppSpec {
    /// Desired identities of one worker kind, in spec order
    pub fn worker_ids(&self, kind: WorkerKind) -> Vec<WorkerId> {
        match kind {
            WorkerKind::Nfv => self.nfvs.iter().map(|w| w.name.clone()).collect(),
            WorkerKind::Vf => self.vfs.iter().map(|w| w.name.clone()).collect(),
            WorkerKind::Mirror => self.mirrors.iter().map(|w| w.name.clone()).collect(),
            WorkerKind::Pcap => self.pcaps.iter().map(|w| w.name.clone()).collect(),
        }
    }

    /// Validate the specification
    ///
    /// Secondary ids are process ids registered with the primary switch, so
    /// they must be unique across every secondary kind.
    pub fn validate(&self) -> Result<(), crate::Error> {
        let names = WorkerKind::ALL
            .iter()
            .flat_map(|kind| self.worker_ids(*kind))
            .chain(self.apps.iter().map(|a| a.name.clone()));
        for id in names {
            if !id.has_object_name() {
                return Err(crate::Error::validation(format!(
                    "worker name {id} is not a DNS label of at most 40 characters"
                )));
            }
        }

        let mut seen_sec_ids = HashSet::new();
        for kind in WorkerKind::ALL {
            for id in self.worker_ids(kind) {
                if !seen_sec_ids.insert(id.sec_id) {
                    return Err(crate::Error::validation(format!(
                        "secondary id {} of {} is already used by another worker",
                        id.sec_id, id
                    )));
                }
            }
        }

        let mut seen_apps = HashSet::new();
        for app in &self.apps {
            if !seen_apps.insert(&app.name) {
                return Err(crate::Error::validation(format!(
                    "application {} is listed twice",
                    app.name
                )));
            }
            if app.command.is_empty() {
                return Err(crate::Error::validation(format!(
                    "application {} has an empty command",
                    app.name
                )));
            }
        }

        for vf in &self.vfs {
            for entry in &vf.classifier_table {
                if entry.type_ == super::types::ClassifierType::Vlan && entry.vlan.is_none() {
                    return Err(crate::Error::validation(format!(
                        "vlan classifier entry for {} on {} has no vlan id",
                        entry.mac_address, vf.name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Status for an Spp
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SppStatus {
    /// Current phase
    #[serde(default)]
    pub phase: SppPhase,

    /// Node selected for every pod of this Spp; chosen once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// Cluster IP of the gate service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_vip: Option<String>,

    /// Human-readable summary of the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Recent events, newest last
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,

    /// Gate process
    #[serde(default)]
    pub ctl: RoleStatus,

    /// Primary switch
    #[serde(default)]
    pub primary: RoleStatus,

    /// Flow-wiring workers
    #[serde(default)]
    pub nfvs: KindStatus,

    /// Component workers with a classifier table
    #[serde(default)]
    pub vfs: KindStatus,

    /// Mirror workers
    #[serde(default)]
    pub mirrors: KindStatus,

    /// Capture workers
    #[serde(default)]
    pub pcaps: KindStatus,

    /// Applications
    #[serde(default)]
    pub apps: AppsStatus,

    /// Conditions representing the Spp state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl SppStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: SppPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the phase and return self for chaining
    pub fn phase(mut self, phase: SppPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Set the summary and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.status = Some(msg.into());
        self
    }

    /// Add a condition and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        self.set_condition(condition);
        self
    }

    /// Insert or replace a condition by type
    ///
    /// The previous transition time is kept when nothing but the timestamp
    /// differs, so an unchanged pass produces a structurally equal status.
    pub fn set_condition(&mut self, condition: Condition) {
        if let Some(existing) = self.conditions.iter().find(|c| c.type_ == condition.type_) {
            if existing.same_state(&condition) {
                return;
            }
        }
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
    }

    /// Append an event, dropping the oldest ones past [`MAX_EVENTS`]
    pub fn push_event(&mut self, event: impl Into<String>) {
        self.events.push(event.into());
        if self.events.len() > MAX_EVENTS {
            let excess = self.events.len() - MAX_EVENTS;
            self.events.drain(..excess);
        }
    }

    /// Status subtree owned by one worker kind
    pub fn kind(&self, kind: WorkerKind) -> &KindStatus {
        match kind {
            WorkerKind::Nfv => &self.nfvs,
            WorkerKind::Vf => &self.vfs,
            WorkerKind::Mirror => &self.mirrors,
            WorkerKind::Pcap => &self.pcaps,
        }
    }

    /// Mutable status subtree owned by one worker kind
    pub fn kind_mut(&mut self, kind: WorkerKind) -> &mut KindStatus {
        match kind {
            WorkerKind::Nfv => &mut self.nfvs,
            WorkerKind::Vf => &mut self.vfs,
            WorkerKind::Mirror => &mut self.mirrors,
            WorkerKind::Pcap => &mut self.pcaps,
        }
    }
}
