//! Custom Resource Definitions for the SPP operator
//!
//! This module contains the `Spp` CRD and the types it is built from.

mod identity;
mod spp;
mod types;

pub use identity::WorkerId;
pub use spp::{Spp, SppSpec, SppStatus, MAX_EVENTS};
pub use types::{
    AppAttachment, AppSpec, AppsStatus, CaptureState, ClassifierEntrySpec, ClassifierType,
    ComponentSpec, Condition, ConditionStatus, CtlSpec, EalSpec, KindStatus, MirrorSpec, NfvSpec,
    ObservedSummary, PatchSpec, PcapSpec, PodRef, PortSpec, PrimarySpec, RoleStatus, SppPhase,
    VfSpec, VlanOperation, VlanSpec, WorkerKind, WorkerPhase, WorkerStatus,
};
