//! Worker node selection
//!
//! Every pod of one Spp runs on a single node. The node is picked once and
//! recorded in status. Selection reads the node and Spp lists without any
//! claim step, so two Spps reconciling at the same moment can pick the same
//! node.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

use crate::crd::Spp;

/// Labels that mark a node as part of the control plane
pub const CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Whether the node carries a control-plane role label
pub fn is_control_plane(node: &Node) -> bool {
    let labels = node.labels();
    CONTROL_PLANE_LABELS.iter().any(|l| labels.contains_key(*l))
}

/// First worker node not already recorded by another Spp
///
/// `namespace`/`name` identify the Spp selecting; its own recorded node (if
/// any) does not count as taken.
pub fn select_worker_node(
    nodes: &[Node],
    spps: &[Spp],
    namespace: &str,
    name: &str,
) -> Option<String> {
    let taken: BTreeSet<&str> = spps
        .iter()
        .filter(|s| !(s.namespace().as_deref() == Some(namespace) && s.name_any() == name))
        .filter_map(|s| s.status.as_ref()?.node.as_deref())
        .collect();

    nodes
        .iter()
        .filter(|n| !is_control_plane(n))
        .map(|n| n.name_any())
        .find(|n| !taken.contains(n.as_str()))
}
