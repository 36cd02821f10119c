//! CRD generation and manifest parsing
//!
//! Exercises the public `Spp` type the way a user does: through the
//! generated CustomResourceDefinition and a YAML manifest.

use kube::CustomResourceExt;
use spp_operator::crd::{
    AppAttachment, CaptureState, ClassifierType, Spp, SppStatus, VlanOperation, WorkerId,
    WorkerKind,
};

const MANIFEST: &str = r#"
apiVersion: spp.dev/v1
kind: Spp
metadata:
  name: spp-a
  namespace: default
spec:
  ctl:
    name: ctl
    image: spp-ctl:latest
  primary:
    name: primary
    image: spp:latest
    portMask: "0x03"
    eal:
      lcores: "1"
      socketMem: "1024"
      vdevs:
        - ["net_tap1", "iface=foo1"]
  nfvs:
    - name: nfv:1
      image: spp:latest
      eal:
        lcores: "1,2"
      resources: ["phy:0", "ring:0"]
      patches:
        - src: phy:0
          dst: ring:0
  vfs:
    - name: vf:2
      image: spp:latest
      eal:
        lcores: "2-5"
      components:
        - name: cls
          core: 3
          type: classifier
          rxPort:
            - port: ring:0
          txPort:
            - port: ring:1
              vlan:
                operation: add
                id: 100
                pcp: 0
      classifierTable:
        - type: vlan
          macAddress: fa:16:3e:00:00:01
          vlan: 100
          port: ring:1
  mirrors:
    - name: mirror:3
      image: spp:latest
      eal:
        lcores: "6,7"
  pcaps:
    - name: pcap:4
      image: spp:latest
      eal:
        lcores: "8,9"
      port: phy:0
      outDir: /tmp:/var/spp
      status: running
  apps:
    - name: testpmd:1
      image: dpdk:latest
      eal:
        lcores: "10,11"
      command: ["testpmd"]
      args: ["-i"]
"#;

// =============================================================================
// CRD generation
// =============================================================================

/// Story: the generated CRD registers `spps.spp.dev` with a status subresource
#[test]
fn story_crd_is_namespaced_with_status_subresource() {
    let crd = Spp::crd();
    assert_eq!(crd.metadata.name.as_deref(), Some("spps.spp.dev"));
    assert_eq!(crd.spec.group, "spp.dev");
    assert_eq!(crd.spec.names.kind, "Spp");
    assert_eq!(crd.spec.scope, "Namespaced");

    let version = &crd.spec.versions[0];
    assert_eq!(version.name, "v1");
    assert!(version
        .subresources
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .is_some());
    let columns: Vec<&str> = version
        .additional_printer_columns
        .iter()
        .flatten()
        .map(|c| c.name.as_str())
        .collect();
    assert!(columns.contains(&"Phase"));
    assert!(columns.contains(&"VIP"));
}

#[test]
fn test_crd_serializes_to_yaml() {
    let yaml = serde_yaml::to_string(&Spp::crd()).unwrap();
    assert!(yaml.contains("spps.spp.dev"));
    assert!(yaml.contains("classifierTable"));
}

/// Story: condition timestamps are published as RFC 3339 strings
#[test]
fn story_condition_time_is_a_date_time_string() {
    let crd = serde_json::to_value(Spp::crd()).unwrap();
    let time = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["status"]
        ["properties"]["conditions"]["items"]["properties"]["lastTransitionTime"];
    assert_eq!(time["type"], "string");
    assert_eq!(time["format"], "date-time");
}

// =============================================================================
// Manifests
// =============================================================================

/// Story: a full manifest parses into typed identities and settings
#[test]
fn story_manifest_parses_into_typed_spec() {
    let spp: Spp = serde_yaml::from_str(MANIFEST).unwrap();
    spp.spec.validate().unwrap();

    assert_eq!(
        spp.spec.worker_ids(WorkerKind::Nfv),
        vec![WorkerId::new("nfv", 1)]
    );
    assert_eq!(spp.spec.primary.eal.vdevs[0].join(","), "net_tap1,iface=foo1");

    let vf = &spp.spec.vfs[0];
    let tx = &vf.components[0].tx_port[0];
    assert_eq!(tx.vlan.as_ref().map(|v| v.operation), Some(VlanOperation::Add));
    assert_eq!(vf.classifier_table[0].type_, ClassifierType::Vlan);
    assert_eq!(vf.classifier_table[0].vlan, Some(100));

    assert!(spp.spec.mirrors[0].components.is_empty());
    assert_eq!(spp.spec.pcaps[0].status, CaptureState::Running);
    assert_eq!(spp.spec.apps[0].type_, AppAttachment::Pipe);
}

/// Story: a malformed worker identity is rejected at the serde boundary
#[test]
fn story_malformed_worker_name_is_rejected() {
    let manifest = MANIFEST.replace("name: nfv:1", "name: nfv-one");
    let err = serde_yaml::from_str::<Spp>(&manifest).unwrap_err();
    assert!(err.to_string().contains("name:secondaryId"));
}

/// Story: stored status reads back with identity-keyed worker maps
#[test]
fn story_status_round_trips_through_json() {
    let json = serde_json::json!({
        "phase": "Converging",
        "node": "worker-0",
        "serviceVip": "10.96.0.10",
        "ctl": {"pod": {"name": "spp-a-ctl", "phase": "Running"}, "status": "1/1"},
        "nfvs": {
            "workers": {"nfv:1": {"pod": {"name": "spp-a-nfv-nfv-1", "phase": "Running"}, "phase": "Ready"}},
            "status": "1/1"
        }
    });

    let status: SppStatus = serde_json::from_value(json).unwrap();
    assert!(status.ctl.is_ready());
    assert!(!status.primary.is_ready());
    assert_eq!(status.nfvs.ready_ids(), vec![&WorkerId::new("nfv", 1)]);
    assert_eq!(status.vfs.status, "0/0");

    let back = serde_json::to_value(&status).unwrap();
    assert_eq!(back["nfvs"]["workers"]["nfv:1"]["phase"], "Ready");
}
