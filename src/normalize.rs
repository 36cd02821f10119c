//! Canonical forms of desired and observed data-plane entities
//!
//! Desired entities come from the `Spp` spec, observed entities from the
//! spp-ctl REST API. The two sides lay fields out differently (an unset VLAN
//! versus `{"operation":"none","id":0,"pcp":0}`, a VLAN classifier id held
//! in its own field versus packed into `vlanId/MAC`), so both are mapped
//! into the same canonical tuples before they are compared.
//!
//! Canonical types normalize to themselves, which makes normalization
//! idempotent. Malformed input is an error, never a default.

use crate::crd::{
    ClassifierEntrySpec, ClassifierType, ComponentSpec, PatchSpec, PortSpec, VlanOperation,
};
use crate::endpoint::{ClassifierInfo, ComponentInfo, PatchInfo, PortInfo};
use crate::Error;

/// Conversion into a canonical, comparable tuple
pub trait Normalize {
    /// The canonical form
    type Canonical;

    /// Produce the canonical form
    fn normalize(&self) -> Result<Self::Canonical, Error>;
}

/// Normalize every element, failing on the first malformed one
pub fn normalize_all<'a, T, I>(items: I) -> Result<Vec<T::Canonical>, Error>
where
    T: Normalize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    items.into_iter().map(Normalize::normalize).collect()
}

// =============================================================================
// Canonical tuples
// =============================================================================

/// VLAN attributes of a port; `{None, 0, 0}` means untagged
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CanonicalVlan {
    /// Tagging operation
    pub operation: VlanOperation,
    /// VLAN id
    pub id: u16,
    /// Priority code point
    pub pcp: u8,
}

impl CanonicalVlan {
    /// Build from raw attributes; id and pcp carry no meaning without an operation
    pub fn new(operation: VlanOperation, id: u16, pcp: u8) -> Self {
        match operation {
            VlanOperation::None => Self::default(),
            _ => Self { operation, id, pcp },
        }
    }

    /// Whether the port does anything with VLAN tags
    pub fn is_tagging(&self) -> bool {
        self.operation != VlanOperation::None
    }
}

/// A port attachment; identity is the port string, VLAN is an attribute
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CanonicalPort {
    /// Port identifier
    pub port: String,
    /// VLAN attributes
    pub vlan: CanonicalVlan,
}

impl CanonicalPort {
    /// Untagged port
    pub fn untagged(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            vlan: CanonicalVlan::default(),
        }
    }
}

/// Component identity: any field change is a different component
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CanonicalComponent {
    /// Component name
    pub name: String,
    /// Pinned core
    pub core: u32,
    /// Component type
    pub type_: String,
}

/// Classifier entry identity
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CanonicalClassifier {
    /// Match type
    pub match_type: ClassifierType,
    /// Destination MAC, uppercased (`default` kept as is)
    pub mac: String,
    /// VLAN id, present only for vlan entries
    pub vlan_id: Option<u16>,
    /// Target port
    pub port: String,
}

/// Patch identity
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CanonicalPatch {
    /// Source resource
    pub src: String,
    /// Destination resource
    pub dst: String,
}

impl std::fmt::Display for CanonicalPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

impl std::fmt::Display for CanonicalClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.vlan_id {
            Some(id) => write!(f, "{}/{}/{}->{}", self.match_type, id, self.mac, self.port),
            None => write!(f, "{}/{}->{}", self.match_type, self.mac, self.port),
        }
    }
}

impl std::fmt::Display for CanonicalComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}/{}", self.name, self.core, self.type_)
    }
}

fn canonical_mac(raw: &str) -> String {
    if raw.eq_ignore_ascii_case("default") {
        "default".to_string()
    } else {
        raw.trim().to_ascii_uppercase()
    }
}

// =============================================================================
// Ports
// =============================================================================

impl Normalize for PortSpec {
    type Canonical = CanonicalPort;

    fn normalize(&self) -> Result<CanonicalPort, Error> {
        let vlan = match &self.vlan {
            None => CanonicalVlan::default(),
            Some(v) => CanonicalVlan::new(v.operation, v.id, v.pcp),
        };
        Ok(CanonicalPort {
            port: self.port.clone(),
            vlan,
        })
    }
}

impl Normalize for PortInfo {
    type Canonical = CanonicalPort;

    fn normalize(&self) -> Result<CanonicalPort, Error> {
        let vlan = match &self.vlan {
            None => CanonicalVlan::default(),
            Some(v) => {
                let operation = v.operation.parse().map_err(|_| {
                    Error::malformed(format!(
                        "port {} reports unknown vlan operation '{}'",
                        self.port, v.operation
                    ))
                })?;
                CanonicalVlan::new(operation, v.id, v.pcp)
            }
        };
        Ok(CanonicalPort {
            port: self.port.clone(),
            vlan,
        })
    }
}

impl Normalize for CanonicalPort {
    type Canonical = CanonicalPort;

    fn normalize(&self) -> Result<CanonicalPort, Error> {
        Ok(self.clone())
    }
}

// =============================================================================
// Components
// =============================================================================

impl Normalize for ComponentSpec {
    type Canonical = CanonicalComponent;

    fn normalize(&self) -> Result<CanonicalComponent, Error> {
        Ok(CanonicalComponent {
            name: self.name.clone(),
            core: self.core,
            type_: self.type_.clone(),
        })
    }
}

impl Normalize for ComponentInfo {
    type Canonical = CanonicalComponent;

    fn normalize(&self) -> Result<CanonicalComponent, Error> {
        Ok(CanonicalComponent {
            name: self.name.clone(),
            core: self.core,
            type_: self.type_.clone(),
        })
    }
}

impl Normalize for CanonicalComponent {
    type Canonical = CanonicalComponent;

    fn normalize(&self) -> Result<CanonicalComponent, Error> {
        Ok(self.clone())
    }
}

// =============================================================================
// Classifier entries
// =============================================================================

impl Normalize for ClassifierEntrySpec {
    type Canonical = CanonicalClassifier;

    fn normalize(&self) -> Result<CanonicalClassifier, Error> {
        let vlan_id = match self.type_ {
            ClassifierType::Mac => None,
            ClassifierType::Vlan => Some(self.vlan.ok_or_else(|| {
                Error::malformed(format!(
                    "vlan classifier entry for {} -> {} has no vlan id",
                    self.mac_address, self.port
                ))
            })?),
        };
        Ok(CanonicalClassifier {
            match_type: self.type_,
            mac: canonical_mac(&self.mac_address),
            vlan_id,
            port: self.port.clone(),
        })
    }
}

impl Normalize for ClassifierInfo {
    type Canonical = CanonicalClassifier;

    fn normalize(&self) -> Result<CanonicalClassifier, Error> {
        match self.type_.as_str() {
            "mac" => Ok(CanonicalClassifier {
                match_type: ClassifierType::Mac,
                mac: canonical_mac(&self.value),
                vlan_id: None,
                port: self.port.clone(),
            }),
            "vlan" => {
                let (id, mac) = self.value.split_once('/').ok_or_else(|| {
                    Error::malformed(format!(
                        "vlan classifier value '{}' is not of the form vlanId/MAC",
                        self.value
                    ))
                })?;
                let id = id.trim().parse::<u16>().map_err(|_| {
                    Error::malformed(format!(
                        "vlan classifier value '{}' has no numeric id",
                        self.value
                    ))
                })?;
                if mac.trim().is_empty() {
                    return Err(Error::malformed(format!(
                        "vlan classifier value '{}' has no MAC",
                        self.value
                    )));
                }
                Ok(CanonicalClassifier {
                    match_type: ClassifierType::Vlan,
                    mac: canonical_mac(mac),
                    vlan_id: Some(id),
                    port: self.port.clone(),
                })
            }
            other => Err(Error::malformed(format!(
                "unknown classifier type '{other}' for {} -> {}",
                self.value, self.port
            ))),
        }
    }
}

impl Normalize for CanonicalClassifier {
    type Canonical = CanonicalClassifier;

    fn normalize(&self) -> Result<CanonicalClassifier, Error> {
        Ok(self.clone())
    }
}

// =============================================================================
// Patches
// =============================================================================

impl Normalize for PatchSpec {
    type Canonical = CanonicalPatch;

    fn normalize(&self) -> Result<CanonicalPatch, Error> {
        Ok(CanonicalPatch {
            src: self.src.clone(),
            dst: self.dst.clone(),
        })
    }
}

impl Normalize for PatchInfo {
    type Canonical = CanonicalPatch;

    fn normalize(&self) -> Result<CanonicalPatch, Error> {
        Ok(CanonicalPatch {
            src: self.src.clone(),
            dst: self.dst.clone(),
        })
    }
}

impl Normalize for CanonicalPatch {
    type Canonical = CanonicalPatch;

    fn normalize(&self) -> Result<CanonicalPatch, Error> {
        Ok(self.clone())
    }
}
