//! Worker identity
//!
//! Workers are named `name:secondaryId` in the custom resource (`nfv:1`,
//! `vf:2`, `testpmd:1`). The string is parsed once, at deserialization, into a
//! [`WorkerId`]; everything past the serde boundary works with the struct.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject, StringValidation};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Error;

/// Longest base name accepted, so generated pod names stay short
const MAX_NAME_LEN: usize = 40;

/// Identity of one worker instance: base name plus secondary id.
///
/// Ordering is by name, then by secondary id, which keeps status maps stable.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId {
    /// Base name, e.g. `nfv`
    pub name: String,
    /// Secondary process id registered with the primary switch
    pub sec_id: u32,
}

impl WorkerId {
    /// Create an identity from its parts
    pub fn new(name: impl Into<String>, sec_id: u32) -> Self {
        Self {
            name: name.into(),
            sec_id,
        }
    }

    /// Name fragment used for Kubernetes object names, e.g. `nfv-1`
    pub fn object_suffix(&self) -> String {
        format!("{}-{}", self.name, self.sec_id)
    }

    /// Whether the base name is a DNS-1123 label and can appear in pod names
    pub fn has_object_name(&self) -> bool {
        let bytes = self.name.as_bytes();
        let edge_ok = |b: Option<&u8>| b.is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
        bytes.len() <= MAX_NAME_LEN
            && edge_ok(bytes.first())
            && edge_ok(bytes.last())
            && bytes
                .iter()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.sec_id)
    }
}

impl FromStr for WorkerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, sec_id) = s.rsplit_once(':').ok_or_else(|| {
            Error::malformed(format!(
                "worker name '{s}' must have the form name:secondaryId"
            ))
        })?;
        if name.is_empty() {
            return Err(Error::malformed(format!("worker name '{s}' has an empty name")));
        }
        let sec_id = sec_id.parse::<u32>().map_err(|_| {
            Error::malformed(format!(
                "worker name '{s}' has a non-numeric secondary id '{sec_id}'"
            ))
        })?;
        Ok(Self::new(name, sec_id))
    }
}

impl Serialize for WorkerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WorkerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Cow::<str>::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for WorkerId {
    fn schema_name() -> String {
        "WorkerId".to_string()
    }

    fn json_schema(_gen: &mut SchemaGenerator) -> Schema {
        SchemaObject {
            instance_type: Some(InstanceType::String.into()),
            string: Some(Box::new(StringValidation {
                pattern: Some(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?:[0-9]+$".to_string()),
                ..Default::default()
            })),
            ..Default::default()
        }
        .into()
    }
}
