use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A typed property payload which knows the `type` discriminator it is
/// stored under. Building a [crate::Property] from one of these always
/// produces the canonical key-sorted JSON encoding.
pub trait TypedValue: Serialize {
    const TYPE: &'static str;
}

/// Identity of a bundle within its package, under SemVer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub package_name: String,
    pub version: String,
}

impl TypedValue for Package {
    const TYPE: &'static str = crate::TYPE_PACKAGE;
}

/// Dependency on another package, constrained by a version predicate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct PackageRequired {
    pub package_name: String,
    pub version_range: String,
}

impl TypedValue for PackageRequired {
    const TYPE: &'static str = crate::TYPE_PACKAGE_REQUIRED;
}

/// A group/version/kind capability provided by a bundle.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GVK {
    pub group: String,
    pub kind: String,
    pub version: String,
}

impl TypedValue for GVK {
    const TYPE: &'static str = crate::TYPE_GVK;
}

/// A group/version/kind capability required by a bundle.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GVKRequired {
    pub group: String,
    pub kind: String,
    pub version: String,
}

impl TypedValue for GVKRequired {
    const TYPE: &'static str = crate::TYPE_GVK_REQUIRED;
}

/// Channel membership of a bundle. These are a projection of the channel
/// records of the catalog, never an independent source of truth.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Channel {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replaces: String,
}

impl TypedValue for Channel {
    const TYPE: &'static str = crate::TYPE_CHANNEL;
}

/// Names of entries superseded by this bundle. The payload is a bare string.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Skips(pub String);

impl TypedValue for Skips {
    const TYPE: &'static str = crate::TYPE_SKIPS;
}

/// Version predicate naming the range of versions this bundle skips over.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SkipRange(pub String);

impl TypedValue for SkipRange {
    const TYPE: &'static str = crate::TYPE_SKIP_RANGE;
}

/// An embedded raw manifest blob, carried as base64 bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BundleObject {
    pub data: String,
}

impl BundleObject {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            data: base64::encode(data),
        }
    }

    pub fn decoded(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::decode(&self.data)
    }
}

impl TypedValue for BundleObject {
    const TYPE: &'static str = crate::TYPE_BUNDLE_OBJECT;
}

/// Structured cluster-service metadata, the successor to embedding the
/// entire cluster-service manifest as a bundle object.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CSVMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub api_service_definitions: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub crd_descriptions: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub install_modes: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub links: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub maintainers: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub maturity: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub min_kube_version: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub native_apis: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub provider: Value,
}

impl TypedValue for CSVMetadata {
    const TYPE: &'static str = crate::TYPE_CSV_METADATA;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bundle_object_round_trip() {
        let obj = BundleObject::from_bytes(b"{\"kind\":\"ConfigMap\"}");
        assert_eq!(obj.decoded().unwrap(), b"{\"kind\":\"ConfigMap\"}");
    }

    #[test]
    fn test_channel_omits_empty_replaces() {
        let prop = crate::build(&Channel {
            name: "stable".to_string(),
            replaces: String::new(),
        });
        assert_eq!(prop.value.as_str(), r#"{"name":"stable"}"#);
    }
}
