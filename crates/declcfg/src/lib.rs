mod convert;
mod load;
mod merge;
mod normalize;
mod write;

use serde::{Deserialize, Serialize};

use properties::{Payload, Property};

pub use convert::{convert_from_model, convert_to_model, ConvertError, ConvertErrors};
pub use load::{load_fs, load_reader, load_slice, LoadError};
pub use merge::{merge, MergePolicy};
pub use model::{Icon, RelatedImage};
pub use normalize::normalize;
pub use write::{organize_by_package, sort_by_package, write_json, write_yaml, WriteError};

pub const SCHEMA_PACKAGE: &str = "olm.package";
pub const SCHEMA_CHANNEL: &str = "olm.channel";
pub const SCHEMA_BUNDLE: &str = "olm.bundle";
pub const SCHEMA_DEPRECATIONS: &str = "olm.deprecations";

/// The flat, append-only document set of a catalog. Buckets hold records in
/// input order until explicitly sorted; unknown schemas pass through
/// verbatim in `others`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DeclarativeConfig {
    pub packages: Vec<Package>,
    pub channels: Vec<Channel>,
    pub bundles: Vec<Bundle>,
    pub deprecations: Vec<Deprecation>,
    pub others: Vec<Meta>,
}

impl DeclarativeConfig {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
            && self.channels.is_empty()
            && self.bundles.is_empty()
            && self.deprecations.is_empty()
            && self.others.is_empty()
    }

    /// Concatenate another config's buckets onto this one.
    pub fn extend(&mut self, other: DeclarativeConfig) {
        self.packages.extend(other.packages);
        self.channels.extend(other.channels);
        self.bundles.extend(other.bundles);
        self.deprecations.extend(other.deprecations);
        self.others.extend(other.others);
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Package {
    pub schema: String,
    pub name: String,
    #[serde(
        default,
        rename = "defaultChannel",
        skip_serializing_if = "String::is_empty"
    )]
    pub default_channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Channel {
    pub schema: String,
    pub name: String,
    pub package: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<ChannelEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ChannelEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replaces: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skips: Vec<String>,
    #[serde(
        default,
        rename = "skipRange",
        skip_serializing_if = "String::is_empty"
    )]
    pub skip_range: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Bundle {
    pub schema: String,
    pub name: String,
    pub package: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
    #[serde(
        default,
        rename = "relatedImages",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub related_images: Vec<RelatedImage>,

    // Raw object manifests and the designated cluster-service manifest are
    // carried on the wire as olm.bundle.object properties; these fields are
    // their decoded view and never serialize directly.
    #[serde(skip)]
    pub objects: Vec<String>,
    #[serde(skip)]
    pub csv_json: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Deprecation {
    pub schema: String,
    pub package: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<DeprecationEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DeprecationEntry {
    pub reference: PackageScopedReference,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PackageScopedReference {
    pub schema: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// A record of unknown schema, stored verbatim. Round-trips byte-for-byte
/// (modulo newline stripping of the raw payload).
#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    pub schema: String,
    pub package: String,
    pub name: String,
    pub blob: Payload,
}

impl Serialize for Meta {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.blob.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Meta {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Fields {
            schema: String,
            #[serde(default)]
            package: String,
            #[serde(default)]
            name: String,
        }

        let blob = Payload::deserialize(deserializer)?;
        let fields: Fields = serde_json::from_str(blob.as_str()).map_err(serde::de::Error::custom)?;
        if fields.schema.is_empty() {
            return Err(serde::de::Error::custom("document has an empty schema"));
        }
        Ok(Meta {
            schema: fields.schema,
            package: fields.package,
            name: fields.name,
            blob,
        })
    }
}
