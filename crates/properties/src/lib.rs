mod payload;
mod types;

use std::collections::BTreeMap;
use std::sync::RwLock;

use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use payload::Payload;
pub use types::{
    BundleObject, CSVMetadata, Channel, GVKRequired, Package, PackageRequired, SkipRange, Skips,
    TypedValue, GVK,
};

pub const TYPE_PACKAGE: &str = "olm.package";
pub const TYPE_PACKAGE_REQUIRED: &str = "olm.package.required";
pub const TYPE_GVK: &str = "olm.gvk";
pub const TYPE_GVK_REQUIRED: &str = "olm.gvk.required";
pub const TYPE_CHANNEL: &str = "olm.channel";
pub const TYPE_SKIPS: &str = "olm.skips";
pub const TYPE_SKIP_RANGE: &str = "olm.skipRange";
pub const TYPE_BUNDLE_OBJECT: &str = "olm.bundle.object";
pub const TYPE_CSV_METADATA: &str = "olm.csv.metadata";

/// A single `(type, value)` pair attached to a bundle. The value is an
/// opaque JSON payload; `type` selects the schema it is validated against.
/// Unknown types are stored verbatim and survive round-trips.
///
/// Two properties are equal iff their types match and their payloads are
/// canonically equal.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Property {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: Payload,
}

impl Property {
    pub fn new(type_: impl Into<String>, value: Payload) -> Self {
        Self {
            type_: type_.into(),
            value,
        }
    }

    /// The canonical `(type, value)` identity of this property.
    pub fn canonical(&self) -> (String, String) {
        (self.type_.clone(), self.value.canonical())
    }

    pub fn is_object_type(&self) -> bool {
        self.type_ == TYPE_BUNDLE_OBJECT || self.type_ == TYPE_CSV_METADATA
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid property[{index}] of type {type_name:?}: invalid payload")]
    InvalidPayload {
        index: usize,
        type_name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("property type {type_name:?} is already registered")]
    AlreadyRegistered { type_name: String },
}

type ValidateFn = fn(&Payload) -> Result<(), serde_json::Error>;

fn validate_as<T: DeserializeOwned>(value: &Payload) -> Result<(), serde_json::Error> {
    serde_json::from_str::<T>(value.as_str()).map(|_| ())
}

lazy_static! {
    // Process-wide scheme of extension property types. Registered once at
    // startup; immutable afterwards.
    static ref SCHEME: RwLock<BTreeMap<String, ValidateFn>> = RwLock::new(BTreeMap::new());
}

/// Register an extension property type. Payloads of registered types are
/// validated during parse but still bucket into `Properties::others`,
/// preserving their verbatim encoding.
pub fn register<T: DeserializeOwned>(type_name: &str) -> Result<(), Error> {
    let mut scheme = SCHEME.write().unwrap();
    if scheme.contains_key(type_name) {
        return Err(Error::AlreadyRegistered {
            type_name: type_name.to_string(),
        });
    }
    scheme.insert(type_name.to_string(), validate_as::<T>);
    Ok(())
}

pub fn is_registered(type_name: &str) -> bool {
    SCHEME.read().unwrap().contains_key(type_name)
}

/// The bucketed view of a bundle's property list.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Properties {
    pub packages: Vec<Package>,
    pub packages_required: Vec<PackageRequired>,
    pub gvks: Vec<GVK>,
    pub gvks_required: Vec<GVKRequired>,
    pub channels: Vec<Channel>,
    pub skips: Vec<Skips>,
    pub skip_ranges: Vec<SkipRange>,
    pub bundle_objects: Vec<BundleObject>,
    pub csv_metadatas: Vec<CSVMetadata>,
    pub others: Vec<Property>,
}

/// Deserialize each property payload into the bucketed view. Unknown types
/// accumulate in `others`; malformed payloads of known (or registered)
/// types fail.
pub fn parse(properties: &[Property]) -> Result<Properties, Error> {
    let mut out = Properties::default();

    for (index, prop) in properties.iter().enumerate() {
        let invalid = |source| Error::InvalidPayload {
            index,
            type_name: prop.type_.clone(),
            source,
        };
        match prop.type_.as_str() {
            TYPE_PACKAGE => out
                .packages
                .push(serde_json::from_str(prop.value.as_str()).map_err(invalid)?),
            TYPE_PACKAGE_REQUIRED => out
                .packages_required
                .push(serde_json::from_str(prop.value.as_str()).map_err(invalid)?),
            TYPE_GVK => out
                .gvks
                .push(serde_json::from_str(prop.value.as_str()).map_err(invalid)?),
            TYPE_GVK_REQUIRED => out
                .gvks_required
                .push(serde_json::from_str(prop.value.as_str()).map_err(invalid)?),
            TYPE_CHANNEL => out
                .channels
                .push(serde_json::from_str(prop.value.as_str()).map_err(invalid)?),
            TYPE_SKIPS => out
                .skips
                .push(serde_json::from_str(prop.value.as_str()).map_err(invalid)?),
            TYPE_SKIP_RANGE => out
                .skip_ranges
                .push(serde_json::from_str(prop.value.as_str()).map_err(invalid)?),
            TYPE_BUNDLE_OBJECT => out
                .bundle_objects
                .push(serde_json::from_str(prop.value.as_str()).map_err(invalid)?),
            TYPE_CSV_METADATA => out
                .csv_metadatas
                .push(serde_json::from_str(prop.value.as_str()).map_err(invalid)?),
            other => {
                if let Some(validate) = SCHEME.read().unwrap().get(other) {
                    validate(&prop.value).map_err(invalid)?;
                }
                out.others.push(prop.clone());
            }
        }
    }
    Ok(out)
}

/// Produce the canonical `(type, JSON-bytes)` pair for a typed value.
/// Serialization round-trips through serde_json's key-sorted maps, so the
/// emitted payload is canonical regardless of struct field order.
pub fn build<T: TypedValue>(value: &T) -> Property {
    let value = serde_json::to_value(value).expect("typed property values always serialize");
    Property::new(T::TYPE, Payload::from_value(&value))
}

/// Collapse properties which are equal under the canonical `(type, value)`
/// identity, keeping first occurrences in order.
pub fn deduplicate(properties: Vec<Property>) -> Vec<Property> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::with_capacity(properties.len());
    for prop in properties {
        if seen.insert(prop.canonical()) {
            out.push(prop);
        }
    }
    out
}
