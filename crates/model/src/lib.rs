mod errors;

use std::collections::{BTreeMap, BTreeSet};

use semver::Version;
use serde::{Deserialize, Serialize};

use properties::Property;

pub use errors::{ValidateError, ValidateErrors};

/// A validated catalog: packages by name, each owning its channels, each
/// owning its bundles. Bundles carry name-typed back-references to their
/// package and channel; ownership lives solely in the maps.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Model(pub BTreeMap<String, Package>);

impl std::ops::Deref for Model {
    type Target = BTreeMap<String, Package>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl std::ops::DerefMut for Model {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Model {
    /// Check every invariant of every package, surfacing all violations.
    pub fn validate(&self) -> Result<(), ValidateErrors> {
        let mut errors = Vec::new();
        for package in self.0.values() {
            package.validate_into(&mut errors);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidateErrors(errors))
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    pub description: String,
    pub icon: Option<Icon>,
    pub default_channel: String,
    pub channels: BTreeMap<String, Channel>,
    pub properties: Vec<Property>,
    pub deprecation: Option<Deprecation>,
}

/// Package icon, carried opaquely as base64 bytes plus a media type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    #[serde(rename = "base64data")]
    pub base64_data: String,
    #[serde(rename = "mediatype")]
    pub media_type: String,
}

/// A secondary image reference declared by a bundle.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RelatedImage {
    #[serde(default)]
    pub name: String,
    pub image: String,
}

/// A deprecation notice attached to a package, channel, or bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deprecation {
    pub message: String,
}

impl Package {
    fn validate_into(&self, errors: &mut Vec<ValidateError>) {
        if self.name.is_empty() {
            errors.push(ValidateError::EmptyPackageName);
        }
        if let Some(icon) = &self.icon {
            if icon.base64_data.is_empty() || icon.media_type.is_empty() {
                errors.push(ValidateError::InvalidIcon {
                    package: self.name.clone(),
                });
            }
        }
        if self.channels.is_empty() {
            errors.push(ValidateError::NoChannels {
                package: self.name.clone(),
            });
        }
        if self.default_channel.is_empty() {
            errors.push(ValidateError::DefaultChannelEmpty {
                package: self.name.clone(),
            });
        } else if !self.channels.contains_key(&self.default_channel) {
            errors.push(ValidateError::DefaultChannelNotFound {
                package: self.name.clone(),
                channel: self.default_channel.clone(),
            });
        }
        for (name, channel) in &self.channels {
            if channel.package != self.name {
                errors.push(ValidateError::ChannelPackageMismatch {
                    package: self.name.clone(),
                    channel: name.clone(),
                    actual: channel.package.clone(),
                });
            }
            channel.validate_into(errors);
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Channel {
    /// Name of the owning package; a lookup aid, not ownership.
    pub package: String,
    pub name: String,
    pub bundles: BTreeMap<String, Bundle>,
    pub deprecation: Option<Deprecation>,
}

impl Channel {
    /// The unique bundle of this channel which no other entry replaces or
    /// skips.
    pub fn head(&self) -> Result<&Bundle, ValidateError> {
        let mut incoming: BTreeSet<&str> = BTreeSet::new();
        for bundle in self.bundles.values() {
            if !bundle.replaces.is_empty() {
                incoming.insert(bundle.replaces.as_str());
            }
            for skip in &bundle.skips {
                incoming.insert(skip.as_str());
            }
        }
        let mut heads = self
            .bundles
            .values()
            .filter(|b| !incoming.contains(b.name.as_str()));

        let head = match heads.next() {
            None => {
                return Err(ValidateError::NoHead {
                    package: self.package.clone(),
                    channel: self.name.clone(),
                })
            }
            Some(head) => head,
        };
        let extra: Vec<String> = heads.map(|b| b.name.clone()).collect();
        if !extra.is_empty() {
            let mut all = vec![head.name.clone()];
            all.extend(extra);
            return Err(ValidateError::MultipleHeads {
                package: self.package.clone(),
                channel: self.name.clone(),
                heads: all,
            });
        }
        Ok(head)
    }

    // The replaces chain, walked from the head:
    //   1. exactly one head exists;
    //   2. the chain is acyclic;
    //   3. every entry is either on the chain or skipped by some entry;
    //   4. only the tail entry may replace a name absent from the channel.
    fn validate_replaces_chain(&self, errors: &mut Vec<ValidateError>) {
        let head = match self.head() {
            Ok(head) => head,
            Err(err) => {
                errors.push(err);
                return;
            }
        };

        let mut chain: Vec<String> = Vec::new();
        let mut on_chain: BTreeSet<&str> = BTreeSet::new();
        let mut cursor = Some(head);
        while let Some(bundle) = cursor {
            if on_chain.contains(bundle.name.as_str()) {
                chain.push(bundle.name.clone());
                errors.push(ValidateError::ReplacesCycle {
                    package: self.package.clone(),
                    channel: self.name.clone(),
                    chain,
                });
                return;
            }
            chain.push(bundle.name.clone());
            on_chain.insert(bundle.name.as_str());
            cursor = match bundle.replaces.as_str() {
                "" => None,
                replaces => self.bundles.get(replaces),
            };
        }

        let skipped: BTreeSet<&str> = self
            .bundles
            .values()
            .flat_map(|b| b.skips.iter().map(String::as_str))
            .collect();
        for name in self.bundles.keys() {
            if !on_chain.contains(name.as_str()) && !skipped.contains(name.as_str()) {
                errors.push(ValidateError::StrandedBundle {
                    package: self.package.clone(),
                    channel: self.name.clone(),
                    bundle: name.clone(),
                });
            }
        }
    }

    fn validate_into(&self, errors: &mut Vec<ValidateError>) {
        if self.name.is_empty() {
            errors.push(ValidateError::EmptyChannelName {
                package: self.package.clone(),
            });
        }
        if self.bundles.is_empty() {
            errors.push(ValidateError::EmptyChannel {
                package: self.package.clone(),
                channel: self.name.clone(),
            });
            return;
        }
        self.validate_replaces_chain(errors);
        for (name, bundle) in &self.bundles {
            if name.is_empty() {
                errors.push(ValidateError::EmptyBundleName {
                    package: self.package.clone(),
                    channel: self.name.clone(),
                });
            }
            if bundle.channel != self.name {
                errors.push(ValidateError::BundleChannelMismatch {
                    channel: self.name.clone(),
                    bundle: name.clone(),
                    actual: bundle.channel.clone(),
                });
            }
            if bundle.package != self.package {
                errors.push(ValidateError::BundlePackageMismatch {
                    package: self.package.clone(),
                    bundle: name.clone(),
                    actual: bundle.package.clone(),
                });
            }
            bundle.validate_into(errors);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    /// Name of the owning package; a lookup aid, not ownership.
    pub package: String,
    /// Name of the owning channel; a lookup aid, not ownership.
    pub channel: String,
    pub name: String,
    pub image: String,
    pub replaces: String,
    pub skips: Vec<String>,
    pub skip_range: String,
    pub properties: Vec<Property>,
    pub related_images: Vec<RelatedImage>,
    /// Raw object manifests carried by the bundle, if any.
    pub objects: Vec<String>,
    /// The designated cluster-service manifest, if any.
    pub csv_json: String,
    pub version: Version,
    pub deprecation: Option<Deprecation>,
}

impl Default for Bundle {
    fn default() -> Self {
        Self {
            package: String::new(),
            channel: String::new(),
            name: String::new(),
            image: String::new(),
            replaces: String::new(),
            skips: Vec::new(),
            skip_range: String::new(),
            properties: Vec::new(),
            related_images: Vec::new(),
            objects: Vec::new(),
            csv_json: String::new(),
            version: Version::new(0, 0, 0),
            deprecation: None,
        }
    }
}

impl Bundle {
    /// Parse this bundle's property list into its bucketed view.
    pub fn parsed_properties(&self) -> Result<properties::Properties, properties::Error> {
        properties::parse(&self.properties)
    }

    fn validate_into(&self, errors: &mut Vec<ValidateError>) {
        let parsed = match self.parsed_properties() {
            Ok(parsed) => parsed,
            Err(source) => {
                errors.push(ValidateError::InvalidProperty {
                    package: self.package.clone(),
                    bundle: self.name.clone(),
                    source,
                });
                return;
            }
        };

        if parsed.packages.len() != 1 {
            errors.push(ValidateError::PackagePropertyCount {
                package: self.package.clone(),
                bundle: self.name.clone(),
                count: parsed.packages.len(),
            });
        } else {
            let prop = &parsed.packages[0];
            if prop.package_name != self.package {
                errors.push(ValidateError::PackagePropertyForeign {
                    package: self.package.clone(),
                    bundle: self.name.clone(),
                    actual: prop.package_name.clone(),
                });
            }
            match Version::parse(&prop.version) {
                Err(source) => errors.push(ValidateError::InvalidVersion {
                    package: self.package.clone(),
                    bundle: self.name.clone(),
                    version: prop.version.clone(),
                    source,
                }),
                Ok(version) if version != self.version => {
                    errors.push(ValidateError::VersionMismatch {
                        package: self.package.clone(),
                        bundle: self.name.clone(),
                        property: prop.version.clone(),
                        version: self.version.to_string(),
                    })
                }
                Ok(_) => {}
            }
        }

        if parsed.channels.is_empty() {
            errors.push(ValidateError::NoChannelProperty {
                package: self.package.clone(),
                bundle: self.name.clone(),
            });
        } else if !parsed
            .channels
            .iter()
            .any(|c| c.name == self.channel && c.replaces == self.replaces)
        {
            errors.push(ValidateError::ChannelPropertyMismatch {
                package: self.package.clone(),
                bundle: self.name.clone(),
                channel: self.channel.clone(),
                replaces: self.replaces.clone(),
            });
        }

        for skip in &self.skips {
            if skip.is_empty() {
                errors.push(ValidateError::EmptySkipValue {
                    package: self.package.clone(),
                    bundle: self.name.clone(),
                });
            } else if *skip == self.name {
                errors.push(ValidateError::SkipsSelfReference {
                    package: self.package.clone(),
                    bundle: self.name.clone(),
                });
            }
        }

        if self.related_images.iter().any(|ri| ri.image.is_empty()) {
            errors.push(ValidateError::EmptyRelatedImage {
                package: self.package.clone(),
                bundle: self.name.clone(),
            });
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    pub fn test_bundle(package: &str, channel: &str, name: &str, version: &str) -> Bundle {
        let version = Version::parse(version).unwrap();
        Bundle {
            package: package.to_string(),
            channel: channel.to_string(),
            name: name.to_string(),
            image: format!("reg.test/{package}/{name}"),
            properties: vec![
                properties::build(&properties::Package {
                    package_name: package.to_string(),
                    version: version.to_string(),
                }),
                properties::build(&properties::Channel {
                    name: channel.to_string(),
                    replaces: String::new(),
                }),
            ],
            version,
            ..Default::default()
        }
    }

    fn with_replaces(mut bundle: Bundle, replaces: &str) -> Bundle {
        bundle.replaces = replaces.to_string();
        bundle.properties = vec![
            properties::build(&properties::Package {
                package_name: bundle.package.clone(),
                version: bundle.version.to_string(),
            }),
            properties::build(&properties::Channel {
                name: bundle.channel.clone(),
                replaces: replaces.to_string(),
            }),
        ];
        bundle
    }

    fn test_channel(package: &str, name: &str, bundles: Vec<Bundle>) -> Channel {
        Channel {
            package: package.to_string(),
            name: name.to_string(),
            bundles: bundles.into_iter().map(|b| (b.name.clone(), b)).collect(),
            deprecation: None,
        }
    }

    fn test_model() -> Model {
        let b1 = test_bundle("foo", "stable", "foo.v0.1.0", "0.1.0");
        let b2 = with_replaces(
            test_bundle("foo", "stable", "foo.v0.2.0", "0.2.0"),
            "foo.v0.1.0",
        );
        let channel = test_channel("foo", "stable", vec![b1, b2]);
        let package = Package {
            name: "foo".to_string(),
            default_channel: "stable".to_string(),
            channels: [("stable".to_string(), channel)].into_iter().collect(),
            ..Default::default()
        };
        Model([("foo".to_string(), package)].into_iter().collect())
    }

    #[test]
    fn test_valid_model() {
        test_model().validate().unwrap();
    }

    #[test]
    fn test_head_is_unique() {
        let model = test_model();
        let head = model["foo"].channels["stable"].head().unwrap();
        assert_eq!(head.name, "foo.v0.2.0");
    }

    #[test]
    fn test_no_head_detected() {
        // Two bundles which replace each other have no head.
        let b1 = with_replaces(
            test_bundle("foo", "stable", "foo.v0.1.0", "0.1.0"),
            "foo.v0.2.0",
        );
        let b2 = with_replaces(
            test_bundle("foo", "stable", "foo.v0.2.0", "0.2.0"),
            "foo.v0.1.0",
        );
        let channel = test_channel("foo", "stable", vec![b1, b2]);
        assert!(matches!(channel.head(), Err(ValidateError::NoHead { .. })));
    }

    #[test]
    fn test_multiple_heads_detected() {
        let b1 = test_bundle("foo", "stable", "foo.v0.1.0", "0.1.0");
        let b2 = test_bundle("foo", "stable", "foo.v0.2.0", "0.2.0");
        let channel = test_channel("foo", "stable", vec![b1, b2]);
        match channel.head() {
            Err(ValidateError::MultipleHeads { heads, .. }) => {
                assert_eq!(heads, vec!["foo.v0.1.0", "foo.v0.2.0"]);
            }
            other => panic!("expected multiple heads, got {other:?}"),
        }
    }

    #[test]
    fn test_skipped_entry_is_not_stranded() {
        let b1 = test_bundle("foo", "stable", "foo.v0.1.0", "0.1.0");
        let mut b2 = with_replaces(
            test_bundle("foo", "stable", "foo.v0.2.0", "0.2.0"),
            "foo.v0.1.0",
        );
        // v0.1.1 is not on the replaces chain, but v0.2.0 skips it.
        let b3 = test_bundle("foo", "stable", "foo.v0.1.1", "0.1.1");
        b2.skips = vec!["foo.v0.1.1".to_string()];

        let mut model = test_model();
        let channel = test_channel("foo", "stable", vec![b1, b2, b3]);
        model
            .get_mut("foo")
            .unwrap()
            .channels
            .insert("stable".to_string(), channel);
        model.validate().unwrap();
    }

    #[test]
    fn test_stranded_bundle_detected() {
        let mut model = test_model();
        // Two strays referencing each other: neither is a head, neither is
        // reachable from the head, and neither is skipped.
        let s1 = with_replaces(
            test_bundle("foo", "stable", "foo.v0.0.9", "0.0.9"),
            "foo.v0.0.8",
        );
        let s2 = with_replaces(
            test_bundle("foo", "stable", "foo.v0.0.8", "0.0.8"),
            "foo.v0.0.9",
        );
        let channel = model
            .get_mut("foo")
            .unwrap()
            .channels
            .get_mut("stable")
            .unwrap();
        channel.bundles.insert(s1.name.clone(), s1);
        channel.bundles.insert(s2.name.clone(), s2);

        let errors = model.validate().unwrap_err();
        for stray in ["foo.v0.0.8", "foo.v0.0.9"] {
            assert!(errors.0.iter().any(|e| matches!(
                e,
                ValidateError::StrandedBundle { bundle, .. } if bundle == stray
            )));
        }
    }

    #[test]
    fn test_replaces_cycle_detected() {
        // a (head) -> b -> c -> b is a cycle behind a unique head.
        let a = with_replaces(test_bundle("foo", "stable", "a", "0.3.0"), "b");
        let b = with_replaces(test_bundle("foo", "stable", "b", "0.2.0"), "c");
        let c = with_replaces(test_bundle("foo", "stable", "c", "0.1.0"), "b");

        let channel = test_channel("foo", "stable", vec![a, b, c]);
        let mut errors = Vec::new();
        channel.validate_replaces_chain(&mut errors);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidateError::ReplacesCycle { chain, .. } if chain == &["a", "b", "c", "b"])));
    }

    #[test]
    fn test_dangling_tail_replaces_is_allowed() {
        // The tail of the chain may replace an entry absent from the channel.
        let only = with_replaces(
            test_bundle("foo", "stable", "foo.v0.2.0", "0.2.0"),
            "foo.v0.1.0",
        );
        let channel = test_channel("foo", "stable", vec![only]);
        let mut errors = Vec::new();
        channel.validate_into(&mut errors);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn test_default_channel_must_exist() {
        let mut model = test_model();
        model.get_mut("foo").unwrap().default_channel = "alpha".to_string();
        let errors = model.validate().unwrap_err();
        assert!(errors.0.iter().any(|e| matches!(
            e,
            ValidateError::DefaultChannelNotFound { channel, .. } if channel == "alpha"
        )));
    }

    #[test]
    fn test_bundle_requires_matching_package_property() {
        let mut model = test_model();
        {
            let bundle = model
                .get_mut("foo")
                .unwrap()
                .channels
                .get_mut("stable")
                .unwrap()
                .bundles
                .get_mut("foo.v0.1.0")
                .unwrap();
            bundle.properties[0] = properties::build(&properties::Package {
                package_name: "bar".to_string(),
                version: "0.1.0".to_string(),
            });
        }
        let errors = model.validate().unwrap_err();
        assert!(errors.0.iter().any(|e| matches!(
            e,
            ValidateError::PackagePropertyForeign { actual, .. } if actual == "bar"
        )));
    }

    #[test]
    fn test_bundle_requires_channel_property() {
        let mut model = test_model();
        {
            let bundle = model
                .get_mut("foo")
                .unwrap()
                .channels
                .get_mut("stable")
                .unwrap()
                .bundles
                .get_mut("foo.v0.1.0")
                .unwrap();
            bundle.properties.truncate(1); // drop the channel property
        }
        let errors = model.validate().unwrap_err();
        assert!(errors
            .0
            .iter()
            .any(|e| matches!(e, ValidateError::NoChannelProperty { bundle, .. } if bundle == "foo.v0.1.0")));
    }

    #[test]
    fn test_errors_aggregate() {
        let mut model = test_model();
        let package = model.get_mut("foo").unwrap();
        package.default_channel = "missing".to_string();
        package
            .channels
            .get_mut("stable")
            .unwrap()
            .bundles
            .get_mut("foo.v0.1.0")
            .unwrap()
            .skips = vec!["foo.v0.1.0".to_string()];

        let errors = model.validate().unwrap_err();
        assert_eq!(errors.0.len(), 2);
        let message = errors.to_string();
        assert!(message.contains("default channel"));
        assert!(message.contains("skips itself"));
    }
}
