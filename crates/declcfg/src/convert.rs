use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use semver::Version;

use crate::normalize::normalize_bundle;
use crate::{
    Bundle, Channel, ChannelEntry, DeclarativeConfig, Deprecation, DeprecationEntry, Package,
    PackageScopedReference, SCHEMA_BUNDLE, SCHEMA_CHANNEL, SCHEMA_DEPRECATIONS, SCHEMA_PACKAGE,
};

#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    #[error("duplicate package {package:?}")]
    DuplicatePackage { package: String },
    #[error("duplicate channel {package:?}/{channel:?}")]
    DuplicateChannel { package: String, channel: String },
    #[error("channel {channel:?} references unknown package {package:?}")]
    ChannelUnknownPackage { package: String, channel: String },
    #[error("channel {package:?}/{channel:?} has a duplicate entry {entry:?}")]
    DuplicateEntry {
        package: String,
        channel: String,
        entry: String,
    },
    #[error("channel {package:?}/{channel:?} entry {entry:?} references unknown bundle")]
    EntryUnknownBundle {
        package: String,
        channel: String,
        entry: String,
    },
    #[error("bundle {bundle:?} references unknown package {package:?}")]
    BundleUnknownPackage { package: String, bundle: String },
    #[error("duplicate bundle {package:?}/{bundle:?}")]
    DuplicateBundle { package: String, bundle: String },
    #[error("bundle {package:?}/{bundle:?}: {source}")]
    Property {
        package: String,
        bundle: String,
        #[source]
        source: properties::Error,
    },
    #[error("bundle {package:?}/{bundle:?} has a channel property for {channel:?} (replaces {replaces:?}) with no matching channel entry")]
    ChannelPropertyNoEntry {
        package: String,
        bundle: String,
        channel: String,
        replaces: String,
    },
    #[error("bundle {package:?}/{bundle:?} is not present in any channel")]
    NotInAnyChannel { package: String, bundle: String },
    #[error("deprecations for unknown package {package:?}")]
    DeprecationUnknownPackage { package: String },
    #[error("multiple deprecation records for package {package:?}")]
    DuplicateDeprecation { package: String },
    #[error("package {package:?} deprecates {schema:?} {name:?} more than once")]
    DuplicateDeprecationReference {
        package: String,
        schema: String,
        name: String,
    },
    #[error("package {package:?} deprecation references foreign package {name:?}")]
    DeprecationForeignPackage { package: String, name: String },
    #[error("package {package:?} deprecation references unknown {schema:?} {name:?}")]
    DeprecationUnknownReference {
        package: String,
        schema: String,
        name: String,
    },
    #[error("package {package:?} deprecation has unsupported reference schema {schema:?}")]
    DeprecationUnsupportedSchema { package: String, schema: String },
    #[error(transparent)]
    Validate(model::ValidateError),
}

/// Every error raised while projecting a config into a model, at once.
#[derive(Debug)]
pub struct ConvertErrors(pub Vec<ConvertError>);

impl fmt::Display for ConvertErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid declarative config:")?;
        for err in &self.0 {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConvertErrors {}

/// Project a config into the strict model, enforcing referential
/// invariants. Unknown-schema records do not participate in the model and
/// are ignored here; they survive only in the config representation.
pub fn convert_to_model(cfg: &DeclarativeConfig) -> Result<model::Model, ConvertErrors> {
    let mut errors: Vec<ConvertError> = Vec::new();
    let mut packages: BTreeMap<String, model::Package> = BTreeMap::new();

    for p in &cfg.packages {
        if packages.contains_key(&p.name) {
            errors.push(ConvertError::DuplicatePackage {
                package: p.name.clone(),
            });
            continue;
        }
        packages.insert(
            p.name.clone(),
            model::Package {
                name: p.name.clone(),
                description: p.description.clone(),
                icon: p.icon.clone(),
                default_channel: p.default_channel.clone(),
                channels: BTreeMap::new(),
                properties: p.properties.clone(),
                deprecation: None,
            },
        );
    }

    for c in &cfg.channels {
        let package = match packages.get_mut(&c.package) {
            Some(package) => package,
            None => {
                errors.push(ConvertError::ChannelUnknownPackage {
                    package: c.package.clone(),
                    channel: c.name.clone(),
                });
                continue;
            }
        };
        if package.channels.contains_key(&c.name) {
            errors.push(ConvertError::DuplicateChannel {
                package: c.package.clone(),
                channel: c.name.clone(),
            });
            continue;
        }
        let mut seen = BTreeSet::new();
        for entry in &c.entries {
            if !seen.insert(entry.name.as_str()) {
                errors.push(ConvertError::DuplicateEntry {
                    package: c.package.clone(),
                    channel: c.name.clone(),
                    entry: entry.name.clone(),
                });
            }
        }
        package.channels.insert(
            c.name.clone(),
            model::Channel {
                package: c.package.clone(),
                name: c.name.clone(),
                bundles: BTreeMap::new(),
                deprecation: None,
            },
        );
    }

    let mut bundle_keys: BTreeSet<(&str, &str)> = BTreeSet::new();
    for b in &cfg.bundles {
        if !bundle_keys.insert((b.package.as_str(), b.name.as_str())) {
            errors.push(ConvertError::DuplicateBundle {
                package: b.package.clone(),
                bundle: b.name.clone(),
            });
            continue;
        }
        let package = match packages.get_mut(&b.package) {
            Some(package) => package,
            None => {
                errors.push(ConvertError::BundleUnknownPackage {
                    package: b.package.clone(),
                    bundle: b.name.clone(),
                });
                continue;
            }
        };
        let parsed = match properties::parse(&b.properties) {
            Ok(parsed) => parsed,
            Err(source) => {
                errors.push(ConvertError::Property {
                    package: b.package.clone(),
                    bundle: b.name.clone(),
                    source,
                });
                continue;
            }
        };
        let version = match parsed.packages.as_slice() {
            [prop] => Version::parse(&prop.version).unwrap_or_else(|_| Version::new(0, 0, 0)),
            _ => Version::new(0, 0, 0), // Surfaced by model validation.
        };

        // Membership is defined by channel entries naming this bundle.
        let mut memberships = 0;
        for c in cfg.channels.iter().filter(|c| c.package == b.package) {
            for entry in c.entries.iter().filter(|e| e.name == b.name) {
                memberships += 1;
                if let Some(channel) = package.channels.get_mut(&c.name) {
                    channel.bundles.insert(
                        b.name.clone(),
                        model::Bundle {
                            package: b.package.clone(),
                            channel: c.name.clone(),
                            name: b.name.clone(),
                            image: b.image.clone(),
                            replaces: entry.replaces.clone(),
                            skips: entry.skips.clone(),
                            skip_range: entry.skip_range.clone(),
                            properties: b.properties.clone(),
                            related_images: b.related_images.clone(),
                            objects: b.objects.clone(),
                            csv_json: b.csv_json.clone(),
                            version: version.clone(),
                            deprecation: None,
                        },
                    );
                }
            }
        }
        if memberships == 0 {
            errors.push(ConvertError::NotInAnyChannel {
                package: b.package.clone(),
                bundle: b.name.clone(),
            });
        }

        // Channel properties are a projection of the entries; they must not
        // claim membership the entries do not grant.
        for cp in &parsed.channels {
            let matched = cfg.channels.iter().any(|c| {
                c.package == b.package
                    && c.name == cp.name
                    && c.entries
                        .iter()
                        .any(|e| e.name == b.name && e.replaces == cp.replaces)
            });
            if !matched {
                errors.push(ConvertError::ChannelPropertyNoEntry {
                    package: b.package.clone(),
                    bundle: b.name.clone(),
                    channel: cp.name.clone(),
                    replaces: cp.replaces.clone(),
                });
            }
        }
    }

    // Every channel entry must name an existing bundle of its package.
    for c in &cfg.channels {
        for entry in &c.entries {
            if !bundle_keys.contains(&(c.package.as_str(), entry.name.as_str())) {
                errors.push(ConvertError::EntryUnknownBundle {
                    package: c.package.clone(),
                    channel: c.name.clone(),
                    entry: entry.name.clone(),
                });
            }
        }
    }

    attach_deprecations(cfg, &mut packages, &mut errors);

    if !errors.is_empty() {
        return Err(ConvertErrors(errors));
    }

    let model = model::Model(packages);
    if let Err(model::ValidateErrors(violations)) = model.validate() {
        return Err(ConvertErrors(
            violations.into_iter().map(ConvertError::Validate).collect(),
        ));
    }
    Ok(model)
}

fn attach_deprecations(
    cfg: &DeclarativeConfig,
    packages: &mut BTreeMap<String, model::Package>,
    errors: &mut Vec<ConvertError>,
) {
    let mut seen_packages = BTreeSet::new();
    for d in &cfg.deprecations {
        let package = match packages.get_mut(&d.package) {
            Some(package) => package,
            None => {
                errors.push(ConvertError::DeprecationUnknownPackage {
                    package: d.package.clone(),
                });
                continue;
            }
        };
        if !seen_packages.insert(d.package.as_str()) {
            errors.push(ConvertError::DuplicateDeprecation {
                package: d.package.clone(),
            });
            continue;
        }
        let mut seen_refs = BTreeSet::new();
        for entry in &d.entries {
            let reference = &entry.reference;
            if !seen_refs.insert((reference.schema.as_str(), reference.name.as_str())) {
                errors.push(ConvertError::DuplicateDeprecationReference {
                    package: d.package.clone(),
                    schema: reference.schema.clone(),
                    name: reference.name.clone(),
                });
                continue;
            }
            let deprecation = Some(model::Deprecation {
                message: entry.message.clone(),
            });
            match reference.schema.as_str() {
                SCHEMA_PACKAGE => {
                    if !reference.name.is_empty() && reference.name != d.package {
                        errors.push(ConvertError::DeprecationForeignPackage {
                            package: d.package.clone(),
                            name: reference.name.clone(),
                        });
                    } else {
                        package.deprecation = deprecation;
                    }
                }
                SCHEMA_CHANNEL => match package.channels.get_mut(&reference.name) {
                    Some(channel) => channel.deprecation = deprecation,
                    None => errors.push(ConvertError::DeprecationUnknownReference {
                        package: d.package.clone(),
                        schema: reference.schema.clone(),
                        name: reference.name.clone(),
                    }),
                },
                SCHEMA_BUNDLE => {
                    let mut found = false;
                    for channel in package.channels.values_mut() {
                        if let Some(bundle) = channel.bundles.get_mut(&reference.name) {
                            bundle.deprecation = deprecation.clone();
                            found = true;
                        }
                    }
                    if !found {
                        errors.push(ConvertError::DeprecationUnknownReference {
                            package: d.package.clone(),
                            schema: reference.schema.clone(),
                            name: reference.name.clone(),
                        });
                    }
                }
                other => errors.push(ConvertError::DeprecationUnsupportedSchema {
                    package: d.package.clone(),
                    schema: other.to_string(),
                }),
            }
        }
    }
}

/// Project a model back into its config form. Channel membership projects
/// into both channel entries and `olm.channel` properties on bundles; the
/// output is normalized and sorted.
pub fn convert_from_model(m: &model::Model) -> DeclarativeConfig {
    let mut cfg = DeclarativeConfig::default();

    for pkg in m.values() {
        cfg.packages.push(Package {
            schema: SCHEMA_PACKAGE.to_string(),
            name: pkg.name.clone(),
            default_channel: pkg.default_channel.clone(),
            icon: pkg.icon.clone(),
            description: pkg.description.clone(),
            properties: pkg.properties.clone(),
        });

        let mut deprecation_entries: Vec<DeprecationEntry> = Vec::new();
        if let Some(d) = &pkg.deprecation {
            deprecation_entries.push(deprecation_entry(SCHEMA_PACKAGE, "", &d.message));
        }

        let mut bundles: BTreeMap<String, Bundle> = BTreeMap::new();
        let mut memberships: BTreeMap<String, Vec<properties::Channel>> = BTreeMap::new();
        let mut deprecated_bundles: BTreeMap<String, String> = BTreeMap::new();

        for channel in pkg.channels.values() {
            cfg.channels.push(Channel {
                schema: SCHEMA_CHANNEL.to_string(),
                name: channel.name.clone(),
                package: pkg.name.clone(),
                entries: channel
                    .bundles
                    .values()
                    .map(|b| ChannelEntry {
                        name: b.name.clone(),
                        replaces: b.replaces.clone(),
                        skips: b.skips.clone(),
                        skip_range: b.skip_range.clone(),
                    })
                    .collect(),
            });
            if let Some(d) = &channel.deprecation {
                deprecation_entries.push(deprecation_entry(SCHEMA_CHANNEL, &channel.name, &d.message));
            }

            for b in channel.bundles.values() {
                memberships
                    .entry(b.name.clone())
                    .or_default()
                    .push(properties::Channel {
                        name: channel.name.clone(),
                        replaces: b.replaces.clone(),
                    });
                if let Some(d) = &b.deprecation {
                    deprecated_bundles.insert(b.name.clone(), d.message.clone());
                }
                bundles.entry(b.name.clone()).or_insert_with(|| Bundle {
                    schema: SCHEMA_BUNDLE.to_string(),
                    name: b.name.clone(),
                    package: pkg.name.clone(),
                    image: b.image.clone(),
                    properties: b.properties.clone(),
                    related_images: b.related_images.clone(),
                    objects: b.objects.clone(),
                    csv_json: b.csv_json.clone(),
                });
            }
        }

        for (name, mut doc) in bundles {
            let mut props: Vec<properties::Property> = doc
                .properties
                .drain(..)
                .filter(|p| p.type_ != properties::TYPE_CHANNEL)
                .collect();
            for membership in memberships.remove(&name).unwrap_or_default() {
                props.push(properties::build(&membership));
            }
            doc.properties = props;
            normalize_bundle(&mut doc);
            cfg.bundles.push(doc);
        }

        for (name, message) in deprecated_bundles {
            deprecation_entries.push(deprecation_entry(SCHEMA_BUNDLE, &name, &message));
        }
        if !deprecation_entries.is_empty() {
            cfg.deprecations.push(Deprecation {
                schema: SCHEMA_DEPRECATIONS.to_string(),
                package: pkg.name.clone(),
                entries: deprecation_entries,
            });
        }
    }

    crate::sort_by_package(&mut cfg);
    cfg
}

fn deprecation_entry(schema: &str, name: &str, message: &str) -> DeprecationEntry {
    DeprecationEntry {
        reference: PackageScopedReference {
            schema: schema.to_string(),
            name: name.to_string(),
        },
        message: message.to_string(),
    }
}
