use std::collections::BTreeMap;

use crate::{Bundle, Channel, DeclarativeConfig, Deprecation, Package};

/// Conflict policy for combining configs which share record keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Keep the last occurrence of each keyed record verbatim.
    PreferLast,
    /// Deep-merge fields of keyed records in ascending priority order.
    TwoWay,
}

/// Union the given configs into one under the stated policy. Records key as
/// `Package.name`, `(Channel.package, Channel.name)`, and
/// `(Bundle.package, Bundle.name)`; unknown-schema records are never merged
/// and pass through in input order. The result is sorted.
pub fn merge(configs: Vec<DeclarativeConfig>, policy: MergePolicy) -> DeclarativeConfig {
    let mut packages: BTreeMap<String, Package> = BTreeMap::new();
    let mut channels: BTreeMap<(String, String), Channel> = BTreeMap::new();
    let mut bundles: BTreeMap<(String, String), Bundle> = BTreeMap::new();
    let mut deprecations: BTreeMap<String, Deprecation> = BTreeMap::new();
    let mut others = Vec::new();

    for cfg in configs {
        for next in cfg.packages {
            match packages.get_mut(&next.name) {
                None => {
                    packages.insert(next.name.clone(), next);
                }
                Some(base) => match policy {
                    MergePolicy::PreferLast => {
                        if !base.default_channel.is_empty()
                            && base.default_channel != next.default_channel
                        {
                            tracing::warn!(
                                package = %next.name,
                                previous = %base.default_channel,
                                next = %next.default_channel,
                                "conflicting default channels; keeping the later value",
                            );
                        }
                        *base = next;
                    }
                    MergePolicy::TwoWay => merge_package(base, next),
                },
            }
        }
        for next in cfg.channels {
            let key = (next.package.clone(), next.name.clone());
            match channels.get_mut(&key) {
                None => {
                    channels.insert(key, next);
                }
                Some(base) => match policy {
                    MergePolicy::PreferLast => *base = next,
                    MergePolicy::TwoWay => merge_channel(base, next),
                },
            }
        }
        for next in cfg.bundles {
            let key = (next.package.clone(), next.name.clone());
            match bundles.get_mut(&key) {
                None => {
                    bundles.insert(key, next);
                }
                Some(base) => match policy {
                    MergePolicy::PreferLast => *base = next,
                    MergePolicy::TwoWay => merge_bundle(base, next),
                },
            }
        }
        for next in cfg.deprecations {
            match deprecations.get_mut(&next.package) {
                None => {
                    deprecations.insert(next.package.clone(), next);
                }
                Some(base) => match policy {
                    MergePolicy::PreferLast => *base = next,
                    MergePolicy::TwoWay => merge_deprecation(base, next),
                },
            }
        }
        others.extend(cfg.others);
    }

    let mut out = DeclarativeConfig {
        packages: packages.into_values().collect(),
        channels: channels.into_values().collect(),
        bundles: bundles.into_values().collect(),
        deprecations: deprecations.into_values().collect(),
        others,
    };
    crate::sort_by_package(&mut out);
    out
}

fn merge_scalar(base: &mut String, next: String) {
    if !next.is_empty() {
        *base = next;
    }
}

fn merge_package(base: &mut Package, next: Package) {
    merge_scalar(&mut base.default_channel, next.default_channel);
    if next.icon.is_some() {
        base.icon = next.icon;
    }
    merge_scalar(&mut base.description, next.description);
    // Package properties merge by their canonical (type, value) identity.
    for property in next.properties {
        if !base.properties.contains(&property) {
            base.properties.push(property);
        }
    }
}

// Channel entries merge by name.
fn merge_channel(base: &mut Channel, next: Channel) {
    for entry in next.entries {
        match base.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => {
                merge_scalar(&mut existing.replaces, entry.replaces);
                merge_scalar(&mut existing.skip_range, entry.skip_range);
                // Skips merge by value.
                for skip in entry.skips {
                    if !existing.skips.contains(&skip) {
                        existing.skips.push(skip);
                    }
                }
            }
            None => base.entries.push(entry),
        }
    }
}

fn merge_bundle(base: &mut Bundle, next: Bundle) {
    merge_scalar(&mut base.image, next.image);
    // The identity of an arbitrary bundle property is unknowable, so a
    // non-empty later list replaces the whole slice.
    if !next.properties.is_empty() {
        base.properties = next.properties;
    }
    // Related images merge by (name, image).
    for image in next.related_images {
        if !base.related_images.contains(&image) {
            base.related_images.push(image);
        }
    }
    // Object manifests merge by their verbatim text.
    for object in next.objects {
        if !base.objects.contains(&object) {
            base.objects.push(object);
        }
    }
    merge_scalar(&mut base.csv_json, next.csv_json);
}

// Deprecation entries merge by reference.
fn merge_deprecation(base: &mut Deprecation, next: Deprecation) {
    for entry in next.entries {
        match base
            .entries
            .iter_mut()
            .find(|e| e.reference == entry.reference)
        {
            Some(existing) => merge_scalar(&mut existing.message, entry.message),
            None => base.entries.push(entry),
        }
    }
}
