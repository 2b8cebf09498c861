use std::collections::BTreeSet;

use semver::{Version, VersionReq};
use serde::Deserialize;

/// Per-package selections applied on top of (or instead of) the computed
/// change set.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiffIncluder {
    #[serde(default)]
    pub packages: Vec<DiffIncludePackage>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DiffIncludePackage {
    pub name: String,
    #[serde(default)]
    pub channels: Vec<DiffIncludeChannel>,
    #[serde(default)]
    pub versions: Vec<Version>,
    #[serde(default)]
    pub bundles: Vec<String>,
    /// All versions of the package satisfying this predicate; mutually
    /// exclusive with `versions` and `bundles`.
    #[serde(default)]
    pub version_range: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DiffIncludeChannel {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<Version>,
    #[serde(default)]
    pub bundles: Vec<String>,
    #[serde(default)]
    pub version_range: Option<String>,
}

pub(crate) type Selection = BTreeSet<(String, String)>;

impl DiffIncluder {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Resolve the selections against a model. Named entries extend to every
    /// entry on the path from the channel head down to them, preserving the
    /// upgrade edges into the named version; range selections name exactly
    /// the versions that satisfy the predicate.
    pub(crate) fn resolve(&self, new: &model::Model) -> Result<Selection, Vec<String>> {
        let mut errors = Vec::new();
        let mut out = Selection::new();

        for include in &self.packages {
            if include.name.is_empty() {
                errors.push("include entry has an empty package name".to_string());
                continue;
            }
            let package = match new.get(&include.name) {
                Some(package) => package,
                None => {
                    errors.push(format!("included package {:?} not found", include.name));
                    continue;
                }
            };
            if include.version_range.is_some()
                && (!include.versions.is_empty() || !include.bundles.is_empty())
            {
                errors.push(format!(
                    "included package {:?}: versionRange is mutually exclusive with versions and bundles",
                    include.name
                ));
                continue;
            }

            let no_selectors = include.channels.is_empty()
                && include.versions.is_empty()
                && include.bundles.is_empty()
                && include.version_range.is_none();
            if no_selectors {
                select_all(package, &mut out);
                continue;
            }

            if let Some(range) = &include.version_range {
                select_range(package, None, range, &mut out, &mut errors);
            }
            for version in &include.versions {
                select_version(package, None, version, &mut out, &mut errors);
            }
            for bundle in &include.bundles {
                select_bundle(package, None, bundle, &mut out, &mut errors);
            }

            for channel_include in &include.channels {
                let channel = match package.channels.get(&channel_include.name) {
                    Some(channel) => channel,
                    None => {
                        errors.push(format!(
                            "included channel {:?}/{:?} not found",
                            include.name, channel_include.name
                        ));
                        continue;
                    }
                };
                if channel_include.version_range.is_some()
                    && (!channel_include.versions.is_empty()
                        || !channel_include.bundles.is_empty())
                {
                    errors.push(format!(
                        "included channel {:?}/{:?}: versionRange is mutually exclusive with versions and bundles",
                        include.name, channel_include.name
                    ));
                    continue;
                }
                let no_selectors = channel_include.versions.is_empty()
                    && channel_include.bundles.is_empty()
                    && channel_include.version_range.is_none();
                if no_selectors {
                    for name in channel.bundles.keys() {
                        out.insert((package.name.clone(), name.clone()));
                    }
                    continue;
                }
                if let Some(range) = &channel_include.version_range {
                    select_range(package, Some(channel), range, &mut out, &mut errors);
                }
                for version in &channel_include.versions {
                    select_version(package, Some(channel), version, &mut out, &mut errors);
                }
                for bundle in &channel_include.bundles {
                    select_bundle(package, Some(channel), bundle, &mut out, &mut errors);
                }
            }
        }

        if errors.is_empty() {
            Ok(out)
        } else {
            Err(errors)
        }
    }
}

fn select_all(package: &model::Package, out: &mut Selection) {
    for channel in package.channels.values() {
        for name in channel.bundles.keys() {
            out.insert((package.name.clone(), name.clone()));
        }
    }
}

fn channels_of<'a>(
    package: &'a model::Package,
    channel: Option<&'a model::Channel>,
) -> Vec<&'a model::Channel> {
    match channel {
        Some(channel) => vec![channel],
        None => package.channels.values().collect(),
    }
}

fn select_range(
    package: &model::Package,
    channel: Option<&model::Channel>,
    range: &str,
    out: &mut Selection,
    errors: &mut Vec<String>,
) {
    let range = match VersionReq::parse(range) {
        Ok(range) => range,
        Err(err) => {
            errors.push(format!(
                "included package {:?}: invalid version range {range:?}: {err}",
                package.name
            ));
            return;
        }
    };
    for channel in channels_of(package, channel) {
        for bundle in channel.bundles.values() {
            if range.matches(&bundle.version) {
                out.insert((package.name.clone(), bundle.name.clone()));
            }
        }
    }
}

fn select_version(
    package: &model::Package,
    channel: Option<&model::Channel>,
    version: &Version,
    out: &mut Selection,
    errors: &mut Vec<String>,
) {
    let mut found = false;
    for channel in channels_of(package, channel) {
        for bundle in channel.bundles.values() {
            if bundle.version == *version {
                found = true;
                select_with_upgrade_path(channel, &bundle.name, out);
            }
        }
    }
    if !found {
        errors.push(format!(
            "included package {:?}: version {version} not found",
            package.name
        ));
    }
}

fn select_bundle(
    package: &model::Package,
    channel: Option<&model::Channel>,
    bundle: &str,
    out: &mut Selection,
    errors: &mut Vec<String>,
) {
    let mut found = false;
    for channel in channels_of(package, channel) {
        if channel.bundles.contains_key(bundle) {
            found = true;
            select_with_upgrade_path(channel, bundle, out);
        }
    }
    if !found {
        errors.push(format!(
            "included package {:?}: bundle {bundle:?} not found",
            package.name
        ));
    }
}

// The named entry, plus every entry that transitively replaces it: walking
// from the head along replaces, everything down to and including the target.
fn select_with_upgrade_path(channel: &model::Channel, target: &str, out: &mut Selection) {
    out.insert((channel.package.clone(), target.to_string()));

    let head = match channel.head() {
        Ok(head) => head,
        Err(_) => return,
    };
    let mut path: Vec<&str> = Vec::new();
    let mut cursor = Some(head);
    while let Some(bundle) = cursor {
        if path.len() > channel.bundles.len() {
            return; // Cycle guard; surfaced by validation elsewhere.
        }
        path.push(&bundle.name);
        if bundle.name == target {
            for name in path {
                out.insert((channel.package.clone(), name.to_string()));
            }
            return;
        }
        cursor = match bundle.replaces.as_str() {
            "" => None,
            replaces => channel.bundles.get(replaces),
        };
    }
}
