mod include;

use std::collections::{BTreeMap, BTreeSet};

use semver::{Version, VersionReq};

use include::Selection;
pub use include::{DiffIncludeChannel, DiffIncludePackage, DiffIncluder};

#[derive(thiserror::Error, Debug)]
pub enum DiffError {
    #[error("invalid include configuration:\n  - {}", .0.join("\n  - "))]
    InvalidInclude(Vec<String>),
    #[error("unresolved requirements:\n  - {}", .0.join("\n  - "))]
    UnresolvedRequirements(Vec<String>),
    #[error("bundle {package:?}/{bundle:?}: {source}")]
    Property {
        package: String,
        bundle: String,
        #[source]
        source: properties::Error,
    },
    #[error(transparent)]
    Validate(#[from] model::ValidateErrors),
}

/// Computes the minimal catalog that, applied on top of `old`, carries every
/// new or changed bundle of `new` together with its transitive dependency
/// closure, subject to the include filter.
#[derive(Debug, Default, Clone)]
pub struct DiffGenerator {
    /// Leave requirements unresolved instead of pulling in providers.
    pub skip_dependencies: bool,
    /// Select only channel heads; implied when `old` is empty.
    pub heads_only: bool,
    /// Keep included content on top of the change set rather than instead
    /// of it.
    pub include_additively: bool,
    pub includer: DiffIncluder,
}

impl DiffGenerator {
    pub fn run(&self, old: &model::Model, new: &model::Model) -> Result<model::Model, DiffError> {
        let heads_only = self.heads_only || old.is_empty();
        if old.is_empty() && !self.heads_only {
            tracing::warn!("old catalog is empty; diffing channel heads only");
        }

        // 1. Seed: heads, or the changed bundles of packages `old` carries.
        // A non-additive includer replaces the seed outright.
        let mut selected = Selection::new();
        if self.includer.is_empty() || self.include_additively {
            if heads_only {
                self.seed_heads(new, &mut selected)?;
            } else {
                self.seed_changed(old, new, &mut selected)?;
            }
        }

        // 2. Include-filter extension.
        if !self.includer.is_empty() {
            let included = self
                .includer
                .resolve(new)
                .map_err(DiffError::InvalidInclude)?;
            selected.extend(included);
        }

        // 3. Dependency closure, to fixpoint.
        if !self.skip_dependencies {
            self.close_dependencies(old, new, &mut selected)?;
        }

        // 4 + 5. Channel restriction and packaging.
        let out = package_selection(new, &selected)?;
        out.validate()?;
        Ok(out)
    }

    fn seed_heads(&self, new: &model::Model, selected: &mut Selection) -> Result<(), DiffError> {
        for package in new.values() {
            for channel in package.channels.values() {
                let head = channel
                    .head()
                    .map_err(|err| model::ValidateErrors::from(err))?;
                selected.insert((package.name.clone(), head.name.clone()));
            }
        }
        Ok(())
    }

    // Changed content of the packages the old catalog carries. Per channel,
    // walk from the new head along replaces and take every bundle up to the
    // frontier of content the old catalog already has; separately, take any
    // common bundle whose content changed. Wholly new packages enter the
    // diff only through dependencies or the includer.
    fn seed_changed(
        &self,
        old: &model::Model,
        new: &model::Model,
        selected: &mut Selection,
    ) -> Result<(), DiffError> {
        for (name, package) in new.iter() {
            let old_package = match old.get(name) {
                Some(old_package) => old_package,
                None => continue,
            };
            let old_names: BTreeSet<&str> = old_package
                .channels
                .values()
                .flat_map(|c| c.bundles.keys().map(String::as_str))
                .collect();

            for channel in package.channels.values() {
                let head = channel.head().map_err(model::ValidateErrors::from)?;
                let mut steps = 0;
                let mut cursor = Some(head);
                while let Some(bundle) = cursor {
                    if old_names.contains(bundle.name.as_str()) {
                        break;
                    }
                    selected.insert((name.clone(), bundle.name.clone()));
                    steps += 1;
                    if steps > channel.bundles.len() {
                        break; // Cycle guard; surfaced by validation elsewhere.
                    }
                    cursor = match bundle.replaces.as_str() {
                        "" => None,
                        replaces => channel.bundles.get(replaces),
                    };
                }
            }

            for bundle_name in &old_names {
                let next = match representative(new, name, bundle_name) {
                    Some(next) => next,
                    None => continue, // Dropped from the new catalog.
                };
                let previous = representative(old, name, bundle_name)
                    .expect("bundle names are gathered from the old model");
                if bundles_differ(next, previous) {
                    selected.insert((name.clone(), bundle_name.to_string()));
                }
            }
        }
        Ok(())
    }

    fn close_dependencies(
        &self,
        old: &model::Model,
        new: &model::Model,
        selected: &mut Selection,
    ) -> Result<(), DiffError> {
        let mut unresolved: BTreeSet<String> = BTreeSet::new();
        let mut processed: Selection = Selection::new();

        loop {
            let pending: Vec<(String, String)> = selected
                .iter()
                .filter(|key| !processed.contains(*key))
                .cloned()
                .collect();
            if pending.is_empty() {
                break;
            }

            for (package_name, bundle_name) in pending {
                processed.insert((package_name.clone(), bundle_name.clone()));
                let bundle = match representative(new, &package_name, &bundle_name) {
                    Some(bundle) => bundle,
                    None => continue,
                };
                let parsed =
                    bundle
                        .parsed_properties()
                        .map_err(|source| DiffError::Property {
                            package: package_name.clone(),
                            bundle: bundle_name.clone(),
                            source,
                        })?;

                for requirement in &parsed.packages_required {
                    let range = match VersionReq::parse(&requirement.version_range) {
                        Ok(range) => range,
                        Err(err) => {
                            unresolved.insert(format!(
                                "bundle {package_name}/{bundle_name} requires package {:?} with invalid range {:?}: {err}",
                                requirement.package_name, requirement.version_range
                            ));
                            continue;
                        }
                    };
                    let candidates = package_candidates(new, &requirement.package_name, &range);
                    if candidates.is_empty() {
                        unresolved.insert(format!(
                            "bundle {package_name}/{bundle_name} requires package {:?} in range {:?}, which nothing provides",
                            requirement.package_name, requirement.version_range
                        ));
                        continue;
                    }
                    let old_satisfiers = package_candidates(old, &requirement.package_name, &range);
                    add_satisfiers(candidates, old_satisfiers, selected);
                }

                for requirement in &parsed.gvks_required {
                    let candidates = gvk_candidates(new, requirement);
                    if candidates.is_empty() {
                        unresolved.insert(format!(
                            "bundle {package_name}/{bundle_name} requires API {}/{}/{}, which nothing provides",
                            requirement.group, requirement.version, requirement.kind
                        ));
                        continue;
                    }
                    let old_satisfiers = gvk_candidates(old, requirement);
                    add_satisfiers(candidates, old_satisfiers, selected);
                }
            }
        }

        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(DiffError::UnresolvedRequirements(
                unresolved.into_iter().collect(),
            ))
        }
    }
}

// The channel-agnostic view of a bundle: its node in the lexicographically
// first channel carrying it.
fn representative<'m>(
    m: &'m model::Model,
    package: &str,
    bundle: &str,
) -> Option<&'m model::Bundle> {
    m.get(package)?
        .channels
        .values()
        .find_map(|c| c.bundles.get(bundle))
}

// Channel membership and upgrade edges are ignored; properties compare as
// multisets of canonical (type, value) pairs.
fn bundles_differ(a: &model::Bundle, b: &model::Bundle) -> bool {
    if a.image != b.image
        || a.skip_range != b.skip_range
        || a.csv_json != b.csv_json
        || a.objects != b.objects
    {
        return true;
    }
    if canonical_properties(a) != canonical_properties(b) {
        return true;
    }
    let mut a_images = a.related_images.clone();
    let mut b_images = b.related_images.clone();
    a_images.sort();
    b_images.sort();
    a_images != b_images
}

fn canonical_properties(bundle: &model::Bundle) -> Vec<(String, String)> {
    let mut props: Vec<(String, String)> = bundle
        .properties
        .iter()
        .filter(|p| p.type_ != properties::TYPE_CHANNEL)
        .map(|p| p.canonical())
        .collect();
    props.sort();
    props
}

// All distinct bundles of `package` whose version satisfies the predicate.
fn package_candidates<'m>(
    m: &'m model::Model,
    package: &str,
    range: &VersionReq,
) -> Vec<&'m model::Bundle> {
    let Some(package) = m.get(package) else {
        return Vec::new();
    };
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut out = Vec::new();
    for channel in package.channels.values() {
        for bundle in channel.bundles.values() {
            if range.matches(&bundle.version) && seen.insert(bundle.name.as_str()) {
                out.push(bundle);
            }
        }
    }
    out
}

// All distinct bundles, in any package, providing the required capability.
fn gvk_candidates<'m>(
    m: &'m model::Model,
    requirement: &properties::GVKRequired,
) -> Vec<&'m model::Bundle> {
    let mut seen: BTreeSet<(&str, &str)> = BTreeSet::new();
    let mut out = Vec::new();
    for package in m.values() {
        for channel in package.channels.values() {
            for bundle in channel.bundles.values() {
                if !seen.insert((bundle.package.as_str(), bundle.name.as_str())) {
                    continue;
                }
                let provides = bundle.parsed_properties().map(|parsed| {
                    parsed.gvks.iter().any(|gvk| {
                        gvk.group == requirement.group
                            && gvk.version == requirement.version
                            && gvk.kind == requirement.kind
                    })
                });
                if provides.unwrap_or(false) {
                    out.push(bundle);
                }
            }
        }
    }
    out
}

// Per provider package: if the old catalog already satisfies the
// requirement, carry only providers strictly newer than its best satisfier;
// otherwise carry the single highest satisfier.
fn add_satisfiers(
    candidates: Vec<&model::Bundle>,
    old_satisfiers: Vec<&model::Bundle>,
    selected: &mut Selection,
) {
    let mut by_package: BTreeMap<&str, Vec<&model::Bundle>> = BTreeMap::new();
    for candidate in candidates {
        by_package
            .entry(candidate.package.as_str())
            .or_default()
            .push(candidate);
    }
    let mut old_best: BTreeMap<&str, &Version> = BTreeMap::new();
    for satisfier in old_satisfiers {
        let entry = old_best
            .entry(satisfier.package.as_str())
            .or_insert(&satisfier.version);
        if satisfier.version > **entry {
            *entry = &satisfier.version;
        }
    }

    for (package, candidates) in by_package {
        match old_best.get(package) {
            Some(old_version) => {
                for candidate in candidates {
                    if candidate.version > **old_version {
                        selected.insert((package.to_string(), candidate.name.clone()));
                    }
                }
            }
            None => {
                let best = candidates
                    .into_iter()
                    .max_by(|a, b| a.version.cmp(&b.version).then(a.name.cmp(&b.name)));
                if let Some(best) = best {
                    selected.insert((package.to_string(), best.name.clone()));
                }
            }
        }
    }
}

// Emit every touched package, each touched channel reduced to its selected
// entries plus the intermediates needed to reconnect selected bundles to
// their nearest selected predecessor. Entries keep their upgrade edges
// verbatim, so edges into older content stay intact when the diff is
// applied on top of it.
fn package_selection(
    new: &model::Model,
    selected: &Selection,
) -> Result<model::Model, DiffError> {
    let mut out = model::Model::default();

    for (package_name, package) in new.iter() {
        let selected_names: BTreeSet<&str> = selected
            .iter()
            .filter(|(p, _)| p == package_name)
            .map(|(_, b)| b.as_str())
            .collect();
        if selected_names.is_empty() {
            continue;
        }

        let mut out_package = model::Package {
            name: package.name.clone(),
            description: package.description.clone(),
            icon: package.icon.clone(),
            default_channel: package.default_channel.clone(),
            channels: BTreeMap::new(),
            properties: package.properties.clone(),
            deprecation: None,
        };

        for (channel_name, channel) in &package.channels {
            let mut keep: BTreeSet<&str> = selected_names
                .iter()
                .copied()
                .filter(|name| channel.bundles.contains_key(*name))
                .collect();
            if keep.is_empty() {
                continue;
            }
            stitch_replaces_chains(channel, &mut keep);

            let mut out_channel = model::Channel {
                package: package.name.clone(),
                name: channel.name.clone(),
                bundles: BTreeMap::new(),
                deprecation: None,
            };
            for name in keep {
                let mut bundle = channel.bundles[name].clone();
                bundle.deprecation = None;
                out_channel.bundles.insert(name.to_string(), bundle);
            }
            out_package
                .channels
                .insert(channel_name.clone(), out_channel);
        }

        // A package must carry its default channel; if nothing in it was
        // selected, keep just its head.
        if !out_package.channels.contains_key(&package.default_channel) {
            if let Some(channel) = package.channels.get(&package.default_channel) {
                let head = channel
                    .head()
                    .map_err(|err| model::ValidateErrors::from(err))?;
                let mut bundle = head.clone();
                bundle.deprecation = None;
                out_package.channels.insert(
                    channel.name.clone(),
                    model::Channel {
                        package: package.name.clone(),
                        name: channel.name.clone(),
                        bundles: [(head.name.clone(), bundle)].into_iter().collect(),
                        deprecation: None,
                    },
                );
            }
        }

        out.insert(package_name.clone(), out_package);
    }
    Ok(out)
}

// For each kept bundle, walk its replaces chain: if it reconnects to
// another kept bundle, keep the intermediate entries; a chain that runs to
// a root (or dangles) adds nothing.
fn stitch_replaces_chains<'c>(channel: &'c model::Channel, keep: &mut BTreeSet<&'c str>) {
    let start: Vec<&str> = keep.iter().copied().collect();
    for name in start {
        let mut path: Vec<&'c str> = Vec::new();
        let mut cursor = channel.bundles.get(name);
        while let Some(bundle) = cursor {
            if path.len() > channel.bundles.len() {
                break; // Cycle guard; surfaced by validation elsewhere.
            }
            let next = match bundle.replaces.as_str() {
                "" => None,
                replaces => channel.bundles.get(replaces),
            };
            match next {
                None => break,
                Some(next) => {
                    if keep.contains(next.name.as_str()) {
                        keep.extend(path.iter().copied());
                        break;
                    }
                    path.push(&next.name);
                    cursor = Some(next);
                }
            }
        }
    }
}
