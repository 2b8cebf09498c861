use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use serde::Serialize;

use crate::{Bundle, Channel, DeclarativeConfig, Deprecation, Meta, Package};

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("failed to encode record as JSON")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode record as YAML")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to write record")]
    Io(#[from] std::io::Error),
}

enum RecordRef<'a> {
    Package(&'a Package),
    Channel(&'a Channel),
    Bundle(&'a Bundle),
    Deprecation(&'a Deprecation),
    Other(&'a Meta),
}

impl Serialize for RecordRef<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RecordRef::Package(r) => r.serialize(serializer),
            RecordRef::Channel(r) => r.serialize(serializer),
            RecordRef::Bundle(r) => r.serialize(serializer),
            RecordRef::Deprecation(r) => r.serialize(serializer),
            RecordRef::Other(r) => r.serialize(serializer),
        }
    }
}

// Documents are emitted grouped by package name (records with no package
// first), and within each group: the package record, then its channels and
// bundles by name, then deprecations and passthrough records.
fn ordered_records(cfg: &DeclarativeConfig) -> Vec<RecordRef<'_>> {
    let mut names: BTreeSet<&str> = BTreeSet::new();
    names.extend(cfg.packages.iter().map(|p| p.name.as_str()));
    names.extend(cfg.channels.iter().map(|c| c.package.as_str()));
    names.extend(cfg.bundles.iter().map(|b| b.package.as_str()));
    names.extend(cfg.deprecations.iter().map(|d| d.package.as_str()));
    names.extend(cfg.others.iter().map(|o| o.package.as_str()));

    let mut out = Vec::new();
    for name in names {
        out.extend(
            cfg.packages
                .iter()
                .filter(|p| p.name == name)
                .map(RecordRef::Package),
        );

        let mut channels: Vec<&Channel> =
            cfg.channels.iter().filter(|c| c.package == name).collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        out.extend(channels.into_iter().map(RecordRef::Channel));

        let mut bundles: Vec<&Bundle> = cfg.bundles.iter().filter(|b| b.package == name).collect();
        bundles.sort_by(|a, b| a.name.cmp(&b.name));
        out.extend(bundles.into_iter().map(RecordRef::Bundle));

        out.extend(
            cfg.deprecations
                .iter()
                .filter(|d| d.package == name)
                .map(RecordRef::Deprecation),
        );
        out.extend(
            cfg.others
                .iter()
                .filter(|o| o.package == name)
                .map(RecordRef::Other),
        );
    }
    out
}

/// Emit the config as a stream of YAML documents, each prefixed with `---`,
/// sorted per the package-grouped document order.
pub fn write_yaml(cfg: &DeclarativeConfig, mut writer: impl Write) -> Result<(), WriteError> {
    for record in ordered_records(cfg) {
        // Round-trip through JSON text so raw property payloads embed as
        // structured YAML rather than opaque strings; the YAML mapping
        // preserves field order.
        let json = serde_json::to_string(&record)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&json)?;
        writer.write_all(b"---\n")?;
        writer.write_all(serde_yaml::to_string(&value)?.as_bytes())?;
    }
    Ok(())
}

/// Emit the config as concatenated pretty-printed JSON objects, without an
/// enclosing array.
pub fn write_json(cfg: &DeclarativeConfig, mut writer: impl Write) -> Result<(), WriteError> {
    for record in ordered_records(cfg) {
        serde_json::to_writer_pretty(&mut writer, &record)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Stable-sort every bucket by `(package, name)`.
pub fn sort_by_package(cfg: &mut DeclarativeConfig) {
    cfg.packages.sort_by(|a, b| a.name.cmp(&b.name));
    cfg.channels
        .sort_by(|a, b| (&a.package, &a.name).cmp(&(&b.package, &b.name)));
    cfg.bundles
        .sort_by(|a, b| (&a.package, &a.name).cmp(&(&b.package, &b.name)));
    cfg.deprecations.sort_by(|a, b| a.package.cmp(&b.package));
    cfg.others
        .sort_by(|a, b| (&a.package, &a.schema, &a.name).cmp(&(&b.package, &b.schema, &b.name)));
}

/// Partition the config so each output holds the records of exactly one
/// package. Records naming no package collect under the synthetic `""` key.
pub fn organize_by_package(cfg: &DeclarativeConfig) -> BTreeMap<String, DeclarativeConfig> {
    let mut out: BTreeMap<String, DeclarativeConfig> = BTreeMap::new();

    for p in &cfg.packages {
        out.entry(p.name.clone()).or_default().packages.push(p.clone());
    }
    for c in &cfg.channels {
        out.entry(c.package.clone())
            .or_default()
            .channels
            .push(c.clone());
    }
    for b in &cfg.bundles {
        out.entry(b.package.clone())
            .or_default()
            .bundles
            .push(b.clone());
    }
    for d in &cfg.deprecations {
        out.entry(d.package.clone())
            .or_default()
            .deprecations
            .push(d.clone());
    }
    for o in &cfg.others {
        out.entry(o.package.clone())
            .or_default()
            .others
            .push(o.clone());
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fixture() -> DeclarativeConfig {
        crate::load_slice(
            r#"---
schema: olm.bundle
name: bar.v1.0.0
package: bar
image: reg.test/bar:v1.0.0
properties:
  - type: olm.package
    value: {packageName: bar, version: 1.0.0}
---
schema: olm.package
name: foo
defaultChannel: stable
---
schema: olm.channel
name: stable
package: foo
entries: [{name: foo.v0.1.0}]
---
schema: olm.package
name: bar
defaultChannel: stable
---
schema: olm.channel
name: stable
package: bar
entries: [{name: bar.v1.0.0}]
---
schema: custom.global
payload: true
"#
            .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn test_yaml_document_order() {
        let cfg = fixture();
        let mut out = Vec::new();
        write_yaml(&cfg, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        // Globals first, then packages in name order, each package record
        // before its channels and bundles.
        let positions: Vec<usize> = [
            "schema: custom.global",
            "name: bar\n",
            "name: stable\npackage: bar",
            "name: bar.v1.0.0",
            "name: foo\n",
            "name: stable\npackage: foo",
        ]
        .iter()
        .copied()
        .map(|needle| out.find(needle).unwrap_or_else(|| panic!("missing {needle:?} in:\n{out}")))
        .collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);

        // Every document is introduced by a separator.
        assert_eq!(out.matches("---\n").count(), 6);
    }

    #[test]
    fn test_yaml_round_trips() {
        let cfg = fixture();
        let mut out = Vec::new();
        write_yaml(&cfg, &mut out).unwrap();

        let mut reloaded = crate::load_slice(&out).unwrap();
        let mut sorted = cfg.clone();
        sort_by_package(&mut sorted);
        // write_yaml emits in sorted order, so a reload compares equal to
        // the sorted input.
        sort_by_package(&mut reloaded);
        assert_eq!(reloaded, sorted);
    }

    #[test]
    fn test_json_round_trips() {
        let cfg = fixture();
        let mut out = Vec::new();
        write_json(&cfg, &mut out).unwrap();
        assert!(out.starts_with(b"{"));

        let mut reloaded = crate::load_slice(&out).unwrap();
        let mut sorted = cfg.clone();
        sort_by_package(&mut sorted);
        sort_by_package(&mut reloaded);
        assert_eq!(reloaded, sorted);
    }

    #[test]
    fn test_organize_by_package() {
        let organized = organize_by_package(&fixture());
        let keys: Vec<&str> = organized.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["", "bar", "foo"]);
        assert_eq!(organized[""].others.len(), 1);
        assert_eq!(organized["bar"].packages.len(), 1);
        assert_eq!(organized["bar"].bundles.len(), 1);
        assert_eq!(organized["foo"].channels.len(), 1);
        assert!(organized["foo"].bundles.is_empty());
    }

    #[test]
    fn test_sort_is_stable() {
        let mut cfg = fixture();
        // Duplicate key: two records for package "bar" keep input order.
        cfg.packages.push(Package {
            schema: crate::SCHEMA_PACKAGE.to_string(),
            name: "bar".to_string(),
            description: "second".to_string(),
            ..Default::default()
        });
        sort_by_package(&mut cfg);
        assert_eq!(cfg.packages[0].name, "bar");
        assert_eq!(cfg.packages[0].description, "");
        assert_eq!(cfg.packages[1].description, "second");
        assert_eq!(cfg.packages[2].name, "foo");
    }
}
