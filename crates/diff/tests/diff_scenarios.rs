use diff::{DiffError, DiffGenerator, DiffIncludePackage, DiffIncluder};
use pretty_assertions::assert_eq;
use serde_json::json;

fn model_from(documents: &[serde_json::Value]) -> model::Model {
    let stream = documents
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let cfg = declcfg::load_slice(stream.as_bytes()).unwrap();
    declcfg::convert_to_model(&cfg).unwrap()
}

fn package(name: &str, default_channel: &str) -> serde_json::Value {
    json!({"schema": "olm.package", "name": name, "defaultChannel": default_channel})
}

fn channel(package: &str, name: &str, entries: serde_json::Value) -> serde_json::Value {
    json!({"schema": "olm.channel", "name": name, "package": package, "entries": entries})
}

fn bundle(
    package: &str,
    name: &str,
    version: &str,
    channel: &str,
    replaces: &str,
    extra: &[serde_json::Value],
) -> serde_json::Value {
    let mut membership = json!({"name": channel});
    if !replaces.is_empty() {
        membership["replaces"] = json!(replaces);
    }
    let mut properties = vec![json!({
        "type": "olm.package",
        "value": {"packageName": package, "version": version},
    })];
    properties.extend(extra.iter().cloned());
    properties.push(json!({"type": "olm.channel", "value": membership}));
    json!({
        "schema": "olm.bundle",
        "name": name,
        "package": package,
        "image": format!("reg.test/{package}/{name}"),
        "properties": properties,
    })
}

fn channel_bundle_names(m: &model::Model, package: &str, channel: &str) -> Vec<String> {
    m[package].channels[channel].bundles.keys().cloned().collect()
}

fn foo_new(requirement: bool) -> Vec<serde_json::Value> {
    let extra = if requirement {
        vec![json!({
            "type": "olm.package.required",
            "value": {"packageName": "etcd", "versionRange": ">=0.9.0"},
        })]
    } else {
        Vec::new()
    };
    vec![
        package("foo", "stable"),
        channel("foo", "stable", json!([{"name": "foo.v0.1.0"}])),
        bundle("foo", "foo.v0.1.0", "0.1.0", "stable", "", &extra),
    ]
}

fn etcd_docs(versions: &[(&str, &str, &str)]) -> Vec<serde_json::Value> {
    let entries: Vec<serde_json::Value> = versions
        .iter()
        .map(|(name, _, replaces)| {
            if replaces.is_empty() {
                json!({"name": name})
            } else {
                json!({"name": name, "replaces": replaces})
            }
        })
        .collect();
    let mut docs = vec![
        package("etcd", "stable"),
        channel("etcd", "stable", json!(entries)),
    ];
    for (name, version, replaces) in versions {
        docs.push(bundle("etcd", name, version, "stable", replaces, &[]));
    }
    docs
}

// Scenario: heads-only over an empty old catalog keeps only each channel
// head, with its upgrade edge intact.
#[test]
fn test_heads_only_diff() {
    let new = model_from(&[
        package("foo", "stable"),
        channel(
            "foo",
            "stable",
            json!([
                {"name": "foo.v0.1.0"},
                {"name": "foo.v0.2.0", "replaces": "foo.v0.1.0"},
            ]),
        ),
        bundle("foo", "foo.v0.1.0", "0.1.0", "stable", "", &[]),
        bundle("foo", "foo.v0.2.0", "0.2.0", "stable", "foo.v0.1.0", &[]),
    ]);

    let out = DiffGenerator::default()
        .run(&model::Model::default(), &new)
        .unwrap();

    assert_eq!(out.keys().collect::<Vec<_>>(), vec!["foo"]);
    assert_eq!(
        channel_bundle_names(&out, "foo", "stable"),
        vec!["foo.v0.2.0"]
    );
    let head = &out["foo"].channels["stable"].bundles["foo.v0.2.0"];
    assert_eq!(head.replaces, "foo.v0.1.0");

    let dc = declcfg::convert_from_model(&out);
    assert_eq!(dc.channels.len(), 1);
    assert_eq!(dc.channels[0].entries.len(), 1);
    assert_eq!(dc.channels[0].entries[0].name, "foo.v0.2.0");
    assert_eq!(dc.channels[0].entries[0].replaces, "foo.v0.1.0");
    assert_eq!(dc.bundles.len(), 1);
}

// Scenario: a modified bundle gains a dependency; the diff carries the
// modification and the highest provider of the new requirement.
#[test]
fn test_latest_diff_pulls_new_dependency() {
    let old = model_from(&foo_new(false));
    let mut docs = foo_new(true);
    docs.extend(etcd_docs(&[
        ("etcd.v0.9.0", "0.9.0", ""),
        ("etcd.v0.9.1", "0.9.1", "etcd.v0.9.0"),
    ]));
    let new = model_from(&docs);

    let out = DiffGenerator::default().run(&old, &new).unwrap();

    assert_eq!(out.keys().collect::<Vec<_>>(), vec!["etcd", "foo"]);
    assert_eq!(channel_bundle_names(&out, "foo", "stable"), vec!["foo.v0.1.0"]);
    // Only the highest satisfier is carried.
    assert_eq!(
        channel_bundle_names(&out, "etcd", "stable"),
        vec!["etcd.v0.9.1"]
    );
}

// Scenario: the same diff with dependency resolution disabled carries only
// the modified bundle.
#[test]
fn test_skip_dependencies_excludes_providers() {
    let old = model_from(&foo_new(false));
    let mut docs = foo_new(true);
    docs.extend(etcd_docs(&[
        ("etcd.v0.9.0", "0.9.0", ""),
        ("etcd.v0.9.1", "0.9.1", "etcd.v0.9.0"),
    ]));
    let new = model_from(&docs);

    let generator = DiffGenerator {
        skip_dependencies: true,
        ..Default::default()
    };
    let out = generator.run(&old, &new).unwrap();
    assert_eq!(out.keys().collect::<Vec<_>>(), vec!["foo"]);
}

// Scenario: a requirement already satisfied by the old catalog pulls
// nothing; only strictly newer providers would be carried.
#[test]
fn test_update_only_rule_for_existing_satisfiers() {
    let mut old_docs = foo_new(false);
    old_docs.extend(etcd_docs(&[("etcd.v0.9.1", "0.9.1", "")]));
    let old = model_from(&old_docs);

    let mut new_docs = foo_new(true);
    new_docs.extend(etcd_docs(&[("etcd.v0.9.1", "0.9.1", "")]));
    let new = model_from(&new_docs);

    let out = DiffGenerator::default().run(&old, &new).unwrap();
    assert_eq!(out.keys().collect::<Vec<_>>(), vec!["foo"]);
}

// Scenario: an include range names exactly the matching versions, without
// extending along the upgrade path.
#[test]
fn test_include_version_range() {
    let new = model_from(&[
        package("baz", "stable"),
        channel(
            "baz",
            "stable",
            json!([
                {"name": "baz.v1.0.0"},
                {"name": "baz.v1.0.1", "replaces": "baz.v1.0.0"},
                {"name": "baz.v1.1.0", "replaces": "baz.v1.0.1"},
            ]),
        ),
        bundle("baz", "baz.v1.0.0", "1.0.0", "stable", "", &[]),
        bundle("baz", "baz.v1.0.1", "1.0.1", "stable", "baz.v1.0.0", &[]),
        bundle("baz", "baz.v1.1.0", "1.1.0", "stable", "baz.v1.0.1", &[]),
    ]);

    let generator = DiffGenerator {
        includer: DiffIncluder {
            packages: vec![DiffIncludePackage {
                name: "baz".to_string(),
                version_range: Some("=1.0.0".to_string()),
                ..Default::default()
            }],
        },
        ..Default::default()
    };

    let out = generator.run(&model::Model::default(), &new).unwrap();
    assert_eq!(channel_bundle_names(&out, "baz", "stable"), vec!["baz.v1.0.0"]);
}

// A named version, in contrast, carries the whole path from the head down
// to it so the upgrade edges stay intact.
#[test]
fn test_include_version_extends_to_head() {
    let new = model_from(&[
        package("baz", "stable"),
        channel(
            "baz",
            "stable",
            json!([
                {"name": "baz.v1.0.0"},
                {"name": "baz.v1.0.1", "replaces": "baz.v1.0.0"},
                {"name": "baz.v1.1.0", "replaces": "baz.v1.0.1"},
            ]),
        ),
        bundle("baz", "baz.v1.0.0", "1.0.0", "stable", "", &[]),
        bundle("baz", "baz.v1.0.1", "1.0.1", "stable", "baz.v1.0.0", &[]),
        bundle("baz", "baz.v1.1.0", "1.1.0", "stable", "baz.v1.0.1", &[]),
    ]);

    let generator = DiffGenerator {
        includer: DiffIncluder {
            packages: vec![DiffIncludePackage {
                name: "baz".to_string(),
                versions: vec!["1.0.0".parse().unwrap()],
                ..Default::default()
            }],
        },
        ..Default::default()
    };

    let out = generator.run(&model::Model::default(), &new).unwrap();
    assert_eq!(
        channel_bundle_names(&out, "baz", "stable"),
        vec!["baz.v1.0.0", "baz.v1.0.1", "baz.v1.1.0"]
    );
}

// A capability requirement finds its providers by matching provided GVK
// properties anywhere in the catalog.
#[test]
fn test_gvk_requirement_pulls_provider() {
    let old = model_from(&foo_new(false));

    let gvk_required = json!({
        "type": "olm.gvk.required",
        "value": {"group": "etcd.database.coreos.com", "kind": "EtcdCluster", "version": "v1beta2"},
    });
    let gvk_provided = json!({
        "type": "olm.gvk",
        "value": {"group": "etcd.database.coreos.com", "kind": "EtcdCluster", "version": "v1beta2"},
    });
    let mut docs = vec![
        package("foo", "stable"),
        channel("foo", "stable", json!([{"name": "foo.v0.1.0"}])),
        bundle("foo", "foo.v0.1.0", "0.1.0", "stable", "", &[gvk_required]),
        package("etcd", "stable"),
        channel(
            "etcd",
            "stable",
            json!([
                {"name": "etcd.v0.9.0"},
                {"name": "etcd.v0.9.1", "replaces": "etcd.v0.9.0"},
            ]),
        ),
        bundle("etcd", "etcd.v0.9.0", "0.9.0", "stable", "", &[gvk_provided.clone()]),
    ];
    docs.push(bundle(
        "etcd",
        "etcd.v0.9.1",
        "0.9.1",
        "stable",
        "etcd.v0.9.0",
        &[gvk_provided],
    ));
    let new = model_from(&docs);

    let out = DiffGenerator::default().run(&old, &new).unwrap();
    assert_eq!(out.keys().collect::<Vec<_>>(), vec!["etcd", "foo"]);
    // The highest provider of the capability is carried.
    assert_eq!(
        channel_bundle_names(&out, "etcd", "stable"),
        vec!["etcd.v0.9.1"]
    );
}

// Channel-scoped include selections only look inside the named channel.
#[test]
fn test_include_scoped_to_channel() {
    let new = model_from(&[
        package("baz", "stable"),
        channel("baz", "stable", json!([{"name": "baz.v1.0.0"}])),
        channel("baz", "fast", json!([{"name": "baz.v1.1.0"}])),
        bundle("baz", "baz.v1.0.0", "1.0.0", "stable", "", &[]),
        bundle("baz", "baz.v1.1.0", "1.1.0", "fast", "", &[]),
    ]);

    let generator = DiffGenerator {
        includer: DiffIncluder {
            packages: vec![DiffIncludePackage {
                name: "baz".to_string(),
                channels: vec![diff::DiffIncludeChannel {
                    name: "fast".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        },
        ..Default::default()
    };

    let out = generator.run(&model::Model::default(), &new).unwrap();
    let package = &out["baz"];
    assert!(package.channels.contains_key("fast"));
    // The default channel comes along with just its head, keeping the
    // output projectable to a valid model.
    assert_eq!(
        channel_bundle_names(&out, "baz", "stable"),
        vec!["baz.v1.0.0"]
    );
    assert_eq!(channel_bundle_names(&out, "baz", "fast"), vec!["baz.v1.1.0"]);

    // A selector naming a version absent from the channel is an error.
    let generator = DiffGenerator {
        includer: DiffIncluder {
            packages: vec![DiffIncludePackage {
                name: "baz".to_string(),
                channels: vec![diff::DiffIncludeChannel {
                    name: "fast".to_string(),
                    versions: vec!["1.0.0".parse().unwrap()],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        },
        ..Default::default()
    };
    assert!(matches!(
        generator.run(&model::Model::default(), &new),
        Err(DiffError::InvalidInclude(_))
    ));
}

#[test]
fn test_identical_models_diff_to_empty() {
    let mut docs = foo_new(true);
    docs.extend(etcd_docs(&[("etcd.v0.9.1", "0.9.1", "")]));
    let old = model_from(&docs);
    let new = model_from(&docs);

    let out = DiffGenerator::default().run(&old, &new).unwrap();
    assert!(out.is_empty());
}

// Applying a diff and re-diffing yields nothing further.
#[test]
fn test_diff_is_idempotent_after_merge() {
    let old = model_from(&foo_new(false));
    let mut docs = foo_new(true);
    docs.extend(etcd_docs(&[
        ("etcd.v0.9.0", "0.9.0", ""),
        ("etcd.v0.9.1", "0.9.1", "etcd.v0.9.0"),
    ]));
    let new = model_from(&docs);

    let first = DiffGenerator::default().run(&old, &new).unwrap();

    let merged = declcfg::merge(
        vec![
            declcfg::convert_from_model(&old),
            declcfg::convert_from_model(&first),
        ],
        declcfg::MergePolicy::TwoWay,
    );
    let merged = declcfg::convert_to_model(&merged).unwrap();

    let second = DiffGenerator::default().run(&merged, &new).unwrap();
    assert!(second.is_empty(), "unexpected second diff: {second:?}");
}

#[test]
fn test_unresolved_requirement_fails() {
    let old = model_from(&foo_new(false));
    let new = model_from(&foo_new(true)); // requires etcd, which is absent

    let err = DiffGenerator::default().run(&old, &new).unwrap_err();
    match err {
        DiffError::UnresolvedRequirements(messages) => {
            assert_eq!(messages.len(), 1);
            assert!(messages[0].contains("etcd"));
        }
        other => panic!("expected unresolved requirements, got {other}"),
    }
}

#[test]
fn test_invalid_include_aggregates_errors() {
    let new = model_from(&foo_new(false));
    let generator = DiffGenerator {
        includer: DiffIncluder {
            packages: vec![
                DiffIncludePackage {
                    name: "qux".to_string(),
                    ..Default::default()
                },
                DiffIncludePackage {
                    name: "foo".to_string(),
                    versions: vec!["0.1.0".parse().unwrap()],
                    version_range: Some(">=0.1.0".to_string()),
                    ..Default::default()
                },
            ],
        },
        ..Default::default()
    };

    let err = generator
        .run(&model::Model::default(), &new)
        .unwrap_err();
    match err {
        DiffError::InvalidInclude(messages) => {
            assert_eq!(messages.len(), 2);
            assert!(messages[0].contains("qux"));
            assert!(messages[1].contains("mutually exclusive"));
        }
        other => panic!("expected invalid include, got {other}"),
    }
}

// Additive include keeps both the computed heads and the included content,
// stitched back together along the replaces chain.
#[test]
fn test_additive_include_unions_with_heads() {
    let new = model_from(&[
        package("baz", "stable"),
        channel(
            "baz",
            "stable",
            json!([
                {"name": "baz.v1.0.0"},
                {"name": "baz.v1.0.1", "replaces": "baz.v1.0.0"},
                {"name": "baz.v1.1.0", "replaces": "baz.v1.0.1"},
            ]),
        ),
        bundle("baz", "baz.v1.0.0", "1.0.0", "stable", "", &[]),
        bundle("baz", "baz.v1.0.1", "1.0.1", "stable", "baz.v1.0.0", &[]),
        bundle("baz", "baz.v1.1.0", "1.1.0", "stable", "baz.v1.0.1", &[]),
    ]);

    let generator = DiffGenerator {
        include_additively: true,
        includer: DiffIncluder {
            packages: vec![DiffIncludePackage {
                name: "baz".to_string(),
                version_range: Some("=1.0.0".to_string()),
                ..Default::default()
            }],
        },
        ..Default::default()
    };

    let out = generator.run(&model::Model::default(), &new).unwrap();
    // Head and included bundle, reconnected through the intermediate.
    assert_eq!(
        channel_bundle_names(&out, "baz", "stable"),
        vec!["baz.v1.0.0", "baz.v1.0.1", "baz.v1.1.0"]
    );
}
