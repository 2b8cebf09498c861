use std::path::Path;

use serde_json::Value;

use crate::registry::BoxError;

/// Derive the declarative form of a single-bundle image unpacked at `root`.
///
/// Every manifest becomes an embedded object property; the cluster-service
/// manifest additionally contributes the package version, provided and
/// required capabilities, related images, and upgrade-edge metadata.
pub fn render_bundle(
    root: &Path,
    reference: &str,
    package: &str,
) -> Result<declcfg::DeclarativeConfig, BoxError> {
    let manifest_dir = if root.join("manifests").is_dir() {
        root.join("manifests")
    } else {
        root.to_path_buf()
    };

    let mut objects: Vec<String> = Vec::new();
    let mut csv: Option<Value> = None;
    for entry in walkdir::WalkDir::new(&manifest_dir)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.path().extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") | Some("json") => {}
            _ => continue,
        }
        let buf = std::fs::read(entry.path())?;
        let manifest: serde_yaml::Value = serde_yaml::from_slice(&buf)
            .map_err(|err| format!("parse manifest {}: {err}", entry.path().display()))?;
        let manifest: Value = serde_json::to_value(&manifest)?;
        if manifest.is_null() {
            continue;
        }
        if manifest["kind"] == "ClusterServiceVersion" && csv.is_none() {
            csv = Some(manifest.clone());
        }
        objects.push(manifest.to_string());
    }

    let csv = csv.ok_or_else(|| {
        format!("bundle image {reference:?} carries no cluster-service manifest")
    })?;

    let name = string_at(&csv, "/metadata/name")
        .ok_or_else(|| format!("bundle image {reference:?}: cluster-service manifest has no name"))?;
    let version = string_at(&csv, "/spec/version").unwrap_or_default();

    let mut props = vec![properties::build(&properties::Package {
        package_name: package.to_string(),
        version,
    })];
    for owned in crd_descriptors(&csv, "owned") {
        props.push(properties::build(&owned.provided()));
    }
    for required in crd_descriptors(&csv, "required") {
        props.push(properties::build(&required.required()));
    }
    if let Some(range) = string_at(&csv, "/metadata/annotations/olm.skipRange") {
        props.push(properties::build(&properties::SkipRange(range)));
    }
    props.push(properties::build(&csv_metadata(&csv)));
    for object in &objects {
        props.push(properties::build(&properties::BundleObject::from_bytes(
            object.as_bytes(),
        )));
    }

    let mut related_images = Vec::new();
    if let Some(images) = csv.pointer("/spec/relatedImages").and_then(Value::as_array) {
        for image in images {
            if let Some(reference) = string_at(image, "/image") {
                related_images.push(declcfg::RelatedImage {
                    name: string_at(image, "/name").unwrap_or_default(),
                    image: reference,
                });
            }
        }
    }

    let bundle = declcfg::Bundle {
        schema: declcfg::SCHEMA_BUNDLE.to_string(),
        name,
        package: package.to_string(),
        image: reference.to_string(),
        properties: props,
        related_images,
        csv_json: csv.to_string(),
        objects,
    };

    Ok(declcfg::DeclarativeConfig {
        bundles: vec![bundle],
        ..Default::default()
    })
}

// The structured view of the cluster-service manifest, so consumers do not
// need to carry the whole manifest blob.
fn csv_metadata(csv: &Value) -> properties::CSVMetadata {
    let strings = |pointer: &str| -> Vec<String> {
        csv.pointer(pointer)
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };
    let map = |pointer: &str| -> std::collections::BTreeMap<String, String> {
        csv.pointer(pointer)
            .and_then(Value::as_object)
            .map(|object| {
                object
                    .iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    };
    let value = |pointer: &str| csv.pointer(pointer).cloned().unwrap_or(Value::Null);

    properties::CSVMetadata {
        annotations: map("/metadata/annotations"),
        api_service_definitions: value("/spec/apiservicedefinitions"),
        crd_descriptions: value("/spec/customresourcedefinitions"),
        description: string_at(csv, "/spec/description").unwrap_or_default(),
        display_name: string_at(csv, "/spec/displayName").unwrap_or_default(),
        install_modes: value("/spec/installModes"),
        keywords: strings("/spec/keywords"),
        labels: map("/metadata/labels"),
        links: value("/spec/links"),
        maintainers: value("/spec/maintainers"),
        maturity: string_at(csv, "/spec/maturity").unwrap_or_default(),
        min_kube_version: string_at(csv, "/spec/minKubeVersion").unwrap_or_default(),
        native_apis: value("/spec/nativeAPIs"),
        provider: value("/spec/provider"),
    }
}

struct CrdDescriptor {
    group: String,
    kind: String,
    version: String,
}

impl CrdDescriptor {
    fn provided(&self) -> properties::GVK {
        properties::GVK {
            group: self.group.clone(),
            kind: self.kind.clone(),
            version: self.version.clone(),
        }
    }
    fn required(&self) -> properties::GVKRequired {
        properties::GVKRequired {
            group: self.group.clone(),
            kind: self.kind.clone(),
            version: self.version.clone(),
        }
    }
}

// Custom-resource descriptors name their definition as `<plural>.<group>`.
fn crd_descriptors(csv: &Value, bucket: &str) -> Vec<CrdDescriptor> {
    let Some(descriptors) = csv
        .pointer(&format!("/spec/customresourcedefinitions/{bucket}"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    descriptors
        .iter()
        .filter_map(|d| {
            let name = string_at(d, "/name")?;
            let group = name.split_once('.').map(|(_, g)| g.to_string())?;
            Some(CrdDescriptor {
                group,
                kind: string_at(d, "/kind")?,
                version: string_at(d, "/version")?,
            })
        })
        .collect()
}

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer)?.as_str().map(str::to_string)
}
