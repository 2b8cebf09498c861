use std::io::Read;
use std::path::{Path, PathBuf};

use crate::{
    Bundle, DeclarativeConfig, Meta, SCHEMA_BUNDLE, SCHEMA_CHANNEL, SCHEMA_DEPRECATIONS,
    SCHEMA_PACKAGE,
};

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read document stream")]
    Read(#[from] std::io::Error),
    #[error("failed to parse document with schema {schema:?}")]
    Document {
        schema: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse document")]
    Json(#[from] serde_json::Error),
    #[error("bundle {name:?} has an invalid {type_:?} property: {source}", type_ = properties::TYPE_BUNDLE_OBJECT)]
    BundleObject {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to walk directory {path}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: Box<LoadError>,
    },
}

/// Decode a document stream into a config. The stream is either a sequence
/// of YAML documents separated by `---`, or concatenated JSON objects
/// (detected by a leading `{`).
pub fn load_reader(mut reader: impl Read) -> Result<DeclarativeConfig, LoadError> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    load_slice(&buf)
}

/// Decode a document stream held in memory. See [load_reader].
pub fn load_slice(buf: &[u8]) -> Result<DeclarativeConfig, LoadError> {
    let mut cfg = DeclarativeConfig::default();

    if buf.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{') {
        // A JSON stream: objects concatenated with arbitrary whitespace.
        for document in
            serde_json::Deserializer::from_slice(buf).into_iter::<Box<serde_json::value::RawValue>>()
        {
            add_document(&mut cfg, document?.get())?;
        }
    } else {
        // A YAML stream: documents separated by `---`. Each document is
        // transcoded to JSON bytes so that raw property payloads are
        // captured verbatim by serde_json.
        for de in serde_yaml::Deserializer::from_slice(buf) {
            let mut json = Vec::new();
            let mut ser = serde_json::Serializer::new(&mut json);
            serde_transcode::transcode(de, &mut ser)?;
            if json.is_empty() || json == b"null" {
                continue; // Empty document.
            }
            let json = std::str::from_utf8(&json).expect("serde_json emits UTF-8");
            add_document(&mut cfg, json)?;
        }
    }
    Ok(cfg)
}

fn add_document(cfg: &mut DeclarativeConfig, json: &str) -> Result<(), LoadError> {
    let meta: Meta = serde_json::from_str(json)?;

    let parse_doc = |source| LoadError::Document {
        schema: meta.schema.clone(),
        source,
    };
    match meta.schema.as_str() {
        SCHEMA_PACKAGE => cfg
            .packages
            .push(serde_json::from_str(json).map_err(parse_doc)?),
        SCHEMA_CHANNEL => cfg
            .channels
            .push(serde_json::from_str(json).map_err(parse_doc)?),
        SCHEMA_BUNDLE => {
            let mut bundle: Bundle = serde_json::from_str(json).map_err(parse_doc)?;
            extract_objects(&mut bundle)?;
            cfg.bundles.push(bundle);
        }
        SCHEMA_DEPRECATIONS => cfg
            .deprecations
            .push(serde_json::from_str(json).map_err(parse_doc)?),
        _ => cfg.others.push(meta),
    }
    Ok(())
}

// Decode every olm.bundle.object property into the bundle's object list,
// and designate the cluster-service manifest among them, if any.
fn extract_objects(bundle: &mut Bundle) -> Result<(), LoadError> {
    for prop in &bundle.properties {
        if prop.type_ != properties::TYPE_BUNDLE_OBJECT {
            continue;
        }
        let object: properties::BundleObject =
            serde_json::from_str(prop.value.as_str()).map_err(|source| LoadError::BundleObject {
                name: bundle.name.clone(),
                source,
            })?;
        let data = object
            .decoded()
            .map_err(|err| LoadError::BundleObject {
                name: bundle.name.clone(),
                source: serde_json::Error::io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    err,
                )),
            })?;
        let data = String::from_utf8_lossy(&data).into_owned();

        if bundle.csv_json.is_empty() && is_csv(&data) {
            bundle.csv_json = data.clone();
        }
        bundle.objects.push(data);
    }
    Ok(())
}

fn is_csv(manifest: &str) -> bool {
    #[derive(serde::Deserialize)]
    struct Typed {
        #[serde(default)]
        kind: String,
    }
    matches!(
        serde_json::from_str::<Typed>(manifest),
        Ok(Typed { kind }) if kind == "ClusterServiceVersion"
    )
}

/// Walk a directory, loading every `*.yaml`, `*.yml`, and `*.json` file as
/// a document stream and concatenating the results in path order.
pub fn load_fs(root: impl AsRef<Path>) -> Result<DeclarativeConfig, LoadError> {
    let root = root.as_ref();
    let mut cfg = DeclarativeConfig::default();

    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| LoadError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.path().extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") | Some("json") => {}
            _ => continue,
        }

        let buf = std::fs::read(entry.path()).map_err(|source| LoadError::Io {
            path: entry.path().to_path_buf(),
            source,
        })?;
        let loaded = load_slice(&buf).map_err(|source| LoadError::File {
            path: entry.path().to_path_buf(),
            source: Box::new(source),
        })?;
        cfg.extend(loaded);
    }
    Ok(cfg)
}
