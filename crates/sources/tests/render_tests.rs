use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use sources::{ImageRegistry, RefKind, RefMask, Render, RenderError};

struct FakeImage {
    labels: BTreeMap<String, String>,
    content: PathBuf,
}

/// A directory-backed registry standing in for a real OCI endpoint.
#[derive(Default)]
struct FakeRegistry {
    images: BTreeMap<String, FakeImage>,
}

impl FakeRegistry {
    fn add(&mut self, reference: &str, labels: &[(&str, &str)], content: &Path) {
        self.images.insert(
            reference.to_string(),
            FakeImage {
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                content: content.to_path_buf(),
            },
        );
    }

    fn image(&self, reference: &str) -> Result<&FakeImage, sources::BoxError> {
        self.images
            .get(reference)
            .ok_or_else(|| format!("image {reference:?} not found").into())
    }
}

impl ImageRegistry for FakeRegistry {
    fn pull(&self, reference: &str) -> Result<(), sources::BoxError> {
        self.image(reference).map(|_| ())
    }

    fn labels(&self, reference: &str) -> Result<BTreeMap<String, String>, sources::BoxError> {
        Ok(self.image(reference)?.labels.clone())
    }

    fn unpack(&self, reference: &str, dest: &Path) -> Result<(), sources::BoxError> {
        let root = &self.image(reference)?.content;
        for entry in walkdir::WalkDir::new(root) {
            let entry = entry?;
            let target = dest.join(entry.path().strip_prefix(root)?);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else {
                std::fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    }

    fn destroy(&self) -> Result<(), sources::BoxError> {
        Ok(())
    }
}

fn write_dc_fixture(dir: &Path) {
    std::fs::write(
        dir.join("catalog.yaml"),
        r#"---
schema: olm.package
name: foo
defaultChannel: stable
---
schema: olm.channel
name: stable
package: foo
entries:
  - name: foo.v0.1.0
---
schema: olm.bundle
name: foo.v0.1.0
package: foo
image: reg.test/foo:v0.1.0
properties:
  - type: olm.package
    value: {packageName: foo, version: 0.1.0}
  - type: olm.channel
    value: {name: stable}
"#,
    )
    .unwrap();
}

fn write_bundle_fixture(dir: &Path) {
    let manifests = dir.join("manifests");
    std::fs::create_dir_all(&manifests).unwrap();
    std::fs::write(
        manifests.join("csv.yaml"),
        r#"
kind: ClusterServiceVersion
metadata:
  name: etcd.v0.9.1
spec:
  version: 0.9.1
"#,
    )
    .unwrap();
}

#[test]
fn test_permission_mask_rejects_disallowed_kind() {
    let content = tempfile::tempdir().unwrap();
    write_bundle_fixture(content.path());
    let mut registry = FakeRegistry::default();
    registry.add(
        "reg.test/etcd-bundle:v0.9.1",
        &[("package", "etcd")],
        content.path(),
    );

    let mut render = Render::new(&registry, vec!["reg.test/etcd-bundle:v0.9.1".to_string()]);
    render.allowed_ref_mask = RefMask::DC_IMAGE | RefMask::DC_DIR;

    let err = render.run(&CancellationToken::new()).unwrap_err();
    match err {
        RenderError::NotAllowed { reference, kind } => {
            assert_eq!(reference, "reg.test/etcd-bundle:v0.9.1");
            assert_eq!(kind, RefKind::BundleImage);
        }
        other => panic!("expected NotAllowed, got {other}"),
    }
}

#[test]
fn test_empty_mask_rejects_everything() {
    let dir = tempfile::tempdir().unwrap();
    write_dc_fixture(dir.path());
    let registry = FakeRegistry::default();

    let mut render = Render::new(
        &registry,
        vec![dir.path().to_string_lossy().into_owned()],
    );
    render.allowed_ref_mask = RefMask::NONE;
    assert!(matches!(
        render.run(&CancellationToken::new()),
        Err(RenderError::NotAllowed { .. })
    ));
}

#[test]
fn test_render_dc_directory() {
    let dir = tempfile::tempdir().unwrap();
    write_dc_fixture(dir.path());
    let registry = FakeRegistry::default();

    let render = Render::new(&registry, vec![dir.path().to_string_lossy().into_owned()]);
    let cfg = render.run(&CancellationToken::new()).unwrap();
    assert_eq!(cfg.packages.len(), 1);
    assert_eq!(cfg.channels.len(), 1);
    assert_eq!(cfg.bundles.len(), 1);
    // The output projects into a valid model.
    declcfg::convert_to_model(&cfg).unwrap();
}

#[test]
fn test_render_dc_image() {
    let content = tempfile::tempdir().unwrap();
    let configs = content.path().join("configs");
    std::fs::create_dir_all(&configs).unwrap();
    write_dc_fixture(&configs);

    let mut registry = FakeRegistry::default();
    registry.add(
        "reg.test/catalog:latest",
        &[("configs.v1", "configs")],
        content.path(),
    );

    let render = Render::new(&registry, vec!["reg.test/catalog:latest".to_string()]);
    let cfg = render.run(&CancellationToken::new()).unwrap();
    assert_eq!(cfg.packages.len(), 1);
    assert_eq!(cfg.bundles[0].name, "foo.v0.1.0");
}

#[test]
fn test_render_relational_file_and_image() {
    // Build a relational catalog from a declarative fixture.
    let dir = tempfile::tempdir().unwrap();
    write_dc_fixture(dir.path());
    let cfg = declcfg::load_fs(dir.path()).unwrap();
    let m = declcfg::convert_to_model(&cfg).unwrap();

    let content = tempfile::tempdir().unwrap();
    let db_path = content.path().join("index.db");
    let mut conn = rusqlite::Connection::open(&db_path).unwrap();
    sqlite::write(&mut conn, &m).unwrap();
    drop(conn);

    let registry = FakeRegistry::default();
    let render = Render::new(&registry, vec![db_path.to_string_lossy().into_owned()]);
    let from_file = render.run(&CancellationToken::new()).unwrap();
    assert_eq!(from_file.packages.len(), 1);
    assert_eq!(from_file.bundles[0].name, "foo.v0.1.0");

    let mut registry = FakeRegistry::default();
    registry.add(
        "reg.test/index:latest",
        &[("db-location", "index.db")],
        content.path(),
    );
    let render = Render::new(&registry, vec!["reg.test/index:latest".to_string()]);
    let from_image = render.run(&CancellationToken::new()).unwrap();
    assert_eq!(from_image, from_file);
}

#[test]
fn test_render_bundle_image() {
    let content = tempfile::tempdir().unwrap();
    write_bundle_fixture(content.path());
    let mut registry = FakeRegistry::default();
    registry.add(
        "reg.test/etcd-bundle:v0.9.1",
        &[("package", "etcd")],
        content.path(),
    );

    let render = Render::new(&registry, vec!["reg.test/etcd-bundle:v0.9.1".to_string()]);
    let cfg = render.run(&CancellationToken::new()).unwrap();
    assert_eq!(cfg.bundles.len(), 1);
    assert_eq!(cfg.bundles[0].package, "etcd");
    assert_eq!(cfg.bundles[0].image, "reg.test/etcd-bundle:v0.9.1");
}

#[test]
fn test_image_without_expected_labels_fails() {
    let content = tempfile::tempdir().unwrap();
    let mut registry = FakeRegistry::default();
    registry.add(
        "reg.test/unknown:latest",
        &[("maintainer", "nobody")],
        content.path(),
    );

    let render = Render::new(&registry, vec!["reg.test/unknown:latest".to_string()]);
    let err = render.run(&CancellationToken::new()).unwrap_err();
    match err {
        RenderError::NoExpectedLabels { labels, .. } => {
            assert_eq!(labels, vec!["maintainer"]);
        }
        other => panic!("expected NoExpectedLabels, got {other}"),
    }
}

#[test]
fn test_unrecognized_file_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.tar");
    std::fs::write(&path, "junk").unwrap();
    let registry = FakeRegistry::default();

    let render = Render::new(&registry, vec![path.to_string_lossy().into_owned()]);
    assert!(matches!(
        render.run(&CancellationToken::new()),
        Err(RenderError::UnrecognizedFile { .. })
    ));
}

#[test]
fn test_cancellation_discards_output() {
    let dir = tempfile::tempdir().unwrap();
    write_dc_fixture(dir.path());
    let registry = FakeRegistry::default();

    let render = Render::new(&registry, vec![dir.path().to_string_lossy().into_owned()]);
    let token = CancellationToken::new();
    token.cancel();
    assert!(matches!(
        render.run(&token),
        Err(RenderError::Cancelled)
    ));
}
