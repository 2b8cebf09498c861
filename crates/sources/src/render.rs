use std::fmt;
use std::io::Read;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::registry::{BoxError, ImageRegistry, LABEL_CONFIGS, LABEL_DB_LOCATION, LABEL_PACKAGE};

/// The kind of a single input reference, as detected by probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    BundleImage,
    SqliteImage,
    SqliteFile,
    DcImage,
    DcDir,
}

impl RefKind {
    fn bit(self) -> u8 {
        match self {
            RefKind::BundleImage => 1 << 0,
            RefKind::SqliteImage => 1 << 1,
            RefKind::SqliteFile => 1 << 2,
            RefKind::DcImage => 1 << 3,
            RefKind::DcDir => 1 << 4,
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefKind::BundleImage => "bundle-image",
            RefKind::SqliteImage => "sqlite-image",
            RefKind::SqliteFile => "sqlite-file",
            RefKind::DcImage => "dc-image",
            RefKind::DcDir => "dc-directory",
        })
    }
}

/// Bitset over reference kinds a renderer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefMask(u8);

impl RefMask {
    pub const NONE: RefMask = RefMask(0);
    pub const BUNDLE_IMAGE: RefMask = RefMask(1 << 0);
    pub const SQLITE_IMAGE: RefMask = RefMask(1 << 1);
    pub const SQLITE_FILE: RefMask = RefMask(1 << 2);
    pub const DC_IMAGE: RefMask = RefMask(1 << 3);
    pub const DC_DIR: RefMask = RefMask(1 << 4);
    pub const ALL: RefMask = RefMask(0b1_1111);

    pub fn allows(self, kind: RefKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

impl std::ops::BitOr for RefMask {
    type Output = RefMask;
    fn bitor(self, rhs: RefMask) -> RefMask {
        RefMask(self.0 | rhs.0)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("reference {reference:?} of kind {kind} is not allowed")]
    NotAllowed { reference: String, kind: RefKind },
    #[error("detect {reference:?}")]
    Detect {
        reference: String,
        #[source]
        source: BoxError,
    },
    #[error("render {reference:?}")]
    Adapt {
        reference: String,
        #[source]
        source: BoxError,
    },
    #[error("reference {reference:?} is a file of unrecognized content type")]
    UnrecognizedFile { reference: String },
    #[error("image {reference:?} carries none of the expected labels; present labels: {labels:?}")]
    NoExpectedLabels {
        reference: String,
        labels: Vec<String>,
    },
    #[error("image {reference:?} label {label:?} is empty")]
    EmptyLabel { reference: String, label: String },
    #[error("operation cancelled")]
    Cancelled,
}

/// Renders every input reference to its declarative form and accumulates
/// the results in input order. Each reference passes through
/// detect -> permission check -> adapt -> normalize; any failure aborts the
/// run and discards partial output.
pub struct Render<'a> {
    pub refs: Vec<String>,
    pub registry: &'a dyn ImageRegistry,
    pub allowed_ref_mask: RefMask,
}

impl<'a> Render<'a> {
    pub fn new(registry: &'a dyn ImageRegistry, refs: Vec<String>) -> Self {
        Self {
            refs,
            registry,
            allowed_ref_mask: RefMask::ALL,
        }
    }

    pub fn run(
        &self,
        token: &CancellationToken,
    ) -> Result<declcfg::DeclarativeConfig, RenderError> {
        let mut combined = declcfg::DeclarativeConfig::default();
        for reference in &self.refs {
            combined.extend(self.render_reference(reference, token)?);
        }
        declcfg::sort_by_package(&mut combined);
        Ok(combined)
    }

    fn render_reference(
        &self,
        reference: &str,
        token: &CancellationToken,
    ) -> Result<declcfg::DeclarativeConfig, RenderError> {
        if token.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        tracing::debug!(reference, "rendering reference");

        let kind = self.detect(reference)?;
        if !self.allowed_ref_mask.allows(kind) {
            return Err(RenderError::NotAllowed {
                reference: reference.to_string(),
                kind,
            });
        }

        let adapt = |source| RenderError::Adapt {
            reference: reference.to_string(),
            source,
        };
        let mut cfg = match kind {
            RefKind::DcDir => declcfg::load_fs(reference)
                .map_err(|err| adapt(Box::new(err) as BoxError))?,
            RefKind::SqliteFile => {
                load_sqlite(Path::new(reference)).map_err(adapt)?
            }
            RefKind::DcImage | RefKind::SqliteImage | RefKind::BundleImage => {
                self.render_image(reference, kind, token).map_err(adapt)?
            }
        };

        declcfg::normalize(&mut cfg);
        Ok(cfg)
    }

    // A reference is a directory, a regular file with the relational
    // signature, or an image whose labels select its adapter.
    fn detect(&self, reference: &str) -> Result<RefKind, RenderError> {
        match std::fs::metadata(reference) {
            Ok(meta) if meta.is_dir() => Ok(RefKind::DcDir),
            Ok(_) => {
                let sniffed = sniff_relational(Path::new(reference)).map_err(|err| {
                    RenderError::Detect {
                        reference: reference.to_string(),
                        source: Box::new(err),
                    }
                })?;
                if sniffed {
                    Ok(RefKind::SqliteFile)
                } else {
                    Err(RenderError::UnrecognizedFile {
                        reference: reference.to_string(),
                    })
                }
            }
            Err(_) => {
                let labels = self.registry.labels(reference).map_err(|source| {
                    RenderError::Detect {
                        reference: reference.to_string(),
                        source,
                    }
                })?;
                if labels.contains_key(LABEL_DB_LOCATION) {
                    Ok(RefKind::SqliteImage)
                } else if labels.contains_key(LABEL_CONFIGS) {
                    Ok(RefKind::DcImage)
                } else if labels.contains_key(LABEL_PACKAGE) {
                    Ok(RefKind::BundleImage)
                } else {
                    Err(RenderError::NoExpectedLabels {
                        reference: reference.to_string(),
                        labels: labels.into_keys().collect(),
                    })
                }
            }
        }
    }

    fn render_image(
        &self,
        reference: &str,
        kind: RefKind,
        token: &CancellationToken,
    ) -> Result<declcfg::DeclarativeConfig, BoxError> {
        self.registry.pull(reference)?;
        if token.is_cancelled() {
            return Err(Box::new(RenderError::Cancelled));
        }

        // The unpack directory is removed when this guard drops, on every
        // exit path.
        let unpacked = tempfile::tempdir()?;
        self.registry.unpack(reference, unpacked.path())?;
        if token.is_cancelled() {
            return Err(Box::new(RenderError::Cancelled));
        }

        let labels = self.registry.labels(reference)?;
        let label_path = |label: &str| -> Result<std::path::PathBuf, BoxError> {
            match labels.get(label).filter(|v| !v.is_empty()) {
                Some(value) => Ok(unpacked.path().join(value)),
                None => Err(Box::new(RenderError::EmptyLabel {
                    reference: reference.to_string(),
                    label: label.to_string(),
                })),
            }
        };

        match kind {
            RefKind::SqliteImage => load_sqlite(&label_path(LABEL_DB_LOCATION)?),
            RefKind::DcImage => {
                declcfg::load_fs(label_path(LABEL_CONFIGS)?).map_err(|e| Box::new(e) as BoxError)
            }
            RefKind::BundleImage => {
                let package = labels
                    .get(LABEL_PACKAGE)
                    .cloned()
                    .unwrap_or_default();
                crate::bundle::render_bundle(unpacked.path(), reference, &package)
            }
            _ => unreachable!("non-image kinds render without a registry"),
        }
    }
}

fn load_sqlite(path: &Path) -> Result<declcfg::DeclarativeConfig, BoxError> {
    let conn = rusqlite::Connection::open_with_flags(
        path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE,
    )?;
    Ok(sqlite::load(&conn)?)
}

// Compare a file's leading bytes against the relational file signature.
fn sniff_relational(path: &Path) -> Result<bool, std::io::Error> {
    let mut file = std::fs::File::open(path)?;
    let mut magic = [0u8; 16];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(&magic[..] == sqlite::FILE_MAGIC),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err),
    }
}
