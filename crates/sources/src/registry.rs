use std::collections::BTreeMap;
use std::path::Path;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Image label naming the relational catalog file inside an image.
pub const LABEL_DB_LOCATION: &str = "db-location";
/// Image label naming the declarative config root inside an image.
pub const LABEL_CONFIGS: &str = "configs.v1";
/// Image label marking a single-bundle image and naming its package.
pub const LABEL_PACKAGE: &str = "package";

/// Handle to an OCI registry. The renderer shares one handle read-only
/// across a run and releases it on completion regardless of outcome; no
/// retry policy is imposed here, adapters surface the registry's errors.
pub trait ImageRegistry {
    /// Fetch an image so that its labels and contents become available.
    fn pull(&self, reference: &str) -> Result<(), BoxError>;

    /// The image's config labels.
    fn labels(&self, reference: &str) -> Result<BTreeMap<String, String>, BoxError>;

    /// Materialize the image's filesystem at `dest`.
    fn unpack(&self, reference: &str, dest: &Path) -> Result<(), BoxError>;

    /// Release any resources held by the handle.
    fn destroy(&self) -> Result<(), BoxError>;
}
